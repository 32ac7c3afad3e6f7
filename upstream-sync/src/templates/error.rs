//! Template rendering error types.

use thiserror::Error;

/// Errors that can occur while rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Handlebars rendering error.
    #[error("template rendering error: {0}")]
    Render(#[from] handlebars::RenderError),
}
