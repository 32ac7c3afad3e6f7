//! Command line entry point.

use clap::{Parser, Subcommand};
use octocrab::Octocrab;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;
use upstream_sync::assign::Assign;
use upstream_sync::branches::DeleteRemoteBranches;
use upstream_sync::config::Config;
use upstream_sync::diff::Diff;
use upstream_sync::github::{IssueHelper, PrHelper, RepoName, UserHelper};
use upstream_sync::gitutils::{CherryPicker, DifferImpl, GitHelper, GitOps};
use upstream_sync::intents::IntentsGetter;
use upstream_sync::markup::Finder;
use upstream_sync::sync::Sync;
use upstream_sync::templates::TemplateRenderer;
use upstream_sync::undraft::Undraft;

#[derive(Parser)]
#[command(
    name = "upstream-sync",
    version,
    about = "Keeps a downstream GitHub repository in sync with its upstream"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = ".github/upstream-sync.yml")]
    config: PathBuf,

    /// GitHub token used for API calls and pushes.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List upstream commits not yet represented downstream.
    Diff,

    /// Cherry-pick missing upstream commits into PRs and tracking issues.
    Sync {
        /// Compute everything but mutate nothing on GitHub.
        #[arg(long)]
        dry_run: bool,
    },

    /// Assign open tracking issues to owners.
    Assign {
        /// Compute everything but mutate nothing on GitHub.
        #[arg(long)]
        dry_run: bool,
    },

    /// Mark the oldest draft tracking PR ready for review.
    Undraft {
        /// Compute everything but mutate nothing on GitHub.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete the tool's work branches from the origin remote.
    DeleteRemoteBranches {
        /// List the branches but delete nothing.
        #[arg(long)]
        dry_run: bool,
    },
}

// The engines hold non-Send futures, so everything runs on one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // The subscriber may not be installed yet when config loading
            // fails.
            let _ = tracing_subscriber::fmt().compact().try_init();

            report(error.as_ref());
            ExitCode::FAILURE
        }
    }
}

fn report(error: &dyn Error) {
    error!(%error, "Run failed");

    let mut source = error.source();
    while let Some(cause) = source {
        error!(%cause, "Caused by");
        source = cause.source();
    }
}

fn init_tracing(verbosity: i64) {
    let default = if verbosity >= 2 {
        "trace"
    } else if verbosity == 1 {
        "debug"
    } else {
        "info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = Config::from_file(&cli.config)?;

    init_tracing(config.log_level);

    let octocrab = Octocrab::builder()
        .personal_token(cli.token.clone())
        .build()?;

    let repo_name = RepoName::parse(&config.downstream.github_repo_name)?;
    let repo_path = PathBuf::from(&config.downstream.local_repo_path);
    let finder = Finder::new(&config.commit_markup)?;

    match cli.command {
        Command::Diff => {
            let diff = Diff {
                differ: differ(&octocrab, &finder, &repo_name),
                git: open_git(&repo_path)?,
                main_branch: config.downstream.main_branch.clone(),
                upstream: config.upstream.clone(),
                since: config.diff.commits_since,
            };

            diff.run().await?;
        }

        Command::Sync { dry_run } => {
            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                });
            }

            let sync = Sync {
                differ: differ(&octocrab, &finder, &repo_name),
                cherry_picker: Box::new(CherryPicker::new(
                    &config.commit_markup,
                    config.sync.before_commit.clone(),
                )),
                git: open_git(&repo_path)?,
                issues: Box::new(IssueHelper::new(
                    octocrab.clone(),
                    repo_name.clone(),
                    TemplateRenderer::new(&config.commit_markup),
                )),
                prs: Box::new(PrHelper::new(
                    octocrab.clone(),
                    repo_name.clone(),
                    TemplateRenderer::new(&config.commit_markup),
                )),
                workdir: repo_path.clone(),
                token: cli.token.clone(),
                dry_run,
                downstream: config.downstream.clone(),
                upstream: config.upstream.clone(),
                since: config.diff.commits_since,
            };

            sync.run(&cancel).await?;
        }

        Command::Assign { dry_run } => {
            let assign = Assign {
                issues: Box::new(IssueHelper::new(
                    octocrab.clone(),
                    repo_name.clone(),
                    TemplateRenderer::new(&config.commit_markup),
                )),
                users: Box::new(UserHelper::new(octocrab.clone(), repo_name.clone())),
                finder: finder.clone(),
                renderer: TemplateRenderer::new(&config.commit_markup),
                owners_path: repo_path.join(&config.downstream.owners_file),
                dry_run,
                rng: RefCell::new(StdRng::from_entropy()),
            };

            assign.run().await?;
        }

        Command::Undraft { dry_run } => {
            let undraft = Undraft {
                prs: Box::new(PrHelper::new(
                    octocrab.clone(),
                    repo_name.clone(),
                    TemplateRenderer::new(&config.commit_markup),
                )),
                git: open_git(&repo_path)?,
                finder: finder.clone(),
                upstream: config.upstream.clone(),
                dry_run,
            };

            undraft.run().await?;
        }

        Command::DeleteRemoteBranches { dry_run } => {
            let branches = DeleteRemoteBranches {
                git: open_git(&repo_path)?,
                token: cli.token.clone(),
                dry_run,
            };

            branches.run()?;
        }
    }

    Ok(())
}

fn differ(octocrab: &Octocrab, finder: &Finder, repo_name: &RepoName) -> Box<DifferImpl> {
    Box::new(DifferImpl::new(Box::new(IntentsGetter::new(
        octocrab.clone(),
        finder.clone(),
        repo_name.clone(),
    ))))
}

fn open_git(path: &Path) -> Result<Box<dyn GitOps>, Box<dyn Error>> {
    Ok(Box::new(GitHelper::open(path)?))
}
