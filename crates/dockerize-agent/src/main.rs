use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dockerize_agent::{
    render_status, AgentConfig, ConfigOverrides, ResumeOptions, RunOptions, Session,
};
use healing::{ArtifactKind, RunOutcome};
use tracing::info;

/// Exit code for a run stopped with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about = "Containerize a project and keep fixing it until it runs", long_about = None)]
struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. `debug` or `healing=debug,info`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Configuration file (default: <DIR>/dockerize.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache root (overrides DOCKERIZE_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate, build, start and healthcheck a project, repairing as needed
    Run {
        dir: PathBuf,
        /// Ignore cached analysis and artifacts
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        /// Never prompt; escalations suspend the run (exit code 2)
        #[arg(long, default_value_t = false)]
        non_interactive: bool,
        /// Remove a lock left by a crashed run
        #[arg(long, default_value_t = false)]
        force_unlock: bool,
        #[arg(long)]
        max_generation_attempts: Option<u32>,
        #[arg(long)]
        max_runtime_attempts: Option<u32>,
        /// Seconds to wait for containers to become healthy
        #[arg(long)]
        healthcheck_timeout: Option<u64>,
    },
    /// Continue a suspended or interrupted run
    Resume {
        dir: PathBuf,
        /// Guidance for the next generation attempt
        #[arg(long)]
        hint: Option<String>,
        #[arg(long, default_value_t = false)]
        non_interactive: bool,
        #[arg(long, default_value_t = false)]
        force_unlock: bool,
    },
    /// Show the saved run for a project
    Status { dir: PathBuf },
    /// Tear down the project's containers
    Stop { dir: PathBuf },
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Names of the artifacts a failed run left behind.
fn kept_artifacts(dockerfile: Option<&str>, compose: Option<&str>) -> Vec<&'static str> {
    [
        (dockerfile, ArtifactKind::Dockerfile),
        (compose, ArtifactKind::Compose),
    ]
    .into_iter()
    .filter(|(text, _)| text.is_some())
    .map(|(_, kind)| kind.file_name())
    .collect()
}

fn report(outcome: Option<RunOutcome>, dir: &Path, cache_dir: &Path) -> ExitCode {
    let Some(outcome) = outcome else {
        eprintln!(
            "Interrupted. Run state saved; continue with `dockerize resume {}`",
            dir.display()
        );
        return ExitCode::from(EXIT_INTERRUPTED);
    };

    match &outcome {
        RunOutcome::Success {
            containers,
            readiness,
            ..
        } => {
            println!(
                "Success: {} container(s) healthy ({} with an HTTP check)",
                containers.len(),
                readiness.iter().filter(|r| r.http_checked).count()
            );
            println!("Wrote Dockerfile and docker-compose.yaml in {}", dir.display());
        }
        RunOutcome::Failed {
            code,
            error,
            learnings,
            dockerfile,
            compose,
        } => {
            eprintln!("Failed [{code}]: {error}");
            eprintln!(
                "{} failure(s) recorded; see `dockerize status {}`",
                learnings.len(),
                dir.display()
            );
            let kept = kept_artifacts(dockerfile.as_deref(), compose.as_deref());
            if !kept.is_empty() {
                eprintln!("Last {} kept in {}", kept.join(" and "), cache_dir.display());
            }
        }
        RunOutcome::Suspended { request } => {
            eprintln!("{}", request.summary);
            eprintln!(
                "Suspended. Continue with `dockerize resume {} --hint \"...\"`",
                dir.display()
            );
        }
    }
    // exit_code is always 0, 1 or 2
    ExitCode::from(outcome.exit_code() as u8)
}

fn load_config(dir: &Path, cli: &Cli, overrides: ConfigOverrides) -> Result<AgentConfig> {
    let mut config = AgentConfig::load(dir, cli.config.as_deref())?;
    config.apply(&ConfigOverrides {
        cache_dir: cli.cache_dir.clone(),
        ..overrides
    });
    Ok(config)
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Run {
            dir,
            rebuild,
            non_interactive,
            force_unlock,
            max_generation_attempts,
            max_runtime_attempts,
            healthcheck_timeout,
        } => {
            let config = load_config(
                dir,
                &cli,
                ConfigOverrides {
                    max_generation_attempts: *max_generation_attempts,
                    max_runtime_attempts: *max_runtime_attempts,
                    healthcheck_timeout_secs: *healthcheck_timeout,
                    cache_dir: None,
                },
            )?;
            info!(
                model = %config.oracle.model,
                endpoint = %config.oracle.base_url,
                "dockerize starting"
            );
            let session = Session::open(dir, config)?;
            let outcome = session
                .run(&RunOptions {
                    rebuild: *rebuild,
                    non_interactive: *non_interactive,
                    force_unlock: *force_unlock,
                })
                .await?;
            Ok(report(outcome, session.project_dir(), session.cache().dir()))
        }
        Command::Resume {
            dir,
            hint,
            non_interactive,
            force_unlock,
        } => {
            let config = load_config(dir, &cli, ConfigOverrides::default())?;
            let session = Session::open(dir, config)?;
            let outcome = session
                .resume(&ResumeOptions {
                    hint: hint.clone(),
                    non_interactive: *non_interactive,
                    force_unlock: *force_unlock,
                })
                .await?;
            Ok(report(outcome, session.project_dir(), session.cache().dir()))
        }
        Command::Status { dir } => {
            let config = load_config(dir, &cli, ConfigOverrides::default())?;
            let session = Session::open(dir, config)?;
            match session.status()? {
                Some(state) => print!("{}", render_status(&state)),
                None => println!("No saved run for {}", session.project_dir().display()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop { dir } => {
            let config = load_config(dir, &cli, ConfigOverrides::default())?;
            Session::open(dir, config)?.stop().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
