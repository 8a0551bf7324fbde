//! Stand up and manage a local RAG workshop stack over the docker daemon.

mod backup;
mod cli;
mod config;
mod docker;
mod health;
mod models;
mod provision;
mod retry;
mod services;
mod status;

use crate::backup::{BackupStep, StackBackupOps, run_backup};
use crate::cli::{Action, CliArgs, configure_cli};
use crate::config::{Config, WorkshopSnapshot, load_config};
use crate::docker::DockerHandler;
use crate::services::{ServiceDefinition, resolve_target, service_table};
use bollard::errors::Error as BollardError;
use env_logger::Env;
use log::{error, info, warn};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum WorkshopError {
    #[error("permission denied creating {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("container runtime unavailable after {attempts} attempts")]
    RuntimeUnavailable { attempts: u32 },
    #[error("no container named `{0}`")]
    ServiceNotFound(String),
    #[error("unknown service `{0}`, expected `all` or a defined service name")]
    UnknownService(String),
    #[error("health check for `{service}` did not pass within {attempts} attempts")]
    HealthCheckTimeout { service: String, attempts: u32 },
    #[error("`{service}` is unhealthy: {reason}")]
    HealthCheckUnhealthy { service: String, reason: String },
    #[error("failed to pull model `{0}` after retry")]
    ModelPullFailed(String),
    #[error("image pull did not complete for `{0}`")]
    ImagePullFailed(String),
    #[error("backup failed while {step}: {source}")]
    BackupStepFailed {
        step: BackupStep,
        source: Box<WorkshopError>,
    },
    #[error("{0} service(s) failed, see the log output above")]
    ServiceFailures(usize),
    #[error("host ports collide: `{first}` and `{second}` both use {port}")]
    PortCollision {
        first: String,
        second: String,
        port: u16,
    },
    #[error("failed to load configuration: {0}")]
    Config(#[from] figment2::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Docker(#[from] BollardError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = configure_cli();
    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<(), WorkshopError> {
    let mut config = load_config(&args.config_path)?;
    if let Some(path) = &args.install_path {
        config.install_path = path.clone();
    }
    let table = service_table(&config)?;
    let targets = resolve_target(&table, &args.target)?;

    match args.action {
        Action::Start => start_stack(&config, &table, &targets, args.skip_models).await,
        Action::Stop => stop_services(&targets).await,
        Action::Restart => restart_services(&targets).await,
        Action::Status => show_status(&config, &table).await,
        Action::Logs => show_logs(&targets, args.tail).await,
        Action::Reset => reset_services(&targets).await,
        Action::Backup => backup_stack(&config, &table).await,
    }
}

/// Turns a batch failure count into the process result. Failures were already
/// logged per service, the count only drives the exit code.
fn batch_result(failures: usize) -> Result<(), WorkshopError> {
    if failures == 0 {
        Ok(())
    } else {
        Err(WorkshopError::ServiceFailures(failures))
    }
}

/// Provision → runtime check → create-or-start → health wait → model pulls →
/// status report. A failing service is reported but never stops the others
/// from coming up; the exit code turns non-zero after the whole batch ran.
async fn start_stack(
    config: &Config,
    table: &[ServiceDefinition],
    targets: &[ServiceDefinition],
    skip_models: bool,
) -> Result<(), WorkshopError> {
    let report = provision::provision(config)?;
    info!(
        "install layout ready under {} ({} created, {} already present)",
        config.install_path.display(),
        report.created.len(),
        report.existing.len()
    );

    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;

    let batch = docker::start_batch(&docker, targets).await;
    for def in &batch.started {
        match health::wait_healthy(def).await {
            Ok(()) => info!("`{}` is healthy", def.name),
            Err(e) => warn!("{e}"),
        }
    }

    let pulls_wanted = batch.started.iter().any(|def| def.name == services::OLLAMA);
    if pulls_wanted && !skip_models {
        let base_url = format!("http://localhost:{}", config.ports.ollama);
        for failure in models::pull_models(&base_url, &config.models).await {
            warn!("{failure}, re-run `ragstack start` or pull manually");
        }
    }

    let states = status::gather(&docker, table).await?;
    println!("{}", status::render(&states));
    batch_result(batch.failures)
}

async fn stop_services(targets: &[ServiceDefinition]) -> Result<(), WorkshopError> {
    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;
    batch_result(docker::stop_batch(&docker, targets).await)
}

async fn restart_services(targets: &[ServiceDefinition]) -> Result<(), WorkshopError> {
    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;
    batch_result(docker::restart_batch(&docker, targets).await)
}

async fn show_status(config: &Config, table: &[ServiceDefinition]) -> Result<(), WorkshopError> {
    // display only, the runtime below stays the source of truth
    if let Some(snapshot) = WorkshopSnapshot::load(&config.install_path) {
        info!(
            "workshop at {}, provisioned {}",
            snapshot.install_path.display(),
            snapshot.created_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;
    let states = status::gather(&docker, table).await?;
    println!("{}", status::render(&states));
    Ok(())
}

async fn show_logs(targets: &[ServiceDefinition], tail: usize) -> Result<(), WorkshopError> {
    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;
    for def in targets {
        println!("==> {} <==", def.name);
        match docker.print_logs(def.name, tail).await {
            Ok(()) => {}
            Err(WorkshopError::ServiceNotFound(name)) => {
                warn!("`{name}` has no container, nothing to show");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn reset_services(targets: &[ServiceDefinition]) -> Result<(), WorkshopError> {
    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;
    batch_result(docker::reset_batch(&docker, targets).await)
}

/// Backup always covers the whole stack: every service is stopped before the
/// copy and brought back afterwards, even when a step fails.
async fn backup_stack(config: &Config, table: &[ServiceDefinition]) -> Result<(), WorkshopError> {
    let docker = DockerHandler::connect()?;
    docker.ensure_runtime().await?;

    let backups_dir = config.install_path.join(provision::BACKUPS_DIR);
    std::fs::create_dir_all(&backups_dir)?;

    let mut ops = StackBackupOps {
        docker: &docker,
        table,
    };
    let archive = run_backup(&mut ops, &backups_dir).await?;
    info!(
        "backed up {} volumes into {}",
        archive.included_volumes.len(),
        archive.output_path.display()
    );
    Ok(())
}
