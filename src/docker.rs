//! Typed wrapper over the docker daemon: runtime availability, container
//! lifecycle and log access, keyed by service name.

use crate::WorkshopError;
use crate::retry::retry;
use crate::services::ServiceDefinition;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, HostConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use futures_util::StreamExt;
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::process::Command;

const STOP_GRACE_SECONDS: i32 = 30;
const RUNTIME_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RUNTIME_POLL_ATTEMPTS: u32 = 30;

const REMOVE_OPTIONS: RemoveContainerOptions = RemoveContainerOptions {
    v: false,
    force: false,
    link: false,
};

/// Container status as reported by the daemon's inspect call. `Absent` (no
/// container under the name) is deliberately distinct from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuntimeStatus {
    Absent,
    Created,
    Running,
    Stopped,
    Unknown,
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuntimeStatus::Absent => "absent",
            RuntimeStatus::Created => "created",
            RuntimeStatus::Running => "running",
            RuntimeStatus::Stopped => "stopped",
            RuntimeStatus::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

fn map_status(status: Option<ContainerStateStatusEnum>) -> RuntimeStatus {
    match status {
        Some(ContainerStateStatusEnum::RUNNING) | Some(ContainerStateStatusEnum::RESTARTING) => {
            RuntimeStatus::Running
        }
        Some(ContainerStateStatusEnum::CREATED) => RuntimeStatus::Created,
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            RuntimeStatus::Stopped
        }
        _ => RuntimeStatus::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartRoute {
    /// No container under this name, the caller has to create it.
    CreateFirst,
    StartExisting,
    AlreadyRunning,
}

pub(crate) fn route_start(status: RuntimeStatus) -> StartRoute {
    match status {
        RuntimeStatus::Absent => StartRoute::CreateFirst,
        RuntimeStatus::Running => StartRoute::AlreadyRunning,
        _ => StartRoute::StartExisting,
    }
}

/// Idempotent lifecycle operations keyed by service name. A trait seam so the
/// batch loops below can be exercised without a daemon.
pub(crate) trait ServiceLifecycle {
    async fn create(&self, def: &ServiceDefinition) -> Result<RuntimeStatus, WorkshopError>;
    async fn start(&self, name: &str) -> Result<RuntimeStatus, WorkshopError>;
    async fn stop(&self, name: &str) -> Result<RuntimeStatus, WorkshopError>;
    async fn restart(&self, name: &str) -> Result<RuntimeStatus, WorkshopError>;
    async fn remove(&self, name: &str) -> Result<(), WorkshopError>;
    async fn reset(&self, def: &ServiceDefinition) -> Result<RuntimeStatus, WorkshopError>;
}

/// Starts the service, falling back to create when no container exists.
pub(crate) async fn start_or_create<L: ServiceLifecycle>(
    lifecycle: &L,
    def: &ServiceDefinition,
) -> Result<RuntimeStatus, WorkshopError> {
    match lifecycle.start(def.name).await {
        Err(WorkshopError::ServiceNotFound(_)) => lifecycle.create(def).await,
        result => result,
    }
}

pub(crate) struct StartReport<'a> {
    pub(crate) started: Vec<&'a ServiceDefinition>,
    pub(crate) failures: usize,
}

/// Brings every target up, one at a time. A failing service is reported and
/// counted but never aborts the rest of the batch.
pub(crate) async fn start_batch<'a, L: ServiceLifecycle>(
    lifecycle: &L,
    targets: &'a [ServiceDefinition],
) -> StartReport<'a> {
    let mut report = StartReport {
        started: Vec::new(),
        failures: 0,
    };
    for def in targets {
        match start_or_create(lifecycle, def).await {
            Ok(_) => report.started.push(def),
            Err(e) => {
                error!("`{}` failed to start: {e}", def.name);
                report.failures += 1;
            }
        }
    }
    report
}

pub(crate) async fn stop_batch<L: ServiceLifecycle>(
    lifecycle: &L,
    targets: &[ServiceDefinition],
) -> usize {
    let mut failures = 0;
    for def in targets {
        if let Err(e) = lifecycle.stop(def.name).await {
            error!("`{}` failed to stop: {e}", def.name);
            failures += 1;
        }
    }
    failures
}

pub(crate) async fn restart_batch<L: ServiceLifecycle>(
    lifecycle: &L,
    targets: &[ServiceDefinition],
) -> usize {
    let mut failures = 0;
    for def in targets {
        match lifecycle.restart(def.name).await {
            Ok(status) => info!("`{}` is now {status}", def.name),
            Err(WorkshopError::ServiceNotFound(name)) => {
                warn!("`{name}` does not exist yet, use `ragstack start`");
            }
            Err(e) => {
                error!("`{}` failed to restart: {e}", def.name);
                failures += 1;
            }
        }
    }
    failures
}

pub(crate) async fn reset_batch<L: ServiceLifecycle>(
    lifecycle: &L,
    targets: &[ServiceDefinition],
) -> usize {
    let mut failures = 0;
    for def in targets {
        match lifecycle.reset(def).await {
            Ok(status) => info!("`{}` reset ({status})", def.name),
            Err(e) => {
                error!("`{}` failed to reset: {e}", def.name);
                failures += 1;
            }
        }
    }
    failures
}

pub(crate) struct DockerHandler {
    docker: Docker,
}

impl DockerHandler {
    pub(crate) fn connect() -> Result<Self, WorkshopError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Pings the daemon; if unreachable, asks the platform to launch it and
    /// polls every 2s for up to a minute before giving up.
    pub(crate) async fn ensure_runtime(&self) -> Result<(), WorkshopError> {
        if self.docker.ping().await.is_ok() {
            debug!("container runtime is reachable");
            return Ok(());
        }
        warn!("container runtime not reachable, trying to launch it");
        launch_runtime_daemon().await;
        retry(RUNTIME_POLL_ATTEMPTS, RUNTIME_POLL_INTERVAL, || async {
            self.docker.ping().await
        })
        .await
        .map(|_| info!("container runtime came up"))
        .map_err(|e| {
            debug!("final ping failed: {e}");
            WorkshopError::RuntimeUnavailable {
                attempts: RUNTIME_POLL_ATTEMPTS,
            }
        })
    }

    pub(crate) async fn status_of(&self, name: &str) -> Result<RuntimeStatus, WorkshopError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => Ok(map_status(details.state.and_then(|state| state.status))),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(RuntimeStatus::Absent),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn print_logs(&self, name: &str, tail: usize) -> Result<(), WorkshopError> {
        if self.status_of(name).await? == RuntimeStatus::Absent {
            return Err(WorkshopError::ServiceNotFound(name.to_string()));
        }
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();
        let mut log_stream = self.docker.logs(name, Some(options));
        while let Some(entry) = log_stream.next().await {
            match entry {
                Ok(output) => print!("{output}"),
                Err(e) => warn!("error reading logs of `{name}`: {e}"),
            }
        }
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), WorkshopError> {
        if self.docker.inspect_image(image).await.is_ok() {
            trace!("image {image} is present");
            return Ok(());
        }
        let (image_name, image_tag) = image.rsplit_once(':').unwrap_or((image, "latest"));
        info!("pulling image {image_name}:{image_tag}");

        let options = CreateImageOptions {
            from_image: Some(image_name.to_owned()),
            tag: Some(image_tag.to_owned()),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        let mut pull_error = None;
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(status) = &output.status {
                        trace!("{status}");
                    }
                }
                Err(e) => {
                    error!("error pulling image: {e:?}");
                    pull_error = Some(e);
                }
            }
        }
        match pull_error {
            None => {
                debug!("image {image_name}:{image_tag} pulled");
                Ok(())
            }
            Some(_) => Err(WorkshopError::ImagePullFailed(image.to_string())),
        }
    }
}

impl ServiceLifecycle for DockerHandler {
    /// Creates and starts the container for `def`. A container already holding
    /// the name (in any state) makes this a no-op reported as existing.
    async fn create(&self, def: &ServiceDefinition) -> Result<RuntimeStatus, WorkshopError> {
        let status = self.status_of(def.name).await?;
        if status != RuntimeStatus::Absent {
            info!("container `{}` already exists ({status})", def.name);
            return Ok(status);
        }

        self.ensure_image(def.image).await?;

        let options = CreateContainerOptions {
            name: Some(def.name.to_string()),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(Some(options), container_config(def))
            .await?;
        debug!("container `{}` created with id {}", def.name, created.id);

        self.docker
            .start_container(def.name, None::<StartContainerOptions>)
            .await?;
        info!("`{}` created and started", def.name);
        Ok(RuntimeStatus::Running)
    }

    /// Starts an existing container. Absent containers are signalled back to
    /// the caller so it can route to [`ServiceLifecycle::create`] instead.
    async fn start(&self, name: &str) -> Result<RuntimeStatus, WorkshopError> {
        match route_start(self.status_of(name).await?) {
            StartRoute::AlreadyRunning => {
                info!("`{name}` is already running");
                Ok(RuntimeStatus::Running)
            }
            StartRoute::CreateFirst => Err(WorkshopError::ServiceNotFound(name.to_string())),
            StartRoute::StartExisting => {
                self.docker
                    .start_container(name, None::<StartContainerOptions>)
                    .await?;
                info!("`{name}` started");
                Ok(RuntimeStatus::Running)
            }
        }
    }

    async fn stop(&self, name: &str) -> Result<RuntimeStatus, WorkshopError> {
        match self.status_of(name).await? {
            RuntimeStatus::Running => {
                let options = StopContainerOptionsBuilder::new()
                    .t(STOP_GRACE_SECONDS)
                    .build();
                self.docker.stop_container(name, Some(options)).await?;
                info!("`{name}` stopped");
                Ok(RuntimeStatus::Stopped)
            }
            status => {
                info!("`{name}` is not running ({status})");
                Ok(status)
            }
        }
    }

    async fn restart(&self, name: &str) -> Result<RuntimeStatus, WorkshopError> {
        if self.status_of(name).await? == RuntimeStatus::Absent {
            return Err(WorkshopError::ServiceNotFound(name.to_string()));
        }
        self.docker
            .restart_container(name, None::<RestartContainerOptions>)
            .await?;
        let status = self.status_of(name).await?;
        info!("`{name}` restarted ({status})");
        Ok(status)
    }

    /// Deletes the container record. Bind-mounted host directories are left
    /// untouched, so data survives a later re-create.
    async fn remove(&self, name: &str) -> Result<(), WorkshopError> {
        match self.status_of(name).await? {
            RuntimeStatus::Absent => {
                info!("`{name}` is already absent");
                Ok(())
            }
            status => {
                if status == RuntimeStatus::Running {
                    self.stop(name).await?;
                }
                self.docker
                    .remove_container(name, Some(REMOVE_OPTIONS))
                    .await?;
                info!("`{name}` removed, bind-mounted data kept");
                Ok(())
            }
        }
    }

    /// Remove plus create, picking up definition changes without losing data.
    async fn reset(&self, def: &ServiceDefinition) -> Result<RuntimeStatus, WorkshopError> {
        self.remove(def.name).await?;
        self.create(def).await
    }
}

fn container_config(def: &ServiceDefinition) -> ContainerCreateBody {
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        def.port_key(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(def.host_port.to_string()),
        }]),
    );

    let host_config = HostConfig {
        binds: Some(def.bind_specs()),
        port_bindings: Some(port_bindings),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    let env: Vec<String> = def
        .env
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(def.port_key(), HashMap::new());

    ContainerCreateBody {
        image: Some(def.image.to_string()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

async fn launch_runtime_daemon() {
    #[cfg(target_os = "linux")]
    let launched = Command::new("systemctl")
        .args(["start", "docker"])
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false);

    #[cfg(target_os = "macos")]
    let launched = Command::new("open")
        .args(["-a", "Docker"])
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false);

    #[cfg(target_os = "windows")]
    let launched = Command::new(r"C:\Program Files\Docker\Docker\Docker Desktop.exe")
        .spawn()
        .is_ok();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let launched = false;

    if launched {
        info!("runtime launch requested, waiting for the daemon");
    } else {
        warn!("could not launch the container runtime automatically");
    }
}
