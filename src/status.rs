//! Read-only aggregation of container and health state into a report table.

use crate::WorkshopError;
use crate::docker::{DockerHandler, RuntimeStatus};
use crate::health::{self, HealthState};
use crate::services::ServiceDefinition;
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};

/// Observed state of one service, recomputed on every call.
#[derive(Debug)]
pub(crate) struct ContainerState {
    pub(crate) service: String,
    pub(crate) status: RuntimeStatus,
    pub(crate) ports: String,
    pub(crate) health: HealthState,
}

/// Queries the runtime per service, health-checking only the running ones.
/// A host with no containers yields absent/unknown rows, never an error.
pub(crate) async fn gather(
    docker: &DockerHandler,
    table: &[ServiceDefinition],
) -> Result<Vec<ContainerState>, WorkshopError> {
    let mut states = Vec::new();
    for def in table {
        let status = docker.status_of(def.name).await?;
        let health = if status == RuntimeStatus::Running {
            health::check(def).await
        } else {
            HealthState::Unknown
        };
        let ports = match status {
            RuntimeStatus::Running => format!("{}->{}", def.host_port, def.container_port),
            _ => "-".to_string(),
        };
        states.push(ContainerState {
            service: def.name.to_string(),
            status,
            ports,
            health,
        });
    }
    Ok(states)
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PORTS")]
    ports: String,
    #[tabled(rename = "HEALTH")]
    health: String,
}

fn health_cell(health: &HealthState) -> String {
    match health {
        HealthState::Healthy => health.green().to_string(),
        HealthState::Unhealthy(_) => health.red().to_string(),
        HealthState::Unreachable(_) => health.yellow().to_string(),
        HealthState::Unknown => health.dimmed().to_string(),
    }
}

pub(crate) fn render(states: &[ContainerState]) -> String {
    let rows: Vec<StatusRow> = states
        .iter()
        .map(|state| StatusRow {
            service: state.service.clone(),
            status: state.status.to_string(),
            ports: state.ports.clone(),
            health: health_cell(&state.health),
        })
        .collect();
    Table::new(rows).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_every_service_with_its_status() {
        let states = vec![
            ContainerState {
                service: "ollama".to_string(),
                status: RuntimeStatus::Running,
                ports: "11434->11434".to_string(),
                health: HealthState::Healthy,
            },
            ContainerState {
                service: "chromadb".to_string(),
                status: RuntimeStatus::Absent,
                ports: "-".to_string(),
                health: HealthState::Unknown,
            },
            ContainerState {
                service: "n8n".to_string(),
                status: RuntimeStatus::Stopped,
                ports: "-".to_string(),
                health: HealthState::Unknown,
            },
        ];

        let rendered = render(&states);
        assert!(rendered.contains("ollama"));
        assert!(rendered.contains("running"));
        assert!(rendered.contains("11434->11434"));
        assert!(rendered.contains("chromadb"));
        assert!(rendered.contains("absent"));
        assert!(rendered.contains("n8n"));
        assert!(rendered.contains("stopped"));
    }

    #[test]
    fn unhealthy_cell_keeps_the_reason() {
        let cell = health_cell(&HealthState::Unhealthy("status 500".to_string()));
        assert!(cell.contains("unhealthy (status 500)"));
    }
}
