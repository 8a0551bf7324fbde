//! Static definition table for the workshop services.

use crate::WorkshopError;
use crate::config::Config;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const OLLAMA: &str = "ollama";
pub(crate) const CHROMADB: &str = "chromadb";
pub(crate) const N8N: &str = "n8n";

/// Directory holding documents that get mounted into the workflow engine.
pub(crate) const SHARED_DIR: &str = "shared";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthExpectation {
    /// Any 2xx response counts as healthy.
    Status2xx,
    /// 2xx plus a JSON body carrying the given field (heartbeat-style endpoints).
    JsonField(&'static str),
}

#[derive(Debug, Clone)]
pub(crate) struct HealthCheck {
    pub(crate) path: &'static str,
    pub(crate) expectation: HealthExpectation,
    pub(crate) timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct VolumeMount {
    pub(crate) host_path: PathBuf,
    pub(crate) container_path: &'static str,
    pub(crate) read_only: bool,
}

/// One service of the workshop stack. Built once from the [`Config`] and never
/// mutated afterwards; the container is named after `name`, which is the key
/// for every lifecycle operation.
#[derive(Debug, Clone)]
pub(crate) struct ServiceDefinition {
    pub(crate) name: &'static str,
    pub(crate) image: &'static str,
    pub(crate) host_port: u16,
    pub(crate) container_port: u16,
    pub(crate) volumes: Vec<VolumeMount>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) health: HealthCheck,
}

impl ServiceDefinition {
    pub(crate) fn health_url(&self) -> String {
        format!("http://localhost:{}{}", self.host_port, self.health.path)
    }

    /// `host:container[:ro]` bind specs as the daemon expects them.
    pub(crate) fn bind_specs(&self) -> Vec<String> {
        self.volumes
            .iter()
            .map(|mount| {
                let spec = format!("{}:{}", mount.host_path.display(), mount.container_path);
                if mount.read_only { format!("{spec}:ro") } else { spec }
            })
            .collect()
    }

    pub(crate) fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// Builds the definition table for the stack. Fails on host port collisions.
pub(crate) fn service_table(config: &Config) -> Result<Vec<ServiceDefinition>, WorkshopError> {
    let install = &config.install_path;

    let ollama = ServiceDefinition {
        name: OLLAMA,
        image: "ollama/ollama:latest",
        host_port: config.ports.ollama,
        container_port: 11434,
        volumes: vec![VolumeMount {
            host_path: install.join(OLLAMA),
            container_path: "/root/.ollama",
            read_only: false,
        }],
        // explicit origins instead of mutating the ambient environment
        env: BTreeMap::from([("OLLAMA_ORIGINS".to_string(), "*".to_string())]),
        health: HealthCheck {
            path: "/api/tags",
            expectation: HealthExpectation::Status2xx,
            timeout: HEALTH_TIMEOUT,
        },
    };

    let chromadb = ServiceDefinition {
        name: CHROMADB,
        image: "chromadb/chroma:latest",
        host_port: config.ports.chroma,
        container_port: 8000,
        volumes: vec![VolumeMount {
            host_path: install.join(CHROMADB),
            container_path: "/chroma/chroma",
            read_only: false,
        }],
        env: BTreeMap::from([
            ("IS_PERSISTENT".to_string(), "TRUE".to_string()),
            ("ANONYMIZED_TELEMETRY".to_string(), "FALSE".to_string()),
        ]),
        health: HealthCheck {
            path: "/api/v1/heartbeat",
            expectation: HealthExpectation::JsonField("nanosecond heartbeat"),
            timeout: HEALTH_TIMEOUT,
        },
    };

    let n8n = ServiceDefinition {
        name: N8N,
        image: "n8nio/n8n:latest",
        host_port: config.ports.n8n,
        container_port: 5678,
        volumes: vec![
            VolumeMount {
                host_path: install.join(N8N),
                container_path: "/home/node/.n8n",
                read_only: false,
            },
            VolumeMount {
                host_path: install.join(SHARED_DIR),
                container_path: "/data/shared",
                read_only: false,
            },
        ],
        env: BTreeMap::from([
            ("N8N_SECURE_COOKIE".to_string(), "false".to_string()),
            ("WEBHOOK_URL".to_string(), config.webhook_url.clone()),
        ]),
        health: HealthCheck {
            path: "/healthz",
            expectation: HealthExpectation::Status2xx,
            timeout: HEALTH_TIMEOUT,
        },
    };

    let table = vec![ollama, chromadb, n8n];
    check_port_collisions(&table)?;
    Ok(table)
}

fn check_port_collisions(table: &[ServiceDefinition]) -> Result<(), WorkshopError> {
    for (index, def) in table.iter().enumerate() {
        for other in &table[index + 1..] {
            if def.host_port == other.host_port {
                return Err(WorkshopError::PortCollision {
                    first: def.name.to_string(),
                    second: other.name.to_string(),
                    port: def.host_port,
                });
            }
        }
    }
    Ok(())
}

/// Maps a CLI target (`all` or one service name) onto table entries.
pub(crate) fn resolve_target(
    table: &[ServiceDefinition],
    target: &str,
) -> Result<Vec<ServiceDefinition>, WorkshopError> {
    if target == "all" {
        return Ok(table.to_vec());
    }
    table
        .iter()
        .find(|def| def.name == target)
        .map(|def| vec![def.clone()])
        .ok_or_else(|| WorkshopError::UnknownService(target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::Path;

    fn test_config() -> Config {
        Config::with_install_path(Path::new("/workshop"))
    }

    #[test]
    fn table_holds_all_services_with_unique_names() {
        let table = service_table(&test_config()).unwrap();
        let names: Vec<_> = table.iter().map(|def| def.name).collect();
        assert_eq!(names, vec![OLLAMA, CHROMADB, N8N]);
    }

    #[test]
    fn colliding_host_ports_are_rejected() {
        let mut config = test_config();
        config.ports.chroma = config.ports.ollama;
        let err = service_table(&config).unwrap_err();
        assert!(matches!(err, WorkshopError::PortCollision { port, .. } if port == config.ports.ollama));
    }

    #[test]
    fn bind_specs_carry_read_only_flag() {
        let def = ServiceDefinition {
            name: "svc",
            image: "img",
            host_port: 1,
            container_port: 2,
            volumes: vec![
                VolumeMount {
                    host_path: PathBuf::from("/data/rw"),
                    container_path: "/rw",
                    read_only: false,
                },
                VolumeMount {
                    host_path: PathBuf::from("/data/ro"),
                    container_path: "/ro",
                    read_only: true,
                },
            ],
            env: BTreeMap::new(),
            health: HealthCheck {
                path: "/",
                expectation: HealthExpectation::Status2xx,
                timeout: HEALTH_TIMEOUT,
            },
        };
        assert_eq!(def.bind_specs(), vec!["/data/rw:/rw", "/data/ro:/ro:ro"]);
        assert_eq!(def.port_key(), "2/tcp");
    }

    #[test]
    fn health_url_uses_host_port() {
        let table = service_table(&test_config()).unwrap();
        let chroma = table.iter().find(|d| d.name == CHROMADB).unwrap();
        assert_eq!(
            chroma.health_url(),
            "http://localhost:8000/api/v1/heartbeat"
        );
    }

    #[test]
    fn resolve_target_all_and_single() {
        let table = service_table(&test_config()).unwrap();
        assert_eq!(resolve_target(&table, "all").unwrap().len(), 3);
        let single = resolve_target(&table, N8N).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].name, N8N);
        assert!(matches!(
            resolve_target(&table, "postgres"),
            Err(WorkshopError::UnknownService(name)) if name == "postgres"
        ));
    }
}
