//! Runtime configuration and the persisted workshop snapshot.

use crate::WorkshopError;
use chrono::{DateTime, Utc};
use figment2::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration snapshot written at the install root by provisioning.
pub(crate) const SNAPSHOT_FILE: &str = "workshop.json";

#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct Ports {
    #[serde(default = "defaults::ollama_port")]
    pub(crate) ollama: u16,
    #[serde(default = "defaults::chroma_port")]
    pub(crate) chroma: u16,
    #[serde(default = "defaults::n8n_port")]
    pub(crate) n8n: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Ports {
            ollama: defaults::ollama_port(),
            chroma: defaults::chroma_port(),
            n8n: defaults::n8n_port(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct Config {
    #[serde(default = "defaults::install_path")]
    pub(crate) install_path: PathBuf,
    #[serde(default)]
    pub(crate) ports: Ports,
    #[serde(default = "defaults::webhook_url")]
    pub(crate) webhook_url: String,
    #[serde(default = "defaults::models")]
    pub(crate) models: Vec<String>,
}

impl Config {
    #[cfg(test)]
    pub(crate) fn with_install_path(install_path: &Path) -> Self {
        Config {
            install_path: install_path.to_path_buf(),
            ports: Ports::default(),
            webhook_url: defaults::webhook_url(),
            models: defaults::models(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(super) fn ollama_port() -> u16 {
        11434
    }

    pub(super) fn chroma_port() -> u16 {
        8000
    }

    pub(super) fn n8n_port() -> u16 {
        5678
    }

    pub(super) fn install_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ai-workshop")
    }

    pub(super) fn webhook_url() -> String {
        "http://localhost:5678/webhook/rag-query".to_string()
    }

    pub(super) fn models() -> Vec<String> {
        vec!["llama3.2".to_string(), "nomic-embed-text".to_string()]
    }
}

pub(crate) fn load_config(config_path: &Path) -> Result<Config, WorkshopError> {
    let config = Figment::new()
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("RAGSTACK_").split("__"))
        .extract()?;
    Ok(config)
}

/// Persisted record of how the workshop was provisioned. Display only; the
/// container runtime is re-queried for anything behavioral.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct WorkshopSnapshot {
    pub(crate) install_path: PathBuf,
    pub(crate) ports: Ports,
    pub(crate) webhook_url: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl WorkshopSnapshot {
    pub(crate) fn path(install_path: &Path) -> PathBuf {
        install_path.join(SNAPSHOT_FILE)
    }

    pub(crate) fn load(install_path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(Self::path(install_path)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Writes the snapshot, keeping `created_at` stable across re-provisioning.
    pub(crate) fn write(config: &Config) -> Result<Self, WorkshopError> {
        let now = Utc::now();
        let created_at = Self::load(&config.install_path)
            .map(|previous| previous.created_at)
            .unwrap_or(now);
        let snapshot = WorkshopSnapshot {
            install_path: config.install_path.clone(),
            ports: config.ports.clone(),
            webhook_url: config.webhook_url.clone(),
            created_at,
            updated_at: now,
        };
        std::fs::write(
            Self::path(&config.install_path),
            serde_json::to_string_pretty(&snapshot)?,
        )?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        use figment2::Jail;
        Jail::expect_with(|jail: &mut Jail| {
            jail.create_file(
                "ragstack.toml",
                r#"
                webhook_url = "http://example.test/webhook/rag"

                [ports]
                ollama = 11500
                "#,
            )?;

            jail.set_env("RAGSTACK_PORTS__CHROMA", "9100");

            let config = load_config("ragstack.toml".as_ref()).unwrap();
            assert_eq!(config.ports.ollama, 11500);
            assert_eq!(config.ports.chroma, 9100);
            assert_eq!(config.ports.n8n, 5678);
            assert_eq!(config.webhook_url, "http://example.test/webhook/rag");
            assert_eq!(config.models, vec!["llama3.2", "nomic-embed-text"]);

            Ok(())
        });
    }

    #[test]
    fn snapshot_keeps_created_at_across_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_install_path(dir.path());

        let first = WorkshopSnapshot::write(&config).unwrap();
        let second = WorkshopSnapshot::write(&config).unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);

        let loaded = WorkshopSnapshot::load(dir.path()).unwrap();
        assert_eq!(loaded.created_at, first.created_at);
        assert_eq!(loaded.ports.n8n, 5678);
    }

    #[test]
    fn snapshot_load_returns_none_without_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorkshopSnapshot::load(dir.path()).is_none());
    }
}
