//! Creates the on-disk layout every service expects before its container starts.

use crate::WorkshopError;
use crate::config::{Config, WorkshopSnapshot};
use crate::services;
use log::{debug, info};
use std::io::ErrorKind;
use std::path::PathBuf;

pub(crate) const BACKUPS_DIR: &str = "backups";

/// Relative subdirectories under the install root, one bind mount per service
/// plus the shared document folder and the backup target.
pub(crate) const DATA_SUBDIRS: [&str; 5] = [
    services::OLLAMA,
    services::CHROMADB,
    services::N8N,
    services::SHARED_DIR,
    BACKUPS_DIR,
];

#[derive(Debug, Default)]
pub(crate) struct ProvisionReport {
    pub(crate) created: Vec<PathBuf>,
    pub(crate) existing: Vec<PathBuf>,
}

/// Idempotent directory creation. A missing parent is created along the way;
/// lacking write access to it is fatal for the whole setup.
pub(crate) fn provision(config: &Config) -> Result<ProvisionReport, WorkshopError> {
    let mut report = ProvisionReport::default();

    for subdir in DATA_SUBDIRS {
        let path = config.install_path.join(subdir);
        if path.is_dir() {
            debug!("directory {} already present", path.display());
            report.existing.push(path);
            continue;
        }
        std::fs::create_dir_all(&path).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                WorkshopError::PermissionDenied {
                    path: path.clone(),
                    source: e,
                }
            } else {
                e.into()
            }
        })?;
        info!("created {}", path.display());
        report.created.push(path);
    }

    let snapshot = WorkshopSnapshot::write(config)?;
    debug!(
        "configuration snapshot written to {}",
        WorkshopSnapshot::path(&snapshot.install_path).display()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn creates_the_full_layout_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_install_path(&dir.path().join("workshop"));

        let report = provision(&config).unwrap();
        assert_eq!(report.created.len(), DATA_SUBDIRS.len());
        assert!(report.existing.is_empty());
        for subdir in DATA_SUBDIRS {
            assert!(config.install_path.join(subdir).is_dir());
        }
        assert!(WorkshopSnapshot::load(&config.install_path).is_some());
    }

    #[test]
    fn second_run_reports_everything_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_install_path(dir.path());

        provision(&config).unwrap();
        let report = provision(&config).unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.existing.len(), DATA_SUBDIRS.len());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_parent_is_a_permission_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        let config = Config::with_install_path(&locked.join("workshop"));
        match provision(&config) {
            Err(err) => assert!(matches!(err, WorkshopError::PermissionDenied { .. })),
            // mode bits do not bind a privileged test runner
            Ok(_) => assert!(config.install_path.is_dir()),
        }

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700)).unwrap();
    }
}
