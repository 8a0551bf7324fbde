//! Volume backup with guaranteed service restart.
//!
//! Steps run as `StoppingServices → CopyingVolumes → Archiving →
//! RestartingServices`; a failure in any step still triggers the restart
//! before the error surfaces, so a broken backup never leaves the stack down.

use crate::WorkshopError;
use crate::docker::{DockerHandler, ServiceLifecycle};
use crate::services::ServiceDefinition;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackupStep {
    StoppingServices,
    CopyingVolumes,
    Archiving,
    RestartingServices,
}

impl fmt::Display for BackupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackupStep::StoppingServices => "stopping services",
            BackupStep::CopyingVolumes => "copying volumes",
            BackupStep::Archiving => "archiving",
            BackupStep::RestartingServices => "restarting services",
        };
        write!(f, "{label}")
    }
}

/// Record of a completed backup, immutable once written.
#[derive(Debug, Serialize)]
pub(crate) struct BackupArchive {
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) included_volumes: Vec<PathBuf>,
    pub(crate) output_path: PathBuf,
}

/// Seam between the backup state machine and the stack it operates on.
pub(crate) trait BackupOps {
    async fn stop_services(&mut self) -> Result<(), WorkshopError>;
    async fn copy_volumes(&mut self, staging: &Path) -> Result<Vec<PathBuf>, WorkshopError>;
    async fn archive(&mut self, staging: &Path, output: &Path) -> Result<(), WorkshopError>;
    async fn restart_services(&mut self) -> Result<(), WorkshopError>;
}

/// Drives the backup steps. `restart_services` runs exactly once, whether the
/// earlier steps succeeded or not.
pub(crate) async fn run_backup<O: BackupOps>(
    ops: &mut O,
    backups_dir: &Path,
) -> Result<BackupArchive, WorkshopError> {
    let timestamp = Utc::now();
    let stamp = timestamp.format("%Y%m%d-%H%M%S");
    let staging = backups_dir.join(format!("staging-{stamp}"));
    let output = backups_dir.join(format!("backup-{stamp}.tar.gz"));

    let steps = run_steps(ops, &staging, &output).await;
    let restart = ops.restart_services().await;

    match steps {
        Ok(included_volumes) => {
            restart.map_err(|e| WorkshopError::BackupStepFailed {
                step: BackupStep::RestartingServices,
                source: Box::new(e),
            })?;
            info!("backup written to {}", output.display());
            Ok(BackupArchive {
                timestamp,
                included_volumes,
                output_path: output,
            })
        }
        Err((step, e)) => {
            if let Err(restart_err) = restart {
                error!("restart after failed backup also failed: {restart_err}");
            }
            Err(WorkshopError::BackupStepFailed {
                step,
                source: Box::new(e),
            })
        }
    }
}

async fn run_steps<O: BackupOps>(
    ops: &mut O,
    staging: &Path,
    output: &Path,
) -> Result<Vec<PathBuf>, (BackupStep, WorkshopError)> {
    info!("stopping services for backup");
    ops.stop_services()
        .await
        .map_err(|e| (BackupStep::StoppingServices, e))?;

    info!("copying volumes to {}", staging.display());
    let included = ops
        .copy_volumes(staging)
        .await
        .map_err(|e| (BackupStep::CopyingVolumes, e))?;

    info!("compressing into {}", output.display());
    ops.archive(staging, output)
        .await
        .map_err(|e| (BackupStep::Archiving, e))?;

    Ok(included)
}

/// Production [`BackupOps`] over the docker handler and the definition table.
pub(crate) struct StackBackupOps<'a> {
    pub(crate) docker: &'a DockerHandler,
    pub(crate) table: &'a [ServiceDefinition],
}

impl BackupOps for StackBackupOps<'_> {
    async fn stop_services(&mut self) -> Result<(), WorkshopError> {
        for def in self.table {
            self.docker.stop(def.name).await?;
        }
        Ok(())
    }

    async fn copy_volumes(&mut self, staging: &Path) -> Result<Vec<PathBuf>, WorkshopError> {
        let mut included = Vec::new();
        for def in self.table {
            for mount in &def.volumes {
                if !mount.host_path.is_dir() {
                    warn!(
                        "skipping {} for `{}`: not a directory",
                        mount.host_path.display(),
                        def.name
                    );
                    continue;
                }
                let dir_name = mount
                    .host_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| def.name.to_string());
                let dest = staging.join(def.name).join(dir_name);
                copy_dir(&mount.host_path, &dest)?;
                included.push(mount.host_path.clone());
            }
        }
        Ok(included)
    }

    async fn archive(&mut self, staging: &Path, output: &Path) -> Result<(), WorkshopError> {
        let staging_dir = staging.to_path_buf();
        let output_path = output.to_path_buf();
        tokio::task::spawn_blocking(move || archive_and_clean(&staging_dir, &output_path))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn restart_services(&mut self) -> Result<(), WorkshopError> {
        for def in self.table {
            match self.docker.start(def.name).await {
                Ok(_) => {}
                // never created in the first place, nothing to bring back
                Err(WorkshopError::ServiceNotFound(name)) => {
                    warn!("`{name}` was absent before the backup, not starting it");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Plain recursive file copy; symlinks and special files are skipped.
pub(crate) fn copy_dir(src: &Path, dest: &Path) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn write_archive(staging: &Path, output: &Path) -> Result<(), std::io::Error> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", staging)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Writes the archive and removes the staging copy whether or not the write
/// succeeded, so a failed backup leaves no half-copied tree behind.
fn archive_and_clean(staging: &Path, output: &Path) -> Result<(), std::io::Error> {
    let written = write_archive(staging, output);
    if let Err(e) = std::fs::remove_dir_all(staging) {
        warn!("could not remove staging copy {}: {e}", staging.display());
    }
    written
}
