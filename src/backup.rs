use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::utils::error::StorageError;

const BACKUP_PREFIX: &str = "stock_backup_";
const BACKUP_SUFFIX: &str = ".db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Periodic snapshots of the store file with retention pruning. Runs on its
/// own timer, independent of the poll cycle's liveness.
pub struct BackupManager {
    database_path: PathBuf,
    backup_dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(database_path: PathBuf, backup_dir: PathBuf, retention: usize) -> Self {
        Self {
            database_path,
            backup_dir,
            retention,
        }
    }

    /// Copies the live database into the backup directory, then prunes
    /// backups beyond the retention count, oldest first.
    pub fn run_backup(&self) -> Result<BackupRecord, StorageError> {
        if !self.database_path.exists() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "database file does not exist, nothing to back up",
            )));
        }

        fs::create_dir_all(&self.backup_dir)?;

        let path = self.next_backup_path();
        fs::copy(&self.database_path, &path)?;
        let size_bytes = fs::metadata(&path)?.len();
        info!(path = %path.display(), "database backed up");

        // Pruning failures do not fail the backup that just succeeded.
        self.prune_old_backups();

        Ok(BackupRecord {
            path,
            created_at: Utc::now(),
            size_bytes,
        })
    }

    /// Backups on disk, oldest first. The file name embeds the creation
    /// timestamp, so name order is age order.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>, StorageError> {
        let mut records = Vec::new();
        if !self.backup_dir.exists() {
            return Ok(records);
        }

        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(BACKUP_PREFIX) || !name.ends_with(BACKUP_SUFFIX) {
                continue;
            }

            let metadata = entry.metadata()?;
            let created_at: DateTime<Utc> = metadata.modified()?.into();
            records.push(BackupRecord {
                path: entry.path(),
                created_at,
                size_bytes: metadata.len(),
            });
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    /// Restores the store from a backup file, keeping a safety copy of the
    /// live file first.
    pub fn restore(&self, backup_path: &Path) -> Result<(), StorageError> {
        if !backup_path.exists() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backup file not found: {}", backup_path.display()),
            )));
        }

        if self.database_path.exists() {
            let safety = self.database_path.with_extension("db.before_restore");
            fs::copy(&self.database_path, &safety)?;
        }

        fs::copy(backup_path, &self.database_path)?;
        info!(path = %backup_path.display(), "database restored from backup");
        Ok(())
    }

    /// Spawns the periodic backup task. A failed run is logged and does not
    /// shift the next attempt.
    pub fn start(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_backup() {
                    error!(error = %e, "scheduled backup failed");
                }
            }
        })
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let mut path = self
            .backup_dir
            .join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));

        // Same-second backups get a sequence suffix instead of clobbering.
        let mut sequence = 1;
        while path.exists() {
            path = self
                .backup_dir
                .join(format!("{BACKUP_PREFIX}{stamp}_{sequence}{BACKUP_SUFFIX}"));
            sequence += 1;
        }

        path
    }

    fn prune_old_backups(&self) {
        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(e) => {
                warn!(error = %e, "backup pruning failed");
                return;
            }
        };

        let excess = backups.len().saturating_sub(self.retention);
        for record in backups.into_iter().take(excess) {
            match fs::remove_file(&record.path) {
                Ok(()) => debug!(path = %record.path.display(), "removed old backup"),
                Err(e) => warn!(path = %record.path.display(), error = %e, "could not remove old backup"),
            }
        }
    }
}
