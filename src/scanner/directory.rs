//! Directory Scanner
//!
//! Mirrors a directory of produced files into the [`FileStore`]: new files
//! are loaded on each pass, and files the store evicts are deleted from disk.
//!
//! An unreadable entry is logged and skipped. A failed listing skips loading
//! for that pass but eviction still runs. The scanner never stops the process.
//!
//! Symlinks are followed, so a link to a regular file is loaded like the file
//! itself. An evicted name whose file could not be deleted is not loaded
//! again; its deletion is retried at the start of every pass until it succeeds.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::files::{DiskFiles, ImageFiles};
use crate::store::FileStore;

/// Outcome of one scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Names loaded into the store during this pass
    pub inserted: Vec<String>,
    /// Names evicted from the store during this pass
    pub evicted: Vec<String>,
    /// Eligible entries that could not be loaded
    pub skipped: usize,
}

/// Periodically loads new files from a directory into the store
pub struct DirectoryScanner<F: ImageFiles = DiskFiles> {
    dir: PathBuf,
    store: Arc<FileStore>,
    interval: Duration,
    files: F,
    /// Evicted names whose files are still on disk
    pending_deletes: Mutex<HashSet<String>>,
}

impl DirectoryScanner {
    pub fn new(dir: PathBuf, store: Arc<FileStore>, interval: Duration) -> Self {
        Self::with_files(dir, store, interval, DiskFiles)
    }
}

impl<F: ImageFiles> DirectoryScanner<F> {
    pub fn with_files(dir: PathBuf, store: Arc<FileStore>, interval: Duration, files: F) -> Self {
        Self {
            dir,
            store,
            interval,
            files,
            pending_deletes: Mutex::new(HashSet::new()),
        }
    }

    /// Only held for set operations, never across I/O
    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending_deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one pass now
    pub async fn scan_once(&self) -> ScanReport {
        self.scan_at(Instant::now()).await
    }

    /// Run one pass treating `now` as the discovery and eviction time
    pub async fn scan_at(&self, now: Instant) -> ScanReport {
        let mut report = ScanReport::default();

        self.retry_pending_deletes().await;
        if let Err(e) = self.load_new_files(now, &mut report).await {
            warn!(dir = %self.dir.display(), error = format!("{:#}", e), "Directory scan failed");
        }
        report.evicted = self.evict(now).await;

        debug!(
            inserted = report.inserted.len(),
            evicted = report.evicted.len(),
            skipped = report.skipped,
            pending_deletes = self.pending().len(),
            "Scan pass complete"
        );
        report
    }

    async fn load_new_files(&self, now: Instant, report: &mut ScanReport) -> Result<()> {
        let mut read_dir = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list directory: {:?}", self.dir))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .with_context(|| format!("Failed to read directory entry in {:?}", self.dir))?
        {
            // Non UTF-8 names cannot be requested over the wire
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let awaiting_delete = self.pending().contains(&name);
            if awaiting_delete
                || !self.store.name_rule().accepts(&name)
                || self.store.contains(&name)
            {
                continue;
            }

            let path = entry.path();
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat file, skipping");
                    report.skipped += 1;
                    continue;
                }
            }

            let content = match self.files.read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read file, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            let size = content.len();
            match self.store.insert_at(&name, content, now) {
                Ok(true) => {
                    info!(name = %name, size = size, "Loaded new file");
                    report.inserted.push(name);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(name = %name, error = %e, "Rejected file");
                    report.skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// Evict expired records and delete their backing files
    ///
    /// A failed deletion does not bring the record back.
    async fn evict(&self, now: Instant) -> Vec<String> {
        let evicted = self.store.evict_expired(now);
        for name in &evicted {
            if !self.delete(name).await {
                self.pending().insert(name.clone());
            }
        }
        evicted
    }

    async fn retry_pending_deletes(&self) {
        let pending: Vec<String> = self.pending().iter().cloned().collect();
        for name in pending {
            if self.delete(&name).await {
                self.pending().remove(&name);
            }
        }
    }

    /// Delete the file behind an evicted name; a missing file counts as deleted
    async fn delete(&self, name: &str) -> bool {
        let path = self.dir.join(name);
        match self.files.remove(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted evicted file");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete evicted file");
                false
            }
        }
    }

    /// Scan on a fixed interval until the task is aborted
    ///
    /// The first pass runs one interval from now.
    pub async fn run(&self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.scan_once().await;
            self.store.log_metrics();
        }
    }

    /// Spawn the scan loop as a background task
    pub fn spawn(self) -> JoinHandle<()>
    where
        F: 'static,
    {
        let rule = self.store.name_rule();
        info!(
            dir = %self.dir.display(),
            suffix = rule.suffix(),
            max_name_length = rule.max_len(),
            retention_secs = self.store.policy().retention().as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting directory scanner"
        );
        tokio::spawn(async move { self.run().await })
    }
}
