//! Persisted monitor state and the liveness marker next to it.

use crate::error::{ErrorKind, Result};
use crate::item::{FileItem, ItemStatus};
use crate::state::CounterSnapshot;
use drover_asyncutils::{Backoff, CancellationToken, RetryError, retry};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub name: String,
    pub counters: CounterSnapshot,
    pub items: Vec<FileItem>,
}

impl Checkpoint {
    pub fn new(name: impl Into<String>, counters: CounterSnapshot, items: Vec<FileItem>) -> Self {
        Self { version: CHECKPOINT_VERSION, name: name.into(), counters, items }
    }

    /// Read a checkpoint. A missing file is not an error.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Checkpoint),
        };
        serde_json::from_slice(&bytes).map(Some).or_raise(|| ErrorKind::Checkpoint)
    }

    /// Write the checkpoint atomically: readers see the old file or the new
    /// one, never a partial write.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).or_raise(|| ErrorKind::Checkpoint)?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .or_raise(|| ErrorKind::Checkpoint)?
    }

    /// Number of items in each status.
    pub fn status_counts(&self) -> BTreeMap<ItemStatus, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        counts
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Checkpoint)?;
    let mut file = tempfile::NamedTempFile::new_in(parent).or_raise(|| ErrorKind::Checkpoint)?;
    file.write_all(bytes).or_raise(|| ErrorKind::Checkpoint)?;
    file.as_file().sync_all().or_raise(|| ErrorKind::Checkpoint)?;
    file.persist(path).or_raise(|| ErrorKind::Checkpoint)?;
    Ok(())
}

/// `<status_file>.chk`: recreated by a running monitor every cycle.
#[derive(Debug, Clone)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn for_status_file(status_file: &Path) -> Self {
        let mut name = OsString::from(status_file.as_os_str());
        name.push(".chk");
        Self { path: PathBuf::from(name) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn touch(&self) -> Result<()> {
        fs::OpenOptions::new().create(true).append(true).open(&self.path).await.or_raise(|| ErrorKind::Io)?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err).or_raise(|| ErrorKind::Io),
            _ => Ok(()),
        }
    }

    /// Make sure no other monitor is using the same checkpoint.
    ///
    /// A leftover marker is either stale (a previous run crashed) or
    /// belongs to a live monitor. Delete it and watch, following `probe`,
    /// whether something recreates it.
    pub async fn ensure_single_instance(&self, probe: &Backoff, cancel: &CancellationToken) -> Result<()> {
        if !self.exists().await {
            return Ok(());
        }
        self.remove().await?;
        warn!(
            marker = %self.path.display(),
            wait_ms = probe.total_delay().as_millis() as u64,
            "Checking whether another monitor uses the same checkpoint"
        );
        let recreated = retry(probe, cancel, |_| async {
            if self.exists().await { Ok(()) } else { Err(()) }
        })
        .await;
        match recreated {
            Ok(()) => exn::bail!(ErrorKind::AlreadyRunning(self.path.clone())),
            Err(RetryError::Exhausted(())) => {
                debug!(marker = %self.path.display(), "Marker was stale");
                Ok(())
            },
            Err(RetryError::Cancelled) => exn::bail!(ErrorKind::Stopped),
        }
    }
}
