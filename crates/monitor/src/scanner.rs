use crate::digest::DigestAlgo;
use crate::error::{ErrorKind, Result};
use crate::filter::{FileFilter, RegularFiles};
use crate::store::{FileItemStore, Seen, Stability};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, warn};

/// A file accepted by the filter during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub path: PathBuf,
    pub modified: OffsetDateTime,
    pub size: u64,
}

/// What the monitor should do with a discovered file this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First sighting, or its mtime moved: recorded, nothing to dispatch.
    Changed,
    /// Claimed by a running command.
    InFlight,
    /// Same mtime but different content than last time.
    HashChanged,
    /// Already handled and unchanged.
    Skipped,
    /// Stable and due for dispatch.
    Ready,
    /// Its content could not be hashed; marked as in error.
    Failed,
}

impl Verdict {
    /// Whether the store now differs from the last checkpoint.
    #[must_use]
    pub fn changes_state(self) -> bool {
        !matches!(self, Verdict::InFlight | Verdict::Skipped)
    }
}

enum WalkEntry {
    File(Discovered),
    Descend(PathBuf),
    Skip,
}

#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    filter: Arc<dyn FileFilter>,
    recursive: bool,
    digest: DigestAlgo,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self::new(Arc::new(RegularFiles), false, DigestAlgo::default())
    }
}

impl DirectoryScanner {
    pub fn new(filter: Arc<dyn FileFilter>, recursive: bool, digest: DigestAlgo) -> Self {
        Self { filter, recursive, digest }
    }

    #[must_use]
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    #[must_use]
    pub fn digest(&self) -> DigestAlgo {
        self.digest
    }

    async fn process_entry(&self, path: PathBuf) -> Result<WalkEntry> {
        // Follows symlinks, unlike `DirEntry::metadata`.
        let metadata = fs::metadata(&path).await.or_raise(|| ErrorKind::Io)?;
        if metadata.is_dir() {
            return Ok(if self.recursive { WalkEntry::Descend(path) } else { WalkEntry::Skip });
        }
        if !self.filter.accept(&path, &metadata) {
            return Ok(WalkEntry::Skip);
        }
        let modified = metadata.modified().or_raise(|| ErrorKind::Io)?;
        Ok(WalkEntry::File(Discovered { path, modified: OffsetDateTime::from(modified), size: metadata.len() }))
    }

    async fn list(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir).await.or_raise(|| ErrorKind::Listing(dir.to_path_buf()))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Listing(dir.to_path_buf()))? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    /// Walk `directories` depth-first: the accepted files of a directory
    /// come before anything in its subdirectories (which are only entered
    /// when recursive).
    ///
    /// A directory that cannot be listed yields one error and is skipped. A
    /// file whose metadata cannot be read yields one error; its siblings are
    /// still walked.
    pub fn walk<'a>(&'a self, directories: &'a [PathBuf]) -> impl Stream<Item = Result<Discovered>> + Send + 'a {
        let mut stack: Vec<PathBuf> = directories.iter().rev().cloned().collect();
        stream! {
            while let Some(current) = stack.pop() {
                debug!(directory = %current.display(), "Scanning directory");
                let paths = match Self::list(&current).await {
                    Ok(paths) => paths,
                    Err(err) => {
                        warn!(directory = %current.display(), error = ?err, "Could not list directory");
                        yield Err(err);
                        continue;
                    },
                };
                let mut subdirs = Vec::new();
                for path in paths {
                    match self.process_entry(path.clone()).await {
                        Ok(WalkEntry::File(file)) => yield Ok(file),
                        Ok(WalkEntry::Descend(dir)) => subdirs.push(dir),
                        Ok(WalkEntry::Skip) => {},
                        Err(err) => {
                            // Usually a file deleted between listing and stat.
                            warn!(path = %path.display(), error = ?err, "Could not read file metadata");
                            yield Err(err);
                        },
                    }
                }
                stack.extend(subdirs.into_iter().rev());
            }
        }
    }

    /// Record a sighting of `file` and decide what to do with it.
    ///
    /// Files are hashed only once their mtime has held still across two
    /// scans, so a file that is still being written is never read.
    pub async fn classify(&self, store: &FileItemStore, file: &Discovered) -> Verdict {
        match store.upsert_seen(&file.path, file.modified) {
            Seen::New | Seen::TimeChanged => Verdict::Changed,
            Seen::InFlight => Verdict::InFlight,
            Seen::Unchanged => match self.digest.hash_file(&file.path).await {
                Ok(hash) => match store.confirm_stable(&file.path, hash) {
                    Some(Stability::Confirmed) => Verdict::Ready,
                    Some(Stability::HashChanged) => Verdict::HashChanged,
                    Some(Stability::AlreadyDone) => Verdict::Skipped,
                    // Pruned while we were hashing.
                    None => Verdict::Changed,
                },
                Err(err) => {
                    warn!(path = %file.path.display(), error = ?err, "Could not hash file");
                    store.mark_error(&file.path);
                    Verdict::Failed
                },
            },
        }
    }
}
