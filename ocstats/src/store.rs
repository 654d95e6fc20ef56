//! Snapshot storage
//!
//! One exposition document per period. [`DirectoryStore`] keeps them as
//! `oc-YYYY-MM.prom` files in a flat directory, the layout the rest of the
//! OpenCitations tooling reads. [`MemoryStore`] keeps them in process.
//!
//! Writers are not coordinated: compiling the same period twice at once is
//! the caller's problem.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::period::Period;

#[derive(thiserror::Error, Debug)]
/// Errors produced by a [`SnapshotStore`]
pub enum Error {
    /// `put` found a snapshot already present
    #[error("a snapshot for {0} already exists")]
    AlreadyExists(Period),
    /// The backing storage failed
    #[error("snapshot storage at {path} failed: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

/// A catalog of per-period snapshots
pub trait SnapshotStore: Send + Sync {
    /// Store the snapshot of `period`, refusing to overwrite one
    ///
    /// # Errors
    ///
    /// Function will error if a snapshot is present for `period` or the
    /// backing storage fails.
    fn put(&self, period: Period, text: &str) -> Result<(), Error>;

    /// Store the snapshot of `period`, overwriting any present
    ///
    /// # Errors
    ///
    /// Function will error if the backing storage fails.
    fn replace(&self, period: Period, text: &str) -> Result<(), Error>;

    /// The snapshot of `period`, `None` when absent or unreadable
    ///
    /// # Errors
    ///
    /// Function will error if the backing storage fails.
    fn get(&self, period: Period) -> Result<Option<String>, Error>;

    /// Periods present, oldest first
    ///
    /// # Errors
    ///
    /// Function will error if the backing storage cannot be listed.
    fn list(&self) -> Result<Vec<Period>, Error>;

    /// The most recent period present
    ///
    /// # Errors
    ///
    /// Function will error if the backing storage cannot be listed.
    fn latest(&self) -> Result<Option<Period>, Error> {
        Ok(self.list()?.into_iter().max())
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Arc<S> {
    fn put(&self, period: Period, text: &str) -> Result<(), Error> {
        (**self).put(period, text)
    }

    fn replace(&self, period: Period, text: &str) -> Result<(), Error> {
        (**self).replace(period, text)
    }

    fn get(&self, period: Period) -> Result<Option<String>, Error> {
        (**self).get(period)
    }

    fn list(&self) -> Result<Vec<Period>, Error> {
        (**self).list()
    }

    fn latest(&self) -> Result<Option<Period>, Error> {
        (**self).latest()
    }
}

#[derive(Debug, Clone)]
/// Snapshots as files in a flat directory
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create a store over `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the snapshots
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the snapshot of `period` lives
    #[must_use]
    pub fn path_of(&self, period: Period) -> PathBuf {
        self.root.join(period.snapshot_file_name())
    }

    fn write(&self, period: Period, text: &str, overwrite: bool) -> Result<(), Error> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| Error::Io { path, source }
        };
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;

        let target = self.path_of(period);
        if !overwrite && target.exists() {
            return Err(Error::AlreadyExists(period));
        }

        // Readers never observe a partially written snapshot.
        let staging = self.root.join(format!(".{}.tmp", period.snapshot_file_name()));
        fs::write(&staging, text).map_err(io_err(&staging))?;
        fs::rename(&staging, &target).map_err(io_err(&target))?;
        debug!(path = %target.display(), "snapshot written");
        Ok(())
    }
}

impl SnapshotStore for DirectoryStore {
    fn put(&self, period: Period, text: &str) -> Result<(), Error> {
        self.write(period, text, false)
    }

    fn replace(&self, period: Period, text: &str) -> Result<(), Error> {
        self.write(period, text, true)
    }

    fn get(&self, period: Period) -> Result<Option<String>, Error> {
        let path = self.path_of(period);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                warn!(path = %path.display(), "snapshot present but unreadable: {err}");
                Ok(None)
            }
        }
    }

    fn list(&self) -> Result<Vec<Period>, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut periods = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: self.root.clone(),
                source,
            })?;
            let Some(period) = entry
                .file_name()
                .to_str()
                .and_then(Period::from_snapshot_file_name)
            else {
                continue;
            };
            if entry.path().is_file() {
                periods.push(period);
            }
        }
        periods.sort_unstable();
        Ok(periods)
    }
}

#[derive(Debug, Default)]
/// Snapshots held in memory
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<Period, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshots(&self) -> std::sync::MutexGuard<'_, BTreeMap<Period, String>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&self, period: Period, text: &str) -> Result<(), Error> {
        let mut snapshots = self.snapshots();
        if snapshots.contains_key(&period) {
            return Err(Error::AlreadyExists(period));
        }
        snapshots.insert(period, text.to_string());
        Ok(())
    }

    fn replace(&self, period: Period, text: &str) -> Result<(), Error> {
        self.snapshots().insert(period, text.to_string());
        Ok(())
    }

    fn get(&self, period: Period) -> Result<Option<String>, Error> {
        Ok(self.snapshots().get(&period).cloned())
    }

    fn list(&self) -> Result<Vec<Period>, Error> {
        Ok(self.snapshots().keys().copied().collect())
    }
}
