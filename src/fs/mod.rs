// src/fs/mod.rs

//! JSON record files on disk.
//!
//! Every record lives in its own file and is replaced with a temp-file rename,
//! so a concurrent reader sees either the old or the new record, never a
//! partial write. Read-modify-write sequences that several processes may
//! run against the same directory go through a [`LockFile`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Run blocking file I/O. On a multi-threaded tokio runtime the worker thread
/// hands its other tasks off first; elsewhere `f` simply runs inline.
pub fn blocking_io<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Advisory exclusive lock on a file, shared by every process that opens the
/// same path.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    lock: RwLock<File>,
}

impl LockFile {
    /// Open (creating if needed) the lock file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening lock file {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            lock: RwLock::new(file),
        })
    }

    /// Block until the lock is ours. Released when the guard drops.
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        let path = &self.path;
        let lock = &mut self.lock;
        blocking_io(move || lock.write()).with_context(|| format!("locking {:?}", path))
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    blocking_io(|| write_atomic(path, value))
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("record path {:?} has no parent directory", path))?;
    fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;

    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing record for {:?}", path))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {:?}", parent))?;
    tmp.write_all(&bytes)
        .with_context(|| format!("writing temp file for {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {:?}", path))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temp file onto {:?}", path))?;
    Ok(())
}

/// Read a JSON record. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading file {:?}", path)),
    };
    let value =
        serde_json::from_str(&contents).with_context(|| format!("parsing JSON in {:?}", path))?;
    Ok(Some(value))
}

/// Remove a record. Returns whether a file was removed.
pub fn remove_record(path: &Path) -> Result<bool> {
    match blocking_io(|| fs::remove_file(path)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("removing file {:?}", path)),
    }
}

/// Paths of every `*.json` file directly under `dir`, sorted. A missing
/// directory yields an empty list.
pub fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading dir {:?}", dir)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("reading entry in {:?}", dir))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Whether `dir` exists (creating it if needed) and accepts writes.
pub fn probe_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    NamedTempFile::new_in(dir).is_ok()
}
