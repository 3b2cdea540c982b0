//! Low-level file I/O: per-path locking, atomic writes, transactions.
//!
//! This module is the single source of truth for on-disk mutation. Every
//! write goes through the same-directory temp file + fsync + rename dance,
//! and every path is serialized by a lazily created per-path lock held in an
//! `scc::HashMap` keyed by the resolved path. Two distinct paths proceed in
//! parallel; two operations on the same path are totally ordered.
//!
//! `ENOSPC` propagates unchanged and is never retried.
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use scc::HashMap;
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, OwnedMutexGuard},
};
use tokio_util::sync::CancellationToken;

use crate::core::{
    error::{OpError, OpResult, ensure_live},
    validate,
};

/// Sequence number folded into temp file names so concurrent writers in one
/// process never collide.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Owner of the managed directory and its lock table.
pub struct FileOps {
    root: PathBuf,
    locks: HashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileOps {
    /// Open (creating if necessary) the managed directory.
    pub async fn new(root: impl Into<PathBuf>) -> OpResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| OpError::io("creating configuration directory", e))?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| OpError::io("resolving configuration directory", e))?;

        tracing::debug!(root = %root.display(), "file operations initialized");

        Ok(Self {
            root,
            locks: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a filename under the managed directory, refusing anything
    /// that would escape it.
    pub fn resolve(&self, name: &str) -> OpResult<PathBuf> {
        validate::validate_file_path_safety(name)?;

        let joined = self.root.join(name);
        let parent = joined.parent().unwrap_or(&self.root);
        // The directory is flat, so the parent must exist; canonicalizing it
        // defeats symlink tricks a raw string check would miss.
        let canonical_parent = std::fs::canonicalize(parent)
            .map_err(|e| OpError::io("resolving target directory", e))?;
        if !canonical_parent.starts_with(&self.root) {
            return Err(OpError::invalid(
                "path",
                format!("'{name}' escapes the configuration directory"),
            ));
        }

        let file_name = joined
            .file_name()
            .ok_or_else(|| OpError::invalid("path", format!("'{name}' has no filename")))?;
        Ok(canonical_parent.join(file_name))
    }

    /// Fetch (lazily creating) the lock for a resolved path.
    pub async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = path.to_path_buf();
        if let Some(existing) = self.locks.read_async(&key, |_, lock| lock.clone()).await {
            return existing;
        }
        self.locks
            .entry_async(key)
            .await
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .get()
            .clone()
    }

    /// Drop the lock table. Called once at teardown; any lock still held by
    /// an in-flight operation stays alive through its own `Arc`.
    pub fn clear_locks(&self) {
        self.locks.clear();
    }

    /// Read a UTF-8 text file under its path lock.
    pub async fn read_text(
        &self,
        path: &Path,
        max_bytes: u64,
        cancel: &CancellationToken,
    ) -> OpResult<String> {
        ensure_live(cancel)?;
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;
        self.read_text_unlocked(path, max_bytes, cancel).await
    }

    /// Read variant for callers that already hold the path lock.
    pub async fn read_text_unlocked(
        &self,
        path: &Path,
        max_bytes: u64,
        cancel: &CancellationToken,
    ) -> OpResult<String> {
        ensure_live(cancel)?;

        let meta = fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpError::NotFound(display_name(path))
            } else {
                OpError::io("reading file metadata", e)
            }
        })?;
        if meta.len() > max_bytes {
            return Err(OpError::invalid(
                "file",
                format!(
                    "{} is {} bytes, above the {max_bytes} byte read limit",
                    display_name(path),
                    meta.len()
                ),
            ));
        }

        let bytes = fs::read(path)
            .await
            .map_err(|e| OpError::io("reading file", e))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            OpError::MalformedConfig(format!("{} is not valid UTF-8 text", display_name(path)))
        })?;
        if text.contains('\0') {
            return Err(OpError::MalformedConfig(format!(
                "{} contains binary content",
                display_name(path)
            )));
        }
        Ok(text)
    }

    /// Atomically replace `path` with `content` under its path lock.
    pub async fn write_atomic(
        &self,
        path: &Path,
        content: &str,
        cancel: &CancellationToken,
    ) -> OpResult<()> {
        ensure_live(cancel)?;
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;
        self.write_atomic_unlocked(path, content, cancel).await
    }

    /// Write variant for callers that already hold the path lock.
    ///
    /// Contract: temp file in the same directory, write + flush + fsync,
    /// rename over the target, fsync the parent directory. The temp file is
    /// unlinked on any failure before the rename.
    pub async fn write_atomic_unlocked(
        &self,
        path: &Path,
        content: &str,
        cancel: &CancellationToken,
    ) -> OpResult<()> {
        ensure_live(cancel)?;

        let parent = path
            .parent()
            .ok_or_else(|| OpError::invalid("path", "target has no parent directory"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| OpError::invalid("path", "target has no filename"))?;
        let tmp = parent.join(format!(
            ".{}.tmp.{}.{}",
            file_name.to_string_lossy(),
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let written = write_via_rename(&tmp, path, parent, content).await;
        if written.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        written
    }

    /// Delete a file under its path lock.
    pub async fn remove(&self, path: &Path, cancel: &CancellationToken) -> OpResult<()> {
        ensure_live(cancel)?;
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;
        self.remove_unlocked(path, cancel).await
    }

    /// Delete variant for callers that already hold the path lock.
    pub async fn remove_unlocked(&self, path: &Path, cancel: &CancellationToken) -> OpResult<()> {
        ensure_live(cancel)?;
        fs::remove_file(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpError::NotFound(display_name(path))
            } else {
                OpError::io("removing file", e)
            }
        })?;
        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }

    /// Enumerate regular files in the managed directory.
    pub async fn list_dir(
        &self,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<(String, std::fs::Metadata)>> {
        ensure_live(cancel)?;
        let mut reader = fs::read_dir(&self.root)
            .await
            .map_err(|e| OpError::io("listing configuration directory", e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| OpError::io("listing configuration directory", e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| OpError::io("reading directory entry", e))?;
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                entries.push((name.to_string(), meta));
            }
        }
        Ok(entries)
    }

    /// Begin a multi-file transaction.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            file_ops: self,
            ops: Vec::new(),
        }
    }
}

async fn write_via_rename(
    tmp: &Path,
    target: &Path,
    parent: &Path,
    content: &str,
) -> OpResult<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await
        .map_err(|e| OpError::io("creating temporary file", e))?;

    file.write_all(content.as_bytes())
        .await
        .map_err(|e| OpError::io("writing temporary file", e))?;
    file.flush()
        .await
        .map_err(|e| OpError::io("flushing temporary file", e))?;
    file.sync_all()
        .await
        .map_err(|e| OpError::io("syncing temporary file", e))?;
    drop(file);

    fs::rename(tmp, target)
        .await
        .map_err(|e| OpError::io("renaming temporary file into place", e))?;
    sync_dir(parent)
}

/// Fsync a directory so a just-committed rename survives a crash.
fn sync_dir(dir: &Path) -> OpResult<()> {
    let handle =
        std::fs::File::open(dir).map_err(|e| OpError::io("opening directory for sync", e))?;
    handle
        .sync_all()
        .map_err(|e| OpError::io("syncing directory", e))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One pending operation in a transaction.
enum TxOp {
    Create { path: PathBuf, content: String },
    Overwrite { path: PathBuf, content: String },
    Delete { path: PathBuf },
}

impl TxOp {
    fn path(&self) -> &Path {
        match self {
            TxOp::Create { path, .. } | TxOp::Overwrite { path, .. } | TxOp::Delete { path } => {
                path
            }
        }
    }
}

/// Applied-step journal entry used for rollback.
enum Applied {
    Created(PathBuf),
    Replaced { path: PathBuf, prior: Option<String> },
    Deleted { path: PathBuf, prior: String },
}

/// A grouped, rollback-capable multi-file write.
///
/// `commit` acquires all path locks in canonical sort order (so two
/// concurrent transactions over overlapping sets cannot deadlock), snapshots
/// existing contents, applies the operations, and restores the snapshots in
/// reverse order if any step fails.
pub struct Transaction<'a> {
    file_ops: &'a FileOps,
    ops: Vec<TxOp>,
}

impl Transaction<'_> {
    pub fn create(mut self, path: PathBuf, content: String) -> Self {
        self.ops.push(TxOp::Create { path, content });
        self
    }

    pub fn overwrite(mut self, path: PathBuf, content: String) -> Self {
        self.ops.push(TxOp::Overwrite { path, content });
        self
    }

    pub fn delete(mut self, path: PathBuf) -> Self {
        self.ops.push(TxOp::Delete { path });
        self
    }

    pub async fn commit(self, cancel: &CancellationToken) -> OpResult<()> {
        ensure_live(cancel)?;

        let mut sorted: Vec<PathBuf> = self.ops.iter().map(|op| op.path().to_path_buf()).collect();
        sorted.sort();
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(OpError::Conflict(
                "transaction touches the same path twice".to_string(),
            ));
        }

        // Deterministic lock order prevents deadlock between overlapping
        // transactions.
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(sorted.len());
        for path in &sorted {
            ensure_live(cancel)?;
            let lock = self.file_ops.lock_for(path).await;
            guards.push(lock.lock_owned().await);
        }

        let mut journal: Vec<Applied> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            if let Err(err) = self.apply(op, &mut journal, cancel).await {
                tracing::warn!(error = %err, "transaction step failed, rolling back");
                self.rollback(journal, cancel).await;
                return Err(err);
            }
        }

        Ok(())
    }

    async fn apply(
        &self,
        op: &TxOp,
        journal: &mut Vec<Applied>,
        cancel: &CancellationToken,
    ) -> OpResult<()> {
        ensure_live(cancel)?;
        match op {
            TxOp::Create { path, content } => {
                if fs::try_exists(path)
                    .await
                    .map_err(|e| OpError::io("checking target existence", e))?
                {
                    return Err(OpError::Conflict(format!(
                        "{} already exists",
                        display_name(path)
                    )));
                }
                self.file_ops
                    .write_atomic_unlocked(path, content, cancel)
                    .await?;
                journal.push(Applied::Created(path.clone()));
            }
            TxOp::Overwrite { path, content } => {
                let prior = match self
                    .file_ops
                    .read_text_unlocked(path, u64::MAX, cancel)
                    .await
                {
                    Ok(text) => Some(text),
                    Err(OpError::NotFound(_)) => None,
                    Err(other) => return Err(other),
                };
                self.file_ops
                    .write_atomic_unlocked(path, content, cancel)
                    .await?;
                journal.push(Applied::Replaced {
                    path: path.clone(),
                    prior,
                });
            }
            TxOp::Delete { path } => {
                let prior = self
                    .file_ops
                    .read_text_unlocked(path, u64::MAX, cancel)
                    .await?;
                self.file_ops.remove_unlocked(path, cancel).await?;
                journal.push(Applied::Deleted {
                    path: path.clone(),
                    prior,
                });
            }
        }
        Ok(())
    }

    /// Undo applied steps newest-first. Rollback is best effort and ignores
    /// the cancellation token: leaving the directory consistent outranks
    /// stopping early.
    async fn rollback(&self, journal: Vec<Applied>, _cancel: &CancellationToken) {
        let free = CancellationToken::new();
        for step in journal.into_iter().rev() {
            let result = match step {
                Applied::Created(path) => self.file_ops.remove_unlocked(&path, &free).await,
                Applied::Replaced { path, prior } => match prior {
                    Some(text) => {
                        self.file_ops
                            .write_atomic_unlocked(&path, &text, &free)
                            .await
                    }
                    None => self.file_ops.remove_unlocked(&path, &free).await,
                },
                Applied::Deleted { path, prior } => {
                    self.file_ops
                        .write_atomic_unlocked(&path, &prior, &free)
                        .await
                }
            };
            if let Err(err) = result {
                tracing::error!(error = %err, "rollback step failed");
            }
        }
    }
}
