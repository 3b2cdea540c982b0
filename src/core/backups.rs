//! Backup lifecycle: creation, listing, retention cleanup.
//!
//! A backup is a sibling copy named
//! `<original>.backup.<YYYYMMDD_HHMMSS_mmm>` (UTC). Timestamps are monotonic
//! within the process: when two backups would collide the millisecond
//! suffix is bumped. Retention is judged by the timestamp embedded in the
//! name, not the file's mtime, and cleanup never touches anything that does
//! not match the backup grammar.
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::Regex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::{
    error::{OpError, OpResult, ensure_live},
    file_ops::FileOps,
    requests::BackupInfo,
};

/// Marker separating the original name from the timestamp.
pub const BACKUP_MARKER: &str = ".backup.";

const TS_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Creates, lists and expires backup copies of configuration files.
pub struct BackupManager {
    file_ops: Arc<FileOps>,
    retention_days: u32,
    // Last stamp handed out, for process-wide monotonic backup names.
    last_stamp: Mutex<Option<String>>,
}

impl BackupManager {
    pub fn new(file_ops: Arc<FileOps>, retention_days: u32) -> Self {
        Self {
            file_ops,
            retention_days,
            last_stamp: Mutex::new(None),
        }
    }

    /// Copy the current bytes of `name` into a fresh timestamped sibling and
    /// return the backup's filename. The caller must already hold the path
    /// lock for `name` (mutating operations run under it for their whole
    /// span).
    pub async fn create_backup_unlocked(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> OpResult<String> {
        ensure_live(cancel)?;

        let source = self.file_ops.resolve(name)?;
        let content = self
            .file_ops
            .read_text_unlocked(&source, u64::MAX, cancel)
            .await?;

        let backup_name = self.next_backup_name(name, cancel).await?;
        let backup_path = self.file_ops.resolve(&backup_name)?;
        self.file_ops
            .write_atomic(&backup_path, &content, cancel)
            .await?;

        tracing::info!(original = name, backup = %backup_name, "created backup");
        Ok(backup_name)
    }

    /// Convenience wrapper that acquires the source path lock itself.
    pub async fn create_backup(&self, name: &str, cancel: &CancellationToken) -> OpResult<String> {
        ensure_live(cancel)?;
        let source = self.file_ops.resolve(name)?;
        let lock = self.file_ops.lock_for(&source).await;
        let _guard = lock.lock().await;
        self.create_backup_unlocked(name, cancel).await
    }

    /// Pick the next free timestamped name, bumping the millisecond suffix
    /// past both the last stamp issued by this process and any file already
    /// on disk.
    async fn next_backup_name(&self, name: &str, cancel: &CancellationToken) -> OpResult<String> {
        let mut last = self.last_stamp.lock().await;

        let mut ts = Utc::now();
        let mut stamp = ts.format(TS_FORMAT).to_string();
        if let Some(prev) = last.as_deref() {
            // Fixed-width stamps compare correctly as strings.
            while stamp.as_str() <= prev {
                ts += Duration::milliseconds(1);
                stamp = ts.format(TS_FORMAT).to_string();
            }
        }

        loop {
            ensure_live(cancel)?;
            let candidate = format!("{name}{BACKUP_MARKER}{stamp}");
            let path = self.file_ops.resolve(&candidate)?;
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| OpError::io("checking backup existence", e))?;
            if !exists {
                *last = Some(stamp);
                return Ok(candidate);
            }
            ts += Duration::milliseconds(1);
            stamp = ts.format(TS_FORMAT).to_string();
        }
    }

    /// List every file whose name carries the backup marker, newest first.
    pub async fn list(&self, cancel: &CancellationToken) -> OpResult<Vec<BackupInfo>> {
        ensure_live(cancel)?;

        let mut backups: Vec<BackupInfo> = Vec::new();
        for (name, meta) in self.file_ops.list_dir(cancel).await? {
            let Some((original, _)) = name.split_once(BACKUP_MARKER) else {
                continue;
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            backups.push(BackupInfo {
                original: original.to_string(),
                timestamp: embedded_timestamp(&name),
                size_bytes: meta.len(),
                modified,
                name,
            });
        }

        // Embedded timestamp wins; files with an unparseable suffix sort
        // after the well-formed ones, by mtime.
        backups.sort_by(|a, b| match (&b.timestamp, &a.timestamp) {
            (Some(tb), Some(ta)) => tb.cmp(ta),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => b.modified.cmp(&a.modified),
        });

        Ok(backups)
    }

    /// Delete backups whose embedded timestamp is older than the retention
    /// window. Returns the number deleted. Files that do not match the full
    /// backup grammar are never touched.
    pub async fn cleanup(
        &self,
        retention_days: Option<u32>,
        cancel: &CancellationToken,
    ) -> OpResult<usize> {
        ensure_live(cancel)?;

        let days = retention_days.unwrap_or(self.retention_days);
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        tracing::info!(days, "cleaning up backups");

        let mut removed = 0usize;
        for (name, _meta) in self.file_ops.list_dir(cancel).await? {
            ensure_live(cancel)?;
            let Some(ts) = embedded_timestamp(&name) else {
                continue;
            };
            if ts >= cutoff {
                continue;
            }

            let path = self.file_ops.resolve(&name)?;
            match self.file_ops.remove(&path, cancel).await {
                Ok(()) => removed += 1,
                // A concurrent cleanup may have won the race; nothing to do.
                Err(OpError::NotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }

        tracing::info!(removed, "backup cleanup finished");
        Ok(removed)
    }
}

/// Parse the timestamp out of a full-grammar backup name.
fn embedded_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let grammar = Regex::new(r"^.+\.backup\.(\d{8}_\d{6}_\d{3})$").expect("invalid backup regex");
    let stamp = grammar.captures(name)?.get(1)?.as_str();
    NaiveDateTime::parse_from_str(stamp, TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn setup(dir: &TempDir) -> (Arc<FileOps>, BackupManager) {
        let file_ops = Arc::new(FileOps::new(dir.path()).await.unwrap());
        let manager = BackupManager::new(file_ops.clone(), 30);
        (file_ops, manager)
    }

    #[tokio::test]
    async fn backup_preserves_bytes_and_original_name() {
        let dir = TempDir::new().unwrap();
        let (file_ops, manager) = setup(&dir).await;
        let cancel = CancellationToken::new();

        let path = file_ops.resolve("plex.subdomain.conf").unwrap();
        file_ops
            .write_atomic(&path, "server { listen 443; }\n", &cancel)
            .await
            .unwrap();

        let backup = manager
            .create_backup("plex.subdomain.conf", &cancel)
            .await
            .unwrap();
        assert!(backup.starts_with("plex.subdomain.conf.backup."));

        let backup_path = file_ops.resolve(&backup).unwrap();
        let copied = file_ops
            .read_text(&backup_path, 1024, &cancel)
            .await
            .unwrap();
        assert_eq!(copied, "server { listen 443; }\n");

        let listed = manager.list(&cancel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original, "plex.subdomain.conf");
        assert!(listed[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn consecutive_backups_get_distinct_names() {
        let dir = TempDir::new().unwrap();
        let (file_ops, manager) = setup(&dir).await;
        let cancel = CancellationToken::new();

        let path = file_ops.resolve("app.subdomain.conf").unwrap();
        file_ops.write_atomic(&path, "v1", &cancel).await.unwrap();

        let first = manager
            .create_backup("app.subdomain.conf", &cancel)
            .await
            .unwrap();
        file_ops.write_atomic(&path, "v2", &cancel).await.unwrap();
        let second = manager
            .create_backup("app.subdomain.conf", &cancel)
            .await
            .unwrap();

        assert_ne!(first, second);
        // Names are monotonic, so newest-first listing puts `second` first.
        let listed = manager.list(&cancel).await.unwrap();
        assert_eq!(listed[0].name, second);
        assert_eq!(listed[1].name, first);
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_file_ops, manager) = setup(&dir).await;
        let cancel = CancellationToken::new();

        assert!(matches!(
            manager.create_backup("ghost.subdomain.conf", &cancel).await,
            Err(OpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_grammar_matches() {
        let dir = TempDir::new().unwrap();
        let (file_ops, manager) = setup(&dir).await;
        let cancel = CancellationToken::new();

        let old_stamp = (Utc::now() - Duration::days(45)).format(TS_FORMAT);
        let fresh_stamp = Utc::now().format(TS_FORMAT);

        for name in [
            format!("old.subdomain.conf.backup.{old_stamp}"),
            format!("fresh.subdomain.conf.backup.{fresh_stamp}"),
            // Marker present but suffix off-grammar: must survive.
            "odd.subdomain.conf.backup.notatimestamp".to_string(),
            // Not a backup at all: must survive.
            "plain.subdomain.conf".to_string(),
        ] {
            let path = file_ops.resolve(&name).unwrap();
            file_ops.write_atomic(&path, "x", &cancel).await.unwrap();
        }

        let removed = manager.cleanup(Some(30), &cancel).await.unwrap();
        assert_eq!(removed, 1);

        let names: Vec<String> = file_ops
            .list_dir(&cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(!names.iter().any(|n| n.starts_with("old.subdomain.conf.backup.")));
        assert!(names.iter().any(|n| n.starts_with("fresh.subdomain.conf.backup.")));
        assert!(names.contains(&"odd.subdomain.conf.backup.notatimestamp".to_string()));
        assert!(names.contains(&"plain.subdomain.conf".to_string()));
    }

    #[test]
    fn timestamp_parsing_follows_the_grammar() {
        assert!(embedded_timestamp("a.subdomain.conf.backup.20260801_101530_123").is_some());
        assert!(embedded_timestamp("a.subdomain.conf.backup.2026-08-01").is_none());
        assert!(embedded_timestamp("a.subdomain.conf").is_none());
    }
}
