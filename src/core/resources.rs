//! Directory enumeration: active configurations and samples.
//!
//! Nothing here mutates. Listings are deterministic (case-insensitive
//! lexical order) so callers can diff successive results.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::{
    error::{OpResult, ensure_live},
    file_ops::FileOps,
    requests::{FileDescriptor, FileKind},
};

use super::backups::BACKUP_MARKER;

/// Classify a filename in the managed directory.
pub fn classify(name: &str) -> FileKind {
    if name.contains(BACKUP_MARKER) {
        return FileKind::Backup;
    }
    if name.ends_with(".sample") {
        return FileKind::Sample;
    }
    let active = Regex::new(r"^[A-Za-z0-9_-]+\.(subdomain|subfolder)\.conf$")
        .expect("invalid active config regex");
    if active.is_match(name) {
        FileKind::Active
    } else {
        FileKind::Other
    }
}

/// Read-only views over the managed directory.
pub struct ResourceManager {
    file_ops: Arc<FileOps>,
}

impl ResourceManager {
    pub fn new(file_ops: Arc<FileOps>) -> Self {
        Self { file_ops }
    }

    /// Active configuration files, sorted.
    pub async fn list_active(&self, cancel: &CancellationToken) -> OpResult<Vec<FileDescriptor>> {
        self.list_kind(FileKind::Active, cancel).await
    }

    /// Sample files, sorted.
    pub async fn list_samples(&self, cancel: &CancellationToken) -> OpResult<Vec<FileDescriptor>> {
        self.list_kind(FileKind::Sample, cancel).await
    }

    /// Samples belonging to one service, checking both base types.
    pub async fn samples_for(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<FileDescriptor>> {
        let wanted = [
            format!("{service}.subdomain.conf.sample"),
            format!("{service}.subfolder.conf.sample"),
        ];
        let mut samples = self.list_samples(cancel).await?;
        samples.retain(|descriptor| wanted.contains(&descriptor.name));
        Ok(samples)
    }

    async fn list_kind(
        &self,
        kind: FileKind,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<FileDescriptor>> {
        ensure_live(cancel)?;

        let mut out: Vec<FileDescriptor> = Vec::new();
        for (name, meta) in self.file_ops.list_dir(cancel).await? {
            if classify(&name) != kind {
                continue;
            }
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(FileDescriptor {
                name,
                size_bytes: meta.len(),
                modified,
                kind,
            });
        }

        out.sort_by(|a, b| {
            a.name
                .to_ascii_lowercase()
                .cmp(&b.name.to_ascii_lowercase())
        });
        Ok(out)
    }
}
