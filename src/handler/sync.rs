//! Sync handler — mirrors an object source into the download directory
//! and tells the executor to reload when the mirror changes.
//!
//! Each pass:
//! 1. list the source
//! 2. fetch objects whose fingerprint differs from the manifest
//! 3. delete local copies of objects that disappeared
//! 4. POST `/reload` if anything changed (retried on later passes
//!    until the executor accepts it)
//!
//! A failed fetch leaves the manifest untouched for that key, so it is
//! picked up again next pass. Listing and local write failures abort
//! the pass.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ExecutorClient, ObjectSource, RemoteObject, ResourceHandler};

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub listed: usize,
    pub fetched: usize,
    pub removed: usize,
    pub failed: usize,
    pub rejected: usize,
    pub reloaded: bool,
}

pub struct SyncHandler<S> {
    source: S,
    executor: ExecutorClient,
    download_dir: PathBuf,
    /// key → fingerprint of what is currently on disk.
    manifest: HashMap<String, String>,
    pending_changed: BTreeSet<String>,
    pending_removed: BTreeSet<String>,
}

impl<S: ObjectSource> SyncHandler<S> {
    pub fn new(source: S, executor: ExecutorClient, download_dir: PathBuf) -> Self {
        Self {
            source,
            executor,
            download_dir,
            manifest: HashMap::new(),
            pending_changed: BTreeSet::new(),
            pending_removed: BTreeSet::new(),
        }
    }

    /// One full pass; `poll` is this plus logging.
    pub async fn sync_once(&mut self) -> Result<SyncReport> {
        let objects = self
            .source
            .list()
            .await
            .with_context(|| format!("Failed to list {} source", self.source.backend()))?;

        let mut report = SyncReport { listed: objects.len(), ..Default::default() };
        let mut seen: HashSet<&str> = HashSet::with_capacity(objects.len());

        for object in &objects {
            let Some(rel) = safe_relative_path(&object.key) else {
                warn!(key = %object.key, "Refusing object key outside the download directory");
                report.rejected += 1;
                continue;
            };
            seen.insert(object.key.as_str());

            if self.manifest.get(&object.key) == Some(&object.fingerprint) {
                continue;
            }
            if let Some(blocker) = layout_conflict(&self.download_dir, &rel).await {
                warn!(
                    key = %object.key,
                    blocker = %blocker.display(),
                    "Skipping object that clashes with another file or directory"
                );
                report.rejected += 1;
                continue;
            }

            match self.fetch_into(object, &rel).await {
                Ok(()) => {
                    debug!(key = %object.key, size = object.size, "Fetched object");
                    self.manifest.insert(object.key.clone(), object.fingerprint.clone());
                    self.pending_removed.remove(&object.key);
                    self.pending_changed.insert(object.key.clone());
                    report.fetched += 1;
                }
                Err(e) if e.is::<LocalWriteError>() => return Err(e),
                Err(e) => {
                    warn!(key = %object.key, "Fetch failed, will retry next pass: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        let gone: Vec<String> = self
            .manifest
            .keys()
            .filter(|k| !seen.contains(k.as_str()))
            .cloned()
            .collect();
        for key in gone {
            if let Some(rel) = safe_relative_path(&key) {
                remove_if_present(&self.download_dir.join(rel)).await?;
            }
            self.manifest.remove(&key);
            self.pending_changed.remove(&key);
            self.pending_removed.insert(key);
            report.removed += 1;
        }

        if !self.pending_changed.is_empty() || !self.pending_removed.is_empty() {
            let changed: Vec<String> = self.pending_changed.iter().cloned().collect();
            let removed: Vec<String> = self.pending_removed.iter().cloned().collect();
            match self.executor.notify_reload(&changed, &removed).await {
                Ok(()) => {
                    self.pending_changed.clear();
                    self.pending_removed.clear();
                    report.reloaded = true;
                }
                Err(e) => {
                    warn!(
                        changed = changed.len(),
                        removed = removed.len(),
                        "Executor reload failed, will retry next pass: {:#}",
                        e
                    );
                }
            }
        }

        Ok(report)
    }

    async fn fetch_into(&self, object: &RemoteObject, rel: &Path) -> Result<()> {
        let bytes = self.source.fetch(object).await?;
        let dest = self.download_dir.join(rel);
        write_atomic(&dest, &bytes)
            .await
            .map_err(|e| anyhow::Error::new(LocalWriteError { path: dest, source: e }))
    }
}

#[async_trait]
impl<S: ObjectSource> ResourceHandler for SyncHandler<S> {
    fn backend(&self) -> &str {
        self.source.backend()
    }

    async fn check_health(&self, verbose: bool) -> bool {
        self.executor.is_healthy(verbose).await
    }

    async fn poll(&mut self) -> Result<()> {
        let sync_id = Uuid::new_v4();
        let started = Instant::now();
        let report = self.sync_once().await?;

        if report.fetched + report.removed + report.failed > 0 {
            info!(
                sync_id = %sync_id,
                listed = report.listed,
                fetched = report.fetched,
                removed = report.removed,
                failed = report.failed,
                rejected = report.rejected,
                reloaded = report.reloaded,
                duration_ms = started.elapsed().as_millis() as u64,
                "🔄 Sync pass complete"
            );
        } else {
            debug!(sync_id = %sync_id, listed = report.listed, "Sync pass: no changes");
        }
        Ok(())
    }
}

// ── Local Filesystem Helpers ────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("Failed to write {}", .path.display())]
struct LocalWriteError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

/// Map an object key to a relative path, rejecting anything that could
/// escape the download directory. Keys with empty segments are refused
/// too, so two distinct keys never share a local file.
pub fn safe_relative_path(key: &str) -> Option<PathBuf> {
    if key.is_empty() || key.contains('\\') {
        return None;
    }
    let mut out = PathBuf::new();
    for segment in key.split('/') {
        match Path::new(segment).components().next() {
            Some(Component::Normal(c)) if c == segment => out.push(c),
            _ => return None,
        }
    }
    Some(out)
}

/// First existing path that stops `rel` being written as a regular file
/// under `root`: a non-directory ancestor, or a directory at `rel` itself.
async fn layout_conflict(root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    let mut parts = rel.components().peekable();
    while let Some(part) = parts.next() {
        current.push(part);
        let Ok(meta) = tokio::fs::symlink_metadata(&current).await else {
            return None;
        };
        let last = parts.peek().is_none();
        if (last && meta.is_dir()) || (!last && !meta.is_dir()) {
            return Some(current);
        }
    }
    None
}

/// Write via a sibling temp file + rename so readers never see a
/// partial file.
async fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{}.{}.partial", file_name, Uuid::new_v4().simple()));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
