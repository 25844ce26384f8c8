//! Local filesystem source — walks a directory tree.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use super::{ObjectSource, RemoteObject};

pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn walk(root: &Path) -> Result<Vec<RemoteObject>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut objects = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        if let Some(object) = entry_object(root, entry)? {
            objects.push(object);
        }
    }
    Ok(objects)
}

/// Turn one walk entry into an object. Only a failure on the root itself
/// is an error; entries that vanish or can't be read are skipped.
fn entry_object(root: &Path, entry: walkdir::Result<DirEntry>) -> Result<Option<RemoteObject>> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(e) if e.depth() == 0 => {
            return Err(e).with_context(|| format!("Failed to walk {}", root.display()));
        }
        Err(e) => {
            warn!("Skipping unreadable entry under {}: {}", root.display(), e);
            return Ok(None);
        }
    };
    if !entry.file_type().is_file() {
        return Ok(None);
    }

    let meta = match entry.metadata() {
        Ok(meta) => meta,
        Err(e) => {
            warn!(path = %entry.path().display(), "Skipping file that could not be read: {}", e);
            return Ok(None);
        }
    };

    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let (Some(rel), Some(location)) = (rel.to_str(), entry.path().to_str()) else {
        warn!(path = %entry.path().display(), "Skipping file with a non UTF-8 name");
        return Ok(None);
    };
    let key = rel
        .split(std::path::MAIN_SEPARATOR)
        .collect::<Vec<_>>()
        .join("/");

    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    Ok(Some(RemoteObject {
        key,
        location: location.to_string(),
        fingerprint: format!("{}-{}", meta.len(), mtime),
        size: meta.len(),
    }))
}

#[async_trait]
impl ObjectSource for LocalSource {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk(&root))
            .await
            .context("Directory walk task failed")?
    }

    async fn fetch(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        tokio::fs::read(&object.location)
            .await
            .with_context(|| format!("Failed to read {}", object.location))
    }
}
