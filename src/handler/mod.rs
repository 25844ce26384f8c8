//! Resource handlers — backend-specific health checks and sync passes.
//!
//! The daemon only sees [`ResourceHandler`]. Every backend is the same
//! [`SyncHandler`] wrapped around a different [`ObjectSource`]; the
//! choice is made once, in [`for_location`], from the location tag.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::PollerSettings;
use crate::location::AppLocation;

pub mod executor;
pub mod gcs;
pub mod local;
pub mod s3;
pub mod sigv4;
pub mod sync;

pub use executor::ExecutorClient;
pub use sync::SyncHandler;

// ── Handler Trait ───────────────────────────────────────────────────

/// What the poller drives.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Backend tag for logs (`local`, `s3`, `gcs`).
    fn backend(&self) -> &str;

    /// Is the executor reachable? `verbose` only affects logging.
    async fn check_health(&self, verbose: bool) -> bool;

    /// Run one synchronization pass.
    async fn poll(&mut self) -> Result<()>;
}

// ── Object Sources ──────────────────────────────────────────────────

/// One object in a source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Key relative to the configured prefix, `/`-separated.
    pub key: String,
    /// Source-specific address used by `fetch` (full object name or path).
    pub location: String,
    /// Changes whenever the content may have changed.
    pub fingerprint: String,
    pub size: u64,
}

/// Lists and fetches objects from one backend.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn list(&self) -> Result<Vec<RemoteObject>>;

    async fn fetch(&self, object: &RemoteObject) -> Result<Vec<u8>>;
}

/// Normalize a key prefix so it only matches whole path segments.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Strip the listing prefix from a full object name. Directory markers
/// and names outside the prefix yield `None`.
pub(crate) fn relative_key(prefix: &str, name: &str) -> Option<String> {
    let rel = name.strip_prefix(prefix)?;
    if rel.is_empty() || rel.ends_with('/') {
        return None;
    }
    Some(rel.to_string())
}

/// Cut an error body down for logs without splitting a UTF-8 character.
pub(crate) fn snippet(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ── Factory ─────────────────────────────────────────────────────────

/// Build the handler for `location`. Called once per process.
pub fn for_location(
    location: &AppLocation,
    settings: &PollerSettings,
) -> Result<Box<dyn ResourceHandler>> {
    let executor = ExecutorClient::new(&settings.executor_url, settings.health_check_timeout)?;
    let download_dir = settings.download_location.clone();

    let handler: Box<dyn ResourceHandler> = match location {
        AppLocation::Local { path } => Box::new(SyncHandler::new(
            local::LocalSource::new(path.clone()),
            executor,
            download_dir,
        )),
        AppLocation::S3(bucket) => Box::new(SyncHandler::new(
            s3::S3Source::from_location(bucket)?,
            executor,
            download_dir,
        )),
        AppLocation::Gcs(bucket) => Box::new(SyncHandler::new(
            gcs::GcsSource::from_location(bucket)?,
            executor,
            download_dir,
        )),
    };
    Ok(handler)
}
