//! App location resolver — turns the raw `app_location` config value
//! into a typed descriptor.
//!
//! Accepted forms:
//! - a URI string: `s3://bucket/prefix`, `gs://bucket/prefix`,
//!   `file:///path` or a bare filesystem path
//! - a mapping with a `type` tag (`local`, `s3`, `gcs`/`gs`) plus the
//!   backend's fields
//!
//! Resolution never falls back to a default backend: anything it cannot
//! classify is an error, and that error aborts startup.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{PollerError, Result};

pub const DEFAULT_S3_CREDENTIALS: &str = "AWS";
pub const DEFAULT_GCS_CREDENTIALS: &str = "GCS";

// ── Types ───────────────────────────────────────────────────────────

/// Where the application resources live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppLocation {
    Local { path: PathBuf },
    S3(BucketLocation),
    Gcs(BucketLocation),
}

/// Bucket + prefix for the object-store backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket: String,
    /// Key prefix without a leading slash; empty means the whole bucket.
    pub prefix: String,
    pub credentials: CredentialsRef,
    /// Endpoint override for S3-compatible stores or a GCS emulator.
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

/// Names the environment-variable prefix credentials are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsRef(pub String);

impl CredentialsRef {
    pub fn var(&self, suffix: &str) -> String {
        format!("{}_{}", self.0, suffix)
    }
}

impl AppLocation {
    /// Backend tag as it appears in config and logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::S3(_) => "s3",
            Self::Gcs(_) => "gcs",
        }
    }
}

impl fmt::Display for AppLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::S3(b) => write!(f, "s3://{}/{}", b.bucket, b.prefix),
            Self::Gcs(b) => write!(f, "gs://{}/{}", b.bucket, b.prefix),
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocationMapping {
    #[serde(rename = "type")]
    kind: String,
    path: Option<PathBuf>,
    bucket: Option<String>,
    #[serde(default)]
    prefix: String,
    credentials: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
}

/// Resolve the raw `app_location` value.
pub fn resolve(raw: &serde_yaml::Value) -> Result<AppLocation> {
    match raw {
        serde_yaml::Value::Null => Err(PollerError::MissingLocation),
        serde_yaml::Value::String(s) => resolve_uri(s),
        serde_yaml::Value::Mapping(_) => {
            let mapping: LocationMapping = serde_yaml::from_value(raw.clone())
                .map_err(|e| PollerError::InvalidLocation { details: e.to_string() })?;
            resolve_mapping(mapping)
        }
        other => Err(PollerError::InvalidLocation {
            details: format!("expected a string or mapping, got {:?}", other),
        }),
    }
}

fn resolve_uri(raw: &str) -> Result<AppLocation> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PollerError::InvalidLocation { details: "empty location".into() });
    }

    // Bare paths (including Windows-style drive paths) never contain "://".
    if !raw.contains("://") {
        return Ok(AppLocation::Local { path: PathBuf::from(raw) });
    }

    let url = Url::parse(raw)
        .map_err(|e| PollerError::InvalidLocation { details: format!("{}: {}", raw, e) })?;

    match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|_| PollerError::InvalidLocation {
                details: format!("{} is not a valid file URI", raw),
            })?;
            Ok(AppLocation::Local { path })
        }
        "s3" => Ok(AppLocation::S3(bucket_from_url(&url, DEFAULT_S3_CREDENTIALS)?)),
        "gs" | "gcs" => Ok(AppLocation::Gcs(bucket_from_url(&url, DEFAULT_GCS_CREDENTIALS)?)),
        scheme => Err(PollerError::UnsupportedBackend { backend: scheme.to_string() }),
    }
}

fn bucket_from_url(url: &Url, default_credentials: &str) -> Result<BucketLocation> {
    let bucket = url.host_str().unwrap_or_default();
    // `Url` keeps the path percent-encoded; object keys are raw text.
    let prefix = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|e| PollerError::InvalidLocation {
            details: format!("{}: prefix is not valid UTF-8: {}", url, e),
        })?;
    bucket_location(
        Some(bucket.to_string()),
        prefix.into_owned(),
        None,
        None,
        None,
        default_credentials,
    )
}

fn resolve_mapping(m: LocationMapping) -> Result<AppLocation> {
    match m.kind.to_ascii_lowercase().as_str() {
        "local" => {
            let path = m.path.filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
                PollerError::InvalidLocation { details: "local location requires `path`".into() }
            })?;
            Ok(AppLocation::Local { path })
        }
        "s3" => Ok(AppLocation::S3(bucket_location(
            m.bucket,
            m.prefix,
            m.credentials,
            m.endpoint,
            m.region,
            DEFAULT_S3_CREDENTIALS,
        )?)),
        "gcs" | "gs" => Ok(AppLocation::Gcs(bucket_location(
            m.bucket,
            m.prefix,
            m.credentials,
            m.endpoint,
            m.region,
            DEFAULT_GCS_CREDENTIALS,
        )?)),
        other => Err(PollerError::UnsupportedBackend { backend: other.to_string() }),
    }
}

fn bucket_location(
    bucket: Option<String>,
    prefix: String,
    credentials: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
    default_credentials: &str,
) -> Result<BucketLocation> {
    let bucket = bucket
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| PollerError::InvalidLocation { details: "bucket name is empty".into() })?;

    Ok(BucketLocation {
        bucket,
        prefix: prefix.trim_start_matches('/').to_string(),
        credentials: CredentialsRef(
            credentials.unwrap_or_else(|| default_credentials.to_string()),
        ),
        endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        region,
    })
}
