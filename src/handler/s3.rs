//! S3 source — ListObjectsV2 + GetObject over the REST API.
//!
//! Requests are SigV4-signed when credentials are found under the
//! location's credentials prefix and sent anonymously otherwise (public
//! buckets). A custom endpoint switches to path-style addressing for
//! S3-compatible stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::sigv4::{self, CanonicalRequest, SigningScope, EMPTY_PAYLOAD_SHA256};
use super::{normalize_prefix, relative_key, snippet, ObjectSource, RemoteObject};
use crate::location::BucketLocation;

const DEFAULT_REGION: &str = "us-east-1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ── Credentials ─────────────────────────────────────────────────────

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl S3Credentials {
    /// Read `{P}_ACCESS_KEY_ID` / `{P}_SECRET_ACCESS_KEY` /
    /// `{P}_SESSION_TOKEN`. `None` when the key pair is absent.
    pub fn from_env(location: &BucketLocation) -> Option<Self> {
        let var = |suffix: &str| {
            std::env::var(location.credentials.var(suffix))
                .ok()
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            access_key_id: var("ACCESS_KEY_ID")?,
            secret_access_key: var("SECRET_ACCESS_KEY")?,
            session_token: var("SESSION_TOKEN"),
        })
    }
}

// ── Source ──────────────────────────────────────────────────────────

pub struct S3Source {
    client: reqwest::Client,
    /// Bucket root URL, no trailing slash.
    bucket_url: Url,
    prefix: String,
    region: String,
    credentials: Option<S3Credentials>,
}

impl S3Source {
    pub fn from_location(location: &BucketLocation) -> Result<Self> {
        let region = location
            .region
            .clone()
            .or_else(|| std::env::var(location.credentials.var("REGION")).ok())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let credentials = S3Credentials::from_env(location);
        if credentials.is_none() {
            debug!(
                bucket = %location.bucket,
                "No S3 credentials under {}_*, using anonymous requests",
                location.credentials.0
            );
        }
        Self::new(location, region, credentials)
    }

    pub fn new(
        location: &BucketLocation,
        region: String,
        credentials: Option<S3Credentials>,
    ) -> Result<Self> {
        let bucket_url = match &location.endpoint {
            Some(endpoint) => format!(
                "{}/{}",
                endpoint.trim_end_matches('/'),
                sigv4::uri_encode(&location.bucket, false)
            ),
            None => format!("https://{}.s3.{}.amazonaws.com", location.bucket, region),
        };
        let bucket_url = Url::parse(&bucket_url)
            .with_context(|| format!("Invalid S3 bucket URL {}", bucket_url))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build S3 HTTP client")?;

        Ok(Self {
            client,
            bucket_url,
            prefix: normalize_prefix(&location.prefix),
            region,
            credentials,
        })
    }

    fn host_header(&self) -> String {
        let host = self.bucket_url.host_str().unwrap_or_default();
        match self.bucket_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Signed (or anonymous) GET of `key_path` under the bucket root.
    async fn get(&self, key_path: &str, query: &[(String, String)]) -> Result<reqwest::Response> {
        let path = format!(
            "{}/{}",
            self.bucket_url.path().trim_end_matches('/'),
            key_path
        );
        let query_string = sigv4::canonical_query(query);
        let mut url = format!(
            "{}://{}{}",
            self.bucket_url.scheme(),
            self.host_header(),
            path
        );
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }

        let mut request = self.client.get(&url);
        if let Some(creds) = &self.credentials {
            let now = Utc::now();
            let mut headers = vec![
                ("host".to_string(), self.host_header()),
                ("x-amz-content-sha256".to_string(), EMPTY_PAYLOAD_SHA256.to_string()),
                ("x-amz-date".to_string(), sigv4::amz_date(now)),
            ];
            if let Some(token) = &creds.session_token {
                headers.push(("x-amz-security-token".to_string(), token.clone()));
            }
            let auth = sigv4::authorization(
                &SigningScope {
                    access_key_id: &creds.access_key_id,
                    secret_access_key: &creds.secret_access_key,
                    region: &self.region,
                    service: "s3",
                },
                &CanonicalRequest {
                    method: "GET",
                    path: &path,
                    query,
                    headers: &headers,
                    payload_sha256: EMPTY_PAYLOAD_SHA256,
                },
                now,
            );
            for (name, value) in headers.iter().filter(|(n, _)| n != "host") {
                request = request.header(name.as_str(), value.as_str());
            }
            request = request.header("authorization", auth);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("S3 request failed: {}", path))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "S3 GET {} failed ({}): {}",
                path,
                status,
                snippet(&body, 500)
            );
        }
        Ok(resp)
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), self.prefix.clone()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let body = self.get("", &query).await?.text().await?;
            let page = parse_list_objects(&body)?;

            objects.extend(page.contents.into_iter().filter_map(|entry| {
                let key = relative_key(&self.prefix, &entry.key)?;
                Some(RemoteObject {
                    key,
                    location: entry.key,
                    fingerprint: entry.etag,
                    size: entry.size,
                })
            }));

            match page.next_token {
                Some(token) if page.truncated => continuation = Some(token),
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn fetch(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let resp = self.get(&sigv4::uri_encode(&object.location, true), &[]).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

// ── ListObjectsV2 Parsing ───────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq)]
struct ListPage {
    contents: Vec<ListEntry>,
    truncated: bool,
    next_token: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct ListEntry {
    key: String,
    etag: String,
    size: u64,
}

fn tag_regex(tag: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>")).expect("static regex")
    })
}

fn first_tag(body: &str, tag: &'static str, cell: &'static OnceLock<Regex>) -> Option<String> {
    tag_regex(tag, cell)
        .captures(body)
        .map(|c| xml_unescape(&c[1]))
}

/// Pull the fields we need out of a ListBucketResult document. The
/// response is flat enough that tag extraction is sufficient.
fn parse_list_objects(body: &str) -> Result<ListPage> {
    static CONTENTS: OnceLock<Regex> = OnceLock::new();
    static KEY: OnceLock<Regex> = OnceLock::new();
    static ETAG: OnceLock<Regex> = OnceLock::new();
    static SIZE: OnceLock<Regex> = OnceLock::new();
    static TRUNCATED: OnceLock<Regex> = OnceLock::new();
    static NEXT: OnceLock<Regex> = OnceLock::new();

    if !body.contains("<ListBucketResult") {
        anyhow::bail!("Unexpected S3 list response: {}", snippet(&body, 200));
    }

    let mut page = ListPage::default();
    for block in tag_regex("Contents", &CONTENTS).captures_iter(body) {
        let block = &block[1];
        let key = first_tag(block, "Key", &KEY).context("S3 listing entry without <Key>")?;
        let etag = first_tag(block, "ETag", &ETAG).unwrap_or_default();
        let size = first_tag(block, "Size", &SIZE)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        page.contents.push(ListEntry {
            key,
            etag: etag.trim_matches('"').to_string(),
            size,
        });
    }
    page.truncated = first_tag(body, "IsTruncated", &TRUNCATED).as_deref() == Some("true");
    page.next_token = first_tag(body, "NextContinuationToken", &NEXT);
    Ok(page)
}

fn xml_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#13;", "\r")
        .replace("&amp;", "&")
}
