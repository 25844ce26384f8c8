//! Google Cloud Storage source — JSON API listing and media download.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use super::{normalize_prefix, relative_key, snippet, ObjectSource, RemoteObject};
use crate::location::BucketLocation;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    #[serde(default)]
    generation: String,
    /// GCS encodes uint64 fields as strings.
    #[serde(default)]
    size: Option<String>,
}

pub struct GcsSource {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: String,
    access_token: Option<Zeroizing<String>>,
}

impl GcsSource {
    /// Reads the bearer token from `{P}_ACCESS_TOKEN`; anonymous without it.
    pub fn from_location(location: &BucketLocation) -> Result<Self> {
        let token = std::env::var(location.credentials.var("ACCESS_TOKEN"))
            .ok()
            .filter(|t| !t.is_empty());
        if token.is_none() {
            debug!(
                bucket = %location.bucket,
                "No GCS token under {}_ACCESS_TOKEN, using anonymous requests",
                location.credentials.0
            );
        }
        Self::new(location, token)
    }

    pub fn new(location: &BucketLocation, access_token: Option<String>) -> Result<Self> {
        let endpoint = location
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Url::parse(&endpoint).with_context(|| format!("Invalid GCS endpoint {}", endpoint))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build GCS HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            bucket: location.bucket.clone(),
            prefix: normalize_prefix(&location.prefix),
            access_token: access_token.map(Zeroizing::new),
        })
    }

    /// `{endpoint}/storage/v1/b/{bucket}/o[/{object}]` with each part
    /// encoded as a single path segment.
    fn objects_url(&self, object: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("GCS endpoint {} cannot be a base URL", self.endpoint))?;
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
            if let Some(name) = object {
                segments.push(name);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let request = match &self.access_token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        };
        let resp = request
            .send()
            .await
            .with_context(|| format!("GCS {} request failed", what))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "GCS {} failed ({}): {}",
                what,
                status,
                snippet(&body, 500)
            );
        }
        Ok(resp)
    }
}

#[async_trait]
impl ObjectSource for GcsSource {
    fn backend(&self) -> &'static str {
        "gcs"
    }

    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let url = self.objects_url(None)?;
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![
                ("prefix", self.prefix.as_str()),
                ("fields", "items(name,generation,size),nextPageToken"),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.as_str()));
            }

            let page: ObjectList = self
                .send(self.client.get(url.clone()).query(&query), "list")
                .await?
                .json()
                .await
                .context("Malformed GCS object listing")?;

            objects.extend(page.items.into_iter().filter_map(|item| {
                let key = relative_key(&self.prefix, &item.name)?;
                Some(RemoteObject {
                    key,
                    fingerprint: item.generation,
                    size: item.size.and_then(|s| s.parse().ok()).unwrap_or(0),
                    location: item.name,
                })
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn fetch(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let url = self.objects_url(Some(&object.location))?;
        let resp = self
            .send(self.client.get(url).query(&[("alt", "media")]), "download")
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }
}
