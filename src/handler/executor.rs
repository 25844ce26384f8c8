//! Executor client — health probe and reload notification.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::snippet;
use crate::config::redact_url;

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct ReloadRequest<'a> {
    changed: &'a [String],
    removed: &'a [String],
}

pub struct ExecutorClient {
    client: reqwest::Client,
    base_url: String,
    /// `base_url` with credentials masked.
    log_url: String,
}

impl ExecutorClient {
    /// `timeout` bounds the health probe; reload calls get a longer budget.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build executor HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            log_url: redact_url(&base_url),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health` — any 2xx is healthy. Never errors.
    pub async fn is_healthy(&self, verbose: bool) -> bool {
        let url = format!("{}/health", self.base_url);
        let shown = format!("{}/health", self.log_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                if verbose {
                    warn!(status = resp.status().as_u16(), url = %shown, "Executor health check failed");
                } else {
                    debug!(status = resp.status().as_u16(), url = %shown, "Executor not healthy yet");
                }
                false
            }
            Err(e) => {
                if verbose {
                    warn!(url = %shown, "Executor unreachable: {}", e.without_url());
                } else {
                    debug!(url = %shown, "Executor unreachable: {}", e.without_url());
                }
                false
            }
        }
    }

    /// `POST /reload` with the keys that changed since the last notification.
    pub async fn notify_reload(&self, changed: &[String], removed: &[String]) -> Result<()> {
        let url = format!("{}/reload", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(RELOAD_TIMEOUT)
            .json(&ReloadRequest { changed, removed })
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("Reload request to {}/reload failed", self.log_url))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Executor rejected reload ({}): {}",
                status,
                snippet(&body, 500)
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_executor, ExecutorState};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_health_reflects_status_code() {
        let state = ExecutorState::default();
        let url = spawn_executor(state.clone()).await;
        let client = ExecutorClient::new(&url, Duration::from_secs(5)).unwrap();

        assert!(!client.is_healthy(true).await);
        state.healthy.store(true, Ordering::SeqCst);
        assert!(client.is_healthy(false).await);
        assert_eq!(state.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_executor_is_unhealthy() {
        // Bind then drop so the port is closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ExecutorClient::new(&format!("http://{}", addr), Duration::from_secs(1)).unwrap();
        assert!(!client.is_healthy(true).await);
    }

    #[tokio::test]
    async fn test_notify_reload_sends_keys() {
        let state = ExecutorState::default();
        let url = spawn_executor(state.clone()).await;
        let client = ExecutorClient::new(&format!("{}/", url), Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), url);

        client
            .notify_reload(&["app.py".to_string()], &["old.py".to_string()])
            .await
            .unwrap();

        let reloads = state.reloads.lock().unwrap();
        assert_eq!(reloads.len(), 1);
        assert_eq!(reloads[0]["changed"][0], "app.py");
        assert_eq!(reloads[0]["removed"][0], "old.py");
    }

    #[tokio::test]
    async fn test_errors_do_not_leak_url_password() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ExecutorClient::new(
            &format!("http://svc:hunter2@{}", addr),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client.notify_reload(&[], &[]).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(!msg.contains("hunter2"), "{}", msg);
        assert!(msg.contains("svc:***@"));
    }

    #[tokio::test]
    async fn test_notify_reload_surfaces_rejection() {
        let state = ExecutorState::default();
        state.fail_reload.store(true, Ordering::SeqCst);
        let url = spawn_executor(state).await;
        let client = ExecutorClient::new(&url, Duration::from_secs(5)).unwrap();

        let err = client.notify_reload(&[], &[]).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
