//! Webhook Module
//!
//! Hands a run's manifest to a downstream analyzer over HTTP. The manifest is
//! posted as JSON together with per-label counts; failed deliveries are retried
//! with exponential backoff.
use crate::models::{LabelCounts, Manifest, ManifestEntry, Warning};
use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Serialize)]
struct ManifestPayload<'a> {
    entries: &'a [ManifestEntry],
    warnings: &'a [Warning],
    counts: LabelCounts,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: &'static str,
}

impl<'a> From<&'a Manifest> for ManifestPayload<'a> {
    fn from(manifest: &'a Manifest) -> Self {
        ManifestPayload {
            entries: &manifest.entries,
            warnings: &manifest.warnings,
            counts: manifest.counts(),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Posts manifests to a fixed webhook URL.
#[derive(Debug)]
pub struct WebhookHandler {
    timeout: Duration,
    client: Client,
    url: Url,
    max_retries: u32,
}

impl WebhookHandler {
    pub fn new(url: impl AsRef<str>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let url = Url::parse(url.as_ref()).context("Invalid webhook URL")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            timeout,
            client,
            url,
            max_retries,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delivers the manifest, retrying up to `max_retries` times.
    pub async fn send(&self, manifest: &Manifest) -> Result<()> {
        let payload = ManifestPayload::from(manifest);
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = Duration::from_secs(1 << (attempt - 2));
                log::info!("Retrying manifest delivery in {:?}...", delay);
                sleep(delay).await;
            }
            match self.post(&payload).await {
                Ok(()) => {
                    log::info!(
                        "Delivered manifest with {} entries (attempt {})",
                        payload.entries.len(),
                        attempt
                    );
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Manifest delivery attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                }
            }
        }
        Err(anyhow::anyhow!(
            "Manifest delivery failed after {} attempts: {}",
            attempts,
            last_error
        ))
    }

    async fn post(&self, payload: &ManifestPayload<'_>) -> std::result::Result<(), String> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { "timeout".to_string() } else { e.to_string() })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("HTTP {} - {}", status, body))
    }
}
