//! HTTP-backed caption and narrative collaborators.
//!
//! Thin JSON clients for sidecar inference services. Both carry their own
//! request timeout; a timeout surfaces as an `EnrichError` and becomes a job
//! failure, never a pipeline fault.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::detect::ViolationEvent;

use super::traits::{CaptionService, EnrichError, NarrativeService};
use super::types::NarrativeReport;

/// Configuration for one HTTP enrichment service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServiceConfig {
    /// Endpoint URL.
    pub url: String,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .expect("Failed to create HTTP client")
}

#[derive(Serialize)]
struct CaptionRequest<'a> {
    image_ref: &'a str,
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
}

/// Caption service speaking JSON over HTTP.
pub struct HttpCaptionService {
    client: Client,
    config: HttpServiceConfig,
}

impl HttpCaptionService {
    pub fn new(config: HttpServiceConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { client, config }
    }
}

#[async_trait]
impl CaptionService for HttpCaptionService {
    async fn describe(&self, image_ref: &str) -> Result<String, EnrichError> {
        debug!(url = %self.config.url, "Requesting caption");

        let mut request = self
            .client
            .post(&self.config.url)
            .json(&CaptionRequest { image_ref });
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EnrichError::Timeout {
                    service: "caption",
                    timeout_ms: self.config.timeout_secs * 1000,
                }
            } else {
                EnrichError::Caption(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(EnrichError::Caption(format!(
                "HTTP {} from caption service",
                response.status()
            )));
        }

        let body: CaptionResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Caption(format!("invalid response: {}", e)))?;
        Ok(body.caption)
    }
}

#[derive(Serialize)]
struct NarrativeRequest<'a> {
    caption: &'a str,
    event: &'a ViolationEvent,
}

/// Narrative service speaking JSON over HTTP. The response body is the
/// structured report itself.
pub struct HttpNarrativeService {
    client: Client,
    config: HttpServiceConfig,
}

impl HttpNarrativeService {
    pub fn new(config: HttpServiceConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { client, config }
    }
}

#[async_trait]
impl NarrativeService for HttpNarrativeService {
    async fn compose(
        &self,
        caption: &str,
        event: &ViolationEvent,
    ) -> Result<NarrativeReport, EnrichError> {
        debug!(url = %self.config.url, "Requesting narrative");

        let mut request = self
            .client
            .post(&self.config.url)
            .json(&NarrativeRequest { caption, event });
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EnrichError::Timeout {
                    service: "narrative",
                    timeout_ms: self.config.timeout_secs * 1000,
                }
            } else {
                EnrichError::Narrative(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(EnrichError::Narrative(format!(
                "HTTP {} from narrative service",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EnrichError::Narrative(format!("invalid response: {}", e)))
    }
}
