//! Client for the external media acquisition service.
//!
//! The core never fetches or transcodes media itself. It POSTs
//! `{source_url, quality}` to the collaborator and consumes a
//! newline-delimited JSON response stream: zero or more
//! `{"percent": 42.0}` progress lines, terminated by either
//! `{"local_ref": "clip.mp4", "duration_seconds": 120.0}` on success or
//! `{"error": "..."}` on failure. Progress lines are relayed verbatim to
//! the room; the terminal line resolves the room's pending download.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::{PartyError, Result};

const DEFAULT_ACQUISITION_URL: &str = "http://127.0.0.1:9090";
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Successful acquisition outcome: a filename the byte-range collaborator
/// can serve, plus the media duration when the service could probe it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcquiredMedia {
    pub local_ref: String,
    pub duration_seconds: Option<f64>,
}

/// Seam for the acquisition collaborator so the engine can be exercised
/// with a stub in tests.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(
        &self,
        source_url: &str,
        quality: Option<&str>,
        progress: mpsc::UnboundedSender<f32>,
    ) -> Result<AcquiredMedia>;
}

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub service_url: String,
    pub request_timeout_secs: u64,
}

impl AcquisitionConfig {
    pub fn from_env() -> Self {
        let service_url = std::env::var("ACQUISITION_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_ACQUISITION_URL.to_string());
        let request_timeout_secs = std::env::var("ACQUISITION_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_TIMEOUT_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            service_url,
            request_timeout_secs,
        }
    }
}

/// One line of the collaborator's NDJSON response.
#[derive(Debug, Deserialize)]
struct ServiceLine {
    percent: Option<f32>,
    local_ref: Option<String>,
    duration_seconds: Option<f64>,
    error: Option<String>,
}

pub struct AcquisitionClient {
    config: AcquisitionConfig,
    client: reqwest::Client,
}

impl AcquisitionClient {
    pub fn new(config: AcquisitionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PartyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl MediaAcquirer for AcquisitionClient {
    async fn acquire(
        &self,
        source_url: &str,
        quality: Option<&str>,
        progress: mpsc::UnboundedSender<f32>,
    ) -> Result<AcquiredMedia> {
        let acquire_url = format!("{}/acquire", self.config.service_url);
        let body = serde_json::json!({
            "source_url": source_url,
            "quality": quality,
        });

        tracing::info!(source_url = %source_url, "Requesting media acquisition");

        let response = self.client.post(&acquire_url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(PartyError::AcquisitionFailed(format!(
                "acquisition service returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                PartyError::AcquisitionFailed(format!("response stream failed: {}", e))
            })?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                if let Some(media) = process_line(&line, &progress)? {
                    return Ok(media);
                }
            }
        }

        // A terminal line without a trailing newline still counts.
        if let Some(media) = process_line(&buffer, &progress)? {
            return Ok(media);
        }

        Err(PartyError::AcquisitionFailed(
            "acquisition stream ended without a result".to_string(),
        ))
    }
}

/// Interprets one NDJSON line. Returns the acquired media if the line was
/// terminal, `None` for progress or blank lines.
fn process_line(
    line: &[u8],
    progress: &mpsc::UnboundedSender<f32>,
) -> Result<Option<AcquiredMedia>> {
    let trimmed: &[u8] = {
        let text = std::str::from_utf8(line).unwrap_or("");
        text.trim().as_bytes()
    };
    if trimmed.is_empty() {
        return Ok(None);
    }

    let parsed: ServiceLine = serde_json::from_slice(trimmed).map_err(|e| {
        PartyError::AcquisitionFailed(format!("malformed acquisition response: {}", e))
    })?;

    if let Some(message) = parsed.error {
        return Err(PartyError::AcquisitionFailed(message));
    }
    if let Some(local_ref) = parsed.local_ref {
        return Ok(Some(AcquiredMedia {
            local_ref,
            duration_seconds: parsed.duration_seconds,
        }));
    }
    if let Some(percent) = parsed.percent {
        // Relay is best-effort; the engine may already have dropped the room.
        let _ = progress.send(percent);
    }

    Ok(None)
}
