//! Detection service client.
//!
//! Submits each chunk of a target as an independent request, with bounded
//! concurrency, one transient retry, and an auth-triggered re-registration,
//! then aggregates the per-chunk results into a single [`Verdict`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::chunker::{chunk_text, Chunk};
use crate::config::GuardConfig;
use crate::credentials::CredentialResolver;
use crate::error::{GuardError, Result};
use crate::target::AnalysisTarget;
use crate::verdict::{Finding, Verdict};

/// Delay before retrying a transiently failed chunk request.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Per-chunk request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    content: &'a str,
    target_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// Per-chunk response payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    is_injection: bool,
    #[serde(default)]
    findings: Vec<WireFinding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFinding {
    suspicious_content: String,
    confidence: f64,
    #[serde(default)]
    category: Option<String>,
}

/// Outcome of analyzing one chunk.
struct ChunkResult {
    flagged: bool,
    findings: Vec<Finding>,
}

/// How a failed chunk request should be handled.
enum ChunkFailure {
    /// Network/timeout/5xx: worth one retry.
    Transient(String),
    /// 401/403: key problem, goes through the credential resolver.
    Auth,
    /// Anything else: terminal for this chunk.
    Fatal(String),
}

/// Client for the remote MoltGuard detection service.
///
/// Cloneable via [`Arc`]; the contained semaphore bounds concurrent
/// outbound requests across every caller sharing the instance, so the
/// direct guard pipeline and the gateway draw from one pool.
pub struct DetectionClient {
    http: reqwest::Client,
    config: GuardConfig,
    credentials: Arc<CredentialResolver>,
    permits: Semaphore,
}

impl DetectionClient {
    /// Creates a client with its own credential resolver at the default
    /// credentials path.
    pub fn new(config: GuardConfig) -> Result<Self> {
        let credentials = Arc::new(CredentialResolver::new(&config)?);
        Ok(Self::with_credentials(config, credentials))
    }

    /// Creates a client sharing an existing credential resolver.
    pub fn with_credentials(config: GuardConfig, credentials: Arc<CredentialResolver>) -> Self {
        let permits = Semaphore::new(config.max_concurrency.max(1));
        Self {
            http: reqwest::Client::new(),
            config,
            credentials,
            permits,
        }
    }

    /// The credential resolver backing this client.
    pub fn credentials(&self) -> &Arc<CredentialResolver> {
        &self.credentials
    }

    /// Produces one verdict for one target.
    ///
    /// Chunks are submitted concurrently (bounded by the configured cap) and
    /// may complete in any order; findings are reported in chunk-index order
    /// regardless. Chunks that fail after retry are dropped from the verdict;
    /// if every chunk fails the whole call fails with
    /// [`GuardError::DetectionUnavailable`].
    pub async fn analyze(&self, target: &AnalysisTarget) -> Result<Verdict> {
        let chunks = chunk_text(&target.content);
        if chunks.is_empty() {
            return Ok(Verdict::clean(0));
        }
        let total = chunks.len();

        debug!(
            "Analyzing {} target from \"{}\" ({} chunk(s))",
            target.target_type.as_str(),
            target.source_label,
            total
        );

        let outcomes = join_all(chunks.iter().map(|chunk| self.analyze_chunk(target, chunk))).await;

        let mut findings = Vec::new();
        let mut flagged = false;
        let mut succeeded = 0usize;

        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    succeeded += 1;
                    flagged |= result.flagged;
                    findings.extend(result.findings);
                }
                Err(e) => {
                    warn!("Chunk analysis failed: {}", e);
                }
            }
        }

        if succeeded == 0 {
            return Err(GuardError::DetectionUnavailable { chunks: total });
        }

        Ok(Verdict::aggregate(findings, flagged, succeeded))
    }

    /// Analyzes one chunk: one transient retry, one auth-driven retry with a
    /// fresh key, otherwise the failure is terminal for this chunk.
    async fn analyze_chunk(&self, target: &AnalysisTarget, chunk: &Chunk) -> Result<ChunkResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("detection semaphore closed");

        let mut api_key = self.credentials.resolve().await;
        let mut transient_retried = false;
        let mut auth_retried = false;

        loop {
            match self.post_chunk(target, chunk, api_key.as_deref()).await {
                Ok(result) => return Ok(result),
                Err(ChunkFailure::Transient(reason)) => {
                    if transient_retried {
                        return Err(GuardError::ChunkFailed(reason));
                    }
                    debug!("Retrying chunk {} after transient error: {}", chunk.index, reason);
                    transient_retried = true;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(ChunkFailure::Auth) => {
                    if auth_retried {
                        return Err(GuardError::Authentication(
                            "key rejected after re-registration".to_string(),
                        ));
                    }
                    auth_retried = true;
                    match self.credentials.reauthorize(api_key.as_deref()).await {
                        Some(fresh) => api_key = Some(fresh),
                        None => {
                            return Err(GuardError::Authentication(
                                "no valid API key available".to_string(),
                            ))
                        }
                    }
                }
                Err(ChunkFailure::Fatal(reason)) => {
                    return Err(GuardError::ChunkFailed(reason));
                }
            }
        }
    }

    /// One request to the analyze endpoint.
    async fn post_chunk(
        &self,
        target: &AnalysisTarget,
        chunk: &Chunk,
        api_key: Option<&str>,
    ) -> std::result::Result<ChunkResult, ChunkFailure> {
        let url = format!(
            "{}/v1/analyze",
            self.config.api_base_url.trim_end_matches('/')
        );
        let request = AnalyzeRequest {
            content: &chunk.text,
            target_type: target.target_type.as_str(),
            api_key,
        };

        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChunkFailure::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(ChunkFailure::Auth),
            status if status.is_server_error() => {
                return Err(ChunkFailure::Transient(format!("status {}", status)))
            }
            status => return Err(ChunkFailure::Fatal(format!("status {}", status))),
        }

        let payload: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| ChunkFailure::Fatal(format!("bad response body: {}", e)))?;

        Ok(ChunkResult {
            flagged: payload.is_injection,
            findings: payload
                .findings
                .into_iter()
                .map(|f| Finding {
                    chunk_index: chunk.index,
                    suspicious_content: f.suspicious_content,
                    confidence: f.confidence,
                    category: f.category,
                })
                .collect(),
        })
    }
}
