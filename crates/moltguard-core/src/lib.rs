//! MoltGuard Core - prompt injection detection pipeline.
//!
//! This crate implements the content-guard pipeline: it splits arbitrary
//! text into bounded overlapping chunks, submits each chunk to the remote
//! MoltGuard detection service, and aggregates the per-chunk results into a
//! single [`Verdict`].
//!
//! ## Pipeline
//!
//! ```text
//! AnalysisTarget → Chunker → Detection Client (bounded fan-out) → Verdict
//! ```
//!
//! The crate also owns the credential lifecycle for the detection service:
//! [`CredentialResolver`] loads a configured or persisted API key, or
//! auto-registers a fresh one on first use (at most once per process).
//!
//! Callers decide policy. The pipeline never blocks content on its own, and
//! a detection-service outage surfaces as [`GuardError::DetectionUnavailable`]
//! so callers can fail open.

mod chunker;
mod client;
mod config;
mod credentials;
mod error;
mod extract;
mod target;
mod verdict;

pub use chunker::{chunk_text, Chunk, CHUNK_OVERLAP_CHARS, MAX_CHUNK_CHARS};
pub use client::DetectionClient;
pub use config::GuardConfig;
pub use credentials::{CredentialResolver, CredentialState};
pub use error::{GuardError, Result};
pub use extract::extract_content;
pub use target::{AnalysisTarget, TargetType};
pub use verdict::{Finding, Verdict};

/// Minimum content length (chars) before a tool result is analyzed.
pub const MIN_TOOL_RESULT_LEN: usize = 100;

/// Minimum content length (chars) before an inbound message is analyzed.
pub const MIN_MESSAGE_LEN: usize = 1000;

/// Confidence at or above which a verdict counts as a detection.
pub const RISK_CONFIDENCE_THRESHOLD: f64 = 0.7;
