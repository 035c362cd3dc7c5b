//! MoltGuard application wiring.
//!
//! The host runtime (whatever dispatches tool results and inbound messages)
//! is a collaborator, not part of this crate: it constructs a
//! [`GuardEngine`] and hands it raw event payloads. The binary in
//! `main.rs` covers the operational surface (status, reports, feedback,
//! gateway supervision).

pub mod config;
pub mod engine;

pub use config::AppConfig;
pub use engine::GuardEngine;
