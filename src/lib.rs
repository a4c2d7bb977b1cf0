//! # palindrome-rs
//!
//! In-memory message store whose palindrome checks run in the background.
//!
//! Identical texts share one computation through a deduplicating work
//! orchestrator. Work is cancelled as soon as no message needs it anymore.
//! An axum HTTP API and OpenTelemetry observability sit on top.

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod work;
