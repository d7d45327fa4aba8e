//! # Task Hub
//!
//! A multi-agent task orchestration hub: a durable relational task store, an
//! at-most-once claim protocol, a per-agent worker polling loop driving an
//! external computer-use driver, and an HTTP API tying them together.
//!
//! ## Architecture
//!
//! - **Storage Façade**: a single seam over the relational task store
//!   (Postgres), the object store (S3-compatible), and the log store
//!   (MongoDB).
//! - **Claim protocol**: row-locked, at-most-once task assignment.
//! - **Worker loop**: one process per agent, polling for claimed work and
//!   driving it through an external executor.
//! - **Hub API**: task submission, status, live agent feed, and artifact
//!   retrieval.

/// HTTP API server and endpoints
pub mod api;
/// Authentication middleware
pub mod auth;
/// Environment-driven configuration
pub mod config;
/// System-wide tunables
pub mod constants;
/// Error types and handling
pub mod error;
/// Core data models
pub mod models;
/// Rate limiting middleware
pub mod rate_limit;
/// Storage Façade: relational task store, object store, log store
pub mod storage;
/// Input validation
pub mod validation;
/// Worker loop and task executor adapter
pub mod worker;

pub use error::{HubError, Result};
