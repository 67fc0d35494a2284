//! HTTP API server for curator.
//!
//! This crate provides:
//! - Record CRUD with asset release on update and delete
//! - Asset upload-and-link and unlink-and-delete endpoints
//! - Reconciliation sweeps and their history
//! - Public blob serving and Prometheus metrics
//! - The scheduler for periodic sweeps

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
