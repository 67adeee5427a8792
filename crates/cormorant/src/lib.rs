//! Cormorant: a multi-tenant columnar storage backend.
//!
//! Tenants ("projects") own isolated on-disk databases organized into
//! buckets and tables. Two transports expose create/drop/inspect/import/
//! export/preview operations: an HTTP/JSON API and a request/response
//! command service. The core adds copy-on-write dev branches,
//! point-in-time snapshots with hierarchical retention, request
//! idempotency, a read-only wire-session bridge, and S3-wire-compatible
//! file staging.

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod ops;
pub mod state;

pub use config::Config;
pub use state::App;
