//! Wire types for the Cormorant control plane.
//!
//! Both transports speak these types: the HTTP/JSON facade and the
//! request/response command service. The command service wraps every
//! command in a [`DriverRequest`] envelope whose `@type` URL selects the
//! handler; the HTTP facade uses the request/response bodies in
//! [`http_types`] directly.

pub mod envelope;
pub mod error;
pub mod http_types;
pub mod snapshot_config;

pub use envelope::{
    CommandAny, Credentials, DriverRequest, DriverResponse, LogLevel, LogMessage, RuntimeOptions,
};
pub use error::{ApiError, ErrorKind, ErrorResponse};
pub use snapshot_config::{
    ConfigSource, SnapshotConfig, SnapshotConfigPatch, SnapshotRetention, SnapshotRetentionPatch,
    SnapshotTriggers, SnapshotTriggersPatch,
};
