//! Common types for the ExternalDNS e2e harness: errors, retry, ARM resource
//! ids, environment configuration and tracing setup.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod resource_id;
pub mod retry;
pub mod telemetry;

pub use error::{Error, ResultExt};
pub use resource_id::ResourceId;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace ExternalDNS and the test workloads are deployed into
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace used for objects that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Label key marking resources deployed by this harness
pub const MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";

/// Label value marking resources deployed by this harness
pub const MANAGED_BY_VALUE: &str = "extdns-e2e";
