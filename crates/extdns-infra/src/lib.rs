//! ExternalDNS e2e infrastructure
//!
//! Provisions ephemeral Azure infrastructure for ExternalDNS end-to-end tests
//! and gets it into a testable state:
//!
//! - **Provisioner**: creates the resource group, DNS zones, virtual network,
//!   managed cluster and role assignments in dependency-ordered stages
//! - **Remote commands**: runs `kubectl` on the cluster through the AKS
//!   run-command API with manifests staged as a zip archive
//! - **Stability**: waits until every deployed object is rolled out, ready
//!   or completed
//! - **Snapshot**: serializable form of the result for a later test process
//!
//! # Architecture
//!
//! ```text
//! resource group ─► zones ┐
//!                   private zones ─► links ─► cluster ─► role assignments ─► deploy ─► wait stable
//!                   vnet ─┘
//! ```

#![deny(missing_docs)]

pub mod arm;
pub mod command;
pub mod credential;
pub mod infras;
pub mod manifests;
pub mod provisioner;
pub mod resources;
pub mod role_assignment;
pub mod snapshot;
pub mod stability;

#[cfg(test)]
mod test_support;

pub use arm::ArmClient;
pub use command::{ArmCommandTransport, CommandRequest, CommandResult, RemoteCommandChannel};
pub use credential::{AzureCliTokenSource, CachedCredential};
pub use infras::Infras;
pub use manifests::Manifest;
pub use provisioner::{InfraSpec, Provisioned, Provisioner};
pub use resources::{ArmResourceClient, ClusterOption};
pub use role_assignment::RoleAssignmentCoordinator;
pub use snapshot::LoadableProvisioned;
pub use stability::{StabilityConfig, StabilityWaiter};
