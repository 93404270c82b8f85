//! Cloud resources created for a test run
//!
//! Every resource the provisioner creates is one of a small closed set of
//! kinds. Each carries its ARM id and name behind [`ArmResource`] so stages can
//! treat them uniformly (role assignment scopes, snapshots, logging).

mod arm;
mod cluster;
mod dns;
mod group;
mod network;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use extdns_common::{ResourceId, Result};

pub(crate) use arm::MANAGED_CLUSTER_API;
pub use arm::ArmResourceClient;
pub use cluster::{Cluster, ClusterOption, ClusterSpec};
pub use dns::{PrivateZone, Zone};
pub use group::{ResourceGroup, DEFAULT_RESOURCE_GROUP_TTL};
pub use network::{VirtualNetwork, VirtualNetworkSpec};

/// The kinds of resource a run creates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `Microsoft.Resources/resourceGroups`
    ResourceGroup,
    /// `Microsoft.ContainerService/managedClusters`
    ManagedCluster,
    /// `Microsoft.Network/dnsZones`
    DnsZone,
    /// `Microsoft.Network/privateDnsZones`
    PrivateDnsZone,
    /// `Microsoft.Network/virtualNetworks`
    VirtualNetwork,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::ResourceGroup => "resource group",
            ResourceKind::ManagedCluster => "managed cluster",
            ResourceKind::DnsZone => "dns zone",
            ResourceKind::PrivateDnsZone => "private dns zone",
            ResourceKind::VirtualNetwork => "virtual network",
        };
        f.write_str(s)
    }
}

/// Identity shared by every provisioned resource
pub trait ArmResource {
    /// Full ARM id
    fn id(&self) -> &ResourceId;

    /// Resource name
    fn name(&self) -> &str;

    /// Which kind of resource this is
    fn kind(&self) -> ResourceKind;
}

/// Creates the resources a run needs
///
/// Every create waits for its long-running operation to finish and returns
/// the resulting entity.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create (or update) a resource group that should be deleted after `ttl`
    async fn create_resource_group(
        &self,
        subscription_id: &str,
        name: &str,
        location: &str,
        ttl: Duration,
    ) -> Result<ResourceGroup>;

    /// Create a public DNS zone
    async fn create_zone(&self, resource_group: &ResourceGroup, name: &str) -> Result<Zone>;

    /// Create a private DNS zone
    async fn create_private_zone(
        &self,
        resource_group: &ResourceGroup,
        name: &str,
    ) -> Result<PrivateZone>;

    /// Create a virtual network with a single subnet
    async fn create_virtual_network(
        &self,
        resource_group: &ResourceGroup,
        location: &str,
        spec: &VirtualNetworkSpec,
    ) -> Result<VirtualNetwork>;

    /// Link a private zone to a virtual network so names resolve inside it
    async fn link_private_zone(
        &self,
        zone: &PrivateZone,
        link_name: &str,
        vnet: &VirtualNetwork,
    ) -> Result<()>;

    /// Create a managed cluster and resolve its kubelet identity
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<Cluster>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(ResourceKind::PrivateDnsZone.to_string(), "private dns zone");
        assert_eq!(ResourceKind::ManagedCluster.to_string(), "managed cluster");
    }

    #[test]
    fn test_entities_share_identity_accessors() {
        let rg = ResourceGroup::new(ResourceId::resource_group("sub", "rg"));
        let zone = Zone::new(
            ResourceId::new("sub", "rg", "Microsoft.Network", "dnsZones", "z.com"),
            vec!["ns1.azure-dns.com.".to_string()],
        );
        let resources: Vec<&dyn ArmResource> = vec![&rg, &zone];

        let names: Vec<_> = resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["rg", "z.com"]);
        assert_eq!(resources[1].kind(), ResourceKind::DnsZone);
    }
}
