use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};

use extdns_common::{ResourceId, Result, ResultExt};

use super::{
    ArmResource, Cluster, ClusterSpec, PrivateZone, ResourceClient, ResourceGroup, VirtualNetwork,
    VirtualNetworkSpec, Zone,
};
use crate::arm::ArmClient;

const RESOURCE_GROUP_API: &str = "2021-04-01";
const DNS_ZONE_API: &str = "2018-05-01";
const PRIVATE_DNS_API: &str = "2020-06-01";
const NETWORK_API: &str = "2023-09-01";
/// Managed clusters API version, shared with run-command
pub(crate) const MANAGED_CLUSTER_API: &str = "2024-02-01";

/// [`ResourceClient`] that talks to Azure Resource Manager
pub struct ArmResourceClient {
    arm: Arc<ArmClient>,
}

impl ArmResourceClient {
    /// Create a resource client over a shared ARM client
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

#[async_trait]
impl ResourceClient for ArmResourceClient {
    #[instrument(skip(self, ttl), fields(resource_group = %name))]
    async fn create_resource_group(
        &self,
        subscription_id: &str,
        name: &str,
        location: &str,
        ttl: Duration,
    ) -> Result<ResourceGroup> {
        info!("creating resource group");
        let id = ResourceId::resource_group(subscription_id, name);
        let body = ResourceGroup::create_body(location, ttl, Utc::now());
        self.arm
            .put(&id.to_string(), RESOURCE_GROUP_API, &body)
            .await
            .with_context(|| format!("creating resource group {}", name))?;
        info!("created resource group");
        Ok(ResourceGroup::new(id))
    }

    #[instrument(skip(self, resource_group), fields(zone = %name))]
    async fn create_zone(&self, resource_group: &ResourceGroup, name: &str) -> Result<Zone> {
        info!("creating dns zone");
        let id = ResourceId::new(
            resource_group.subscription_id(),
            resource_group.name(),
            "Microsoft.Network",
            "dnsZones",
            name,
        );
        let created = self
            .arm
            .put(&id.to_string(), DNS_ZONE_API, &Zone::create_body())
            .await
            .with_context(|| format!("creating dns zone {}", name))?;
        let nameservers = Zone::nameservers_from(&created);
        info!(nameservers = ?nameservers, "created dns zone");
        Ok(Zone::new(id, nameservers))
    }

    #[instrument(skip(self, resource_group), fields(private_zone = %name))]
    async fn create_private_zone(
        &self,
        resource_group: &ResourceGroup,
        name: &str,
    ) -> Result<PrivateZone> {
        info!("creating private dns zone");
        let id = ResourceId::new(
            resource_group.subscription_id(),
            resource_group.name(),
            "Microsoft.Network",
            "privateDnsZones",
            name,
        );
        self.arm
            .put(&id.to_string(), PRIVATE_DNS_API, &PrivateZone::create_body())
            .await
            .with_context(|| format!("creating private dns zone {}", name))?;
        info!("created private dns zone");
        Ok(PrivateZone::new(id))
    }

    #[instrument(skip(self, resource_group, spec), fields(vnet = %spec.name))]
    async fn create_virtual_network(
        &self,
        resource_group: &ResourceGroup,
        location: &str,
        spec: &VirtualNetworkSpec,
    ) -> Result<VirtualNetwork> {
        info!("creating virtual network");
        let id = ResourceId::new(
            resource_group.subscription_id(),
            resource_group.name(),
            "Microsoft.Network",
            "virtualNetworks",
            &spec.name,
        );
        self.arm
            .put(&id.to_string(), NETWORK_API, &spec.create_body(location))
            .await
            .with_context(|| format!("creating virtual network {}", spec.name))?;
        info!("created virtual network");
        Ok(VirtualNetwork::new(id, &spec.subnet_name))
    }

    #[instrument(skip(self, zone, vnet), fields(private_zone = %zone.name(), vnet = %vnet.name()))]
    async fn link_private_zone(
        &self,
        zone: &PrivateZone,
        link_name: &str,
        vnet: &VirtualNetwork,
    ) -> Result<()> {
        info!(link = %link_name, "linking private zone to virtual network");
        let link_id = zone.id().clone().child("virtualNetworkLinks", link_name);
        self.arm
            .put(
                &link_id.to_string(),
                PRIVATE_DNS_API,
                &PrivateZone::link_body(vnet.id()),
            )
            .await
            .with_context(|| {
                format!(
                    "linking private zone {} to virtual network {}",
                    zone.name(),
                    vnet.name()
                )
            })?;
        Ok(())
    }

    #[instrument(skip(self, spec), fields(cluster = %spec.id.name()))]
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<Cluster> {
        info!(options = ?spec.options, "creating managed cluster");
        let created = self
            .arm
            .put(&spec.id.to_string(), MANAGED_CLUSTER_API, &spec.to_arm_body())
            .await
            .with_context(|| format!("creating managed cluster {}", spec.id.name()))?;
        let cluster = Cluster::from_created(spec, &created)
            .with_context(|| format!("reading created cluster {}", spec.id.name()))?;
        info!(principal_id = %cluster.principal_id(), "created managed cluster");
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::test_support::{Reply, ScriptedArm};

    fn resource_group() -> ResourceGroup {
        ResourceGroup::new(ResourceId::resource_group("s", "rg"))
    }

    #[tokio::test]
    async fn test_zone_nameservers_come_from_created_zone() {
        let arm = ScriptedArm::start(|_| {
            vec![Reply::json(
                201,
                json!({"properties": {"nameServers": ["ns1-01.azure-dns.com.", "ns2-01.azure-dns.net."]}}),
            )]
        })
        .await;
        let client = ArmResourceClient::new(arm.client());

        let zone = client.create_zone(&resource_group(), "one.com").await.unwrap();
        assert_eq!(
            zone.nameservers(),
            ["ns1-01.azure-dns.com.", "ns2-01.azure-dns.net."]
        );

        let received = arm.received();
        assert_eq!(
            received[0].path,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/dnsZones/one.com"
        );
        assert_eq!(received[0].query, format!("api-version={}", DNS_ZONE_API));
        assert_eq!(received[0].body, Zone::create_body());
    }

    #[tokio::test]
    async fn test_cluster_identity_read_after_async_operation() {
        let arm = ScriptedArm::start(|base| {
            vec![
                Reply::json(201, json!({"properties": {"provisioningState": "Creating"}}))
                    .header("azure-asyncoperation", format!("{}/operations/mc-1", base)),
                Reply::json(200, json!({"status": "InProgress"})),
                Reply::json(200, json!({"status": "Succeeded"})),
                Reply::json(
                    200,
                    json!({
                        "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/c1",
                        "name": "c1",
                        "properties": {
                            "provisioningState": "Succeeded",
                            "networkProfile": {"dnsServiceIP": "10.0.0.10"},
                            "identityProfile": {
                                "kubeletidentity": {"objectId": "principal-1", "clientId": "client-1"}
                            }
                        }
                    }),
                ),
            ]
        })
        .await;
        let client = ArmResourceClient::new(arm.client());

        let id = ResourceId::new("s", "rg", "Microsoft.ContainerService", "managedClusters", "c1");
        let subnet = ResourceId::new("s", "rg", "Microsoft.Network", "virtualNetworks", "v")
            .child("subnets", "sn");
        let spec = ClusterSpec::new(id.clone(), "westus", subnet);

        let cluster = client.create_cluster(&spec).await.unwrap();
        assert_eq!(cluster.principal_id(), "principal-1");
        assert_eq!(cluster.client_id(), "client-1");
        assert_eq!(cluster.dns_service_ip(), "10.0.0.10");

        let received = arm.received();
        assert_eq!(received.len(), 4);
        assert_eq!(received[0].method, "PUT");
        assert_eq!(received[0].body, spec.to_arm_body());
        assert_eq!(received[3].method, "GET");
        assert_eq!(received[3].path, id.to_string());
    }

    #[tokio::test]
    async fn test_private_zone_link_is_a_zone_child() {
        let arm = ScriptedArm::start(|_| {
            vec![Reply::json(200, json!({"properties": {"provisioningState": "Succeeded"}}))]
        })
        .await;
        let client = ArmResourceClient::new(arm.client());

        let zone = PrivateZone::new(ResourceId::new(
            "s",
            "rg",
            "Microsoft.Network",
            "privateDnsZones",
            "p-one.com",
        ));
        let vnet = VirtualNetwork::new(
            ResourceId::new("s", "rg", "Microsoft.Network", "virtualNetworks", "vnet-a"),
            "subnet-a",
        );
        client.link_private_zone(&zone, "vnet-a-link", &vnet).await.unwrap();

        let received = arm.received();
        assert_eq!(
            received[0].path,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/privateDnsZones/p-one.com/virtualNetworkLinks/vnet-a-link"
        );
        assert_eq!(received[0].body, PrivateZone::link_body(vnet.id()));
    }
}
