//! Serializable snapshot of provisioned infrastructure
//!
//! A provisioning run can hand its results to a later test process as JSON.
//! The snapshot holds plain data only (ids, names, cluster identity) and
//! converts losslessly to and from [`Provisioned`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use extdns_common::{Error, ResourceId, Result};

use crate::provisioner::Provisioned;
use crate::resources::{ArmResource, Cluster, PrivateZone, ResourceGroup, Zone};

/// Marker value for set-like maps serialized as `{"name": {}}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Present {}

/// A public zone in a snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadableZone {
    /// ARM id of the zone
    pub resource_id: ResourceId,
    /// Authoritative nameservers
    pub nameservers: Vec<String>,
}

/// A private zone in a snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadablePrivateZone {
    /// ARM id of the zone
    pub resource_id: ResourceId,
}

/// Plain-data form of [`Provisioned`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadableProvisioned {
    /// Infrastructure name
    pub name: String,
    /// ARM id of the cluster
    pub cluster: ResourceId,
    /// Cluster region
    pub cluster_location: String,
    /// In-cluster DNS service address
    pub cluster_dns_service_ip: String,
    /// Object id of the kubelet identity
    pub cluster_principal_id: String,
    /// Client id of the kubelet identity
    pub cluster_client_id: String,
    /// Names of the options the cluster was created with
    #[serde(default)]
    pub cluster_options: BTreeMap<String, Present>,
    /// Public zones, in provisioning order
    pub zones: Vec<LoadableZone>,
    /// Private zones, in provisioning order
    pub private_zones: Vec<LoadablePrivateZone>,
    /// ARM id of the resource group
    pub resource_group: ResourceId,
    /// Subscription
    pub subscription_id: String,
    /// Tenant
    pub tenant_id: String,
    /// Service published with an IPv4 address
    pub ipv4_service_name: String,
    /// Service published with an IPv6 address
    pub ipv6_service_name: String,
}

impl Provisioned {
    /// Plain-data snapshot of this infrastructure
    pub fn loadable(&self) -> LoadableProvisioned {
        LoadableProvisioned {
            name: self.name.clone(),
            cluster: self.cluster.id().clone(),
            cluster_location: self.cluster.location().to_string(),
            cluster_dns_service_ip: self.cluster.dns_service_ip().to_string(),
            cluster_principal_id: self.cluster.principal_id().to_string(),
            cluster_client_id: self.cluster.client_id().to_string(),
            cluster_options: self
                .cluster
                .options()
                .iter()
                .map(|name| (name.clone(), Present {}))
                .collect(),
            zones: self
                .zones
                .iter()
                .map(|zone| LoadableZone {
                    resource_id: zone.id().clone(),
                    nameservers: zone.nameservers().to_vec(),
                })
                .collect(),
            private_zones: self
                .private_zones
                .iter()
                .map(|zone| LoadablePrivateZone {
                    resource_id: zone.id().clone(),
                })
                .collect(),
            resource_group: self.resource_group.id().clone(),
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            ipv4_service_name: self.ipv4_service_name.clone(),
            ipv6_service_name: self.ipv6_service_name.clone(),
        }
    }
}

impl LoadableProvisioned {
    /// Rebuild the live handles
    ///
    /// Fails if the resource group id does not name a resource group.
    pub fn provisioned(&self) -> Result<Provisioned> {
        if !self.resource_group.is_resource_group() {
            return Err(Error::resource_id(
                self.resource_group.to_string(),
                "snapshot resource group is not a resource group id",
            ));
        }

        let cluster = Cluster::load(
            self.cluster.clone(),
            &self.cluster_location,
            &self.cluster_dns_service_ip,
            &self.cluster_principal_id,
            &self.cluster_client_id,
            self.cluster_options.keys().cloned().collect(),
        );

        Ok(Provisioned {
            name: self.name.clone(),
            cluster,
            resource_group: ResourceGroup::new(self.resource_group.clone()),
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            zones: self
                .zones
                .iter()
                .map(|z| Zone::new(z.resource_id.clone(), z.nameservers.clone()))
                .collect(),
            private_zones: self
                .private_zones
                .iter()
                .map(|z| PrivateZone::new(z.resource_id.clone()))
                .collect(),
            ipv4_service_name: self.ipv4_service_name.clone(),
            ipv6_service_name: self.ipv6_service_name.clone(),
        })
    }
}

/// Snapshot every infrastructure, preserving order
pub fn to_loadable(provisioned: &[Provisioned]) -> Vec<LoadableProvisioned> {
    provisioned.iter().map(Provisioned::loadable).collect()
}

/// Rebuild every infrastructure, preserving order
pub fn to_provisioned(loadable: &[LoadableProvisioned]) -> Result<Vec<Provisioned>> {
    loadable.iter().map(LoadableProvisioned::provisioned).collect()
}

/// Serialize a snapshot list as pretty JSON
pub fn snapshot_to_json(loadable: &[LoadableProvisioned]) -> Result<String> {
    serde_json::to_string_pretty(loadable)
        .map_err(|e| Error::serialization(format!("encoding snapshot: {}", e)))
}

/// Parse a snapshot list written by [`snapshot_to_json`]
pub fn snapshot_from_json(json: &str) -> Result<Vec<LoadableProvisioned>> {
    serde_json::from_str(json).map_err(|e| Error::serialization(format!("decoding snapshot: {}", e)))
}
