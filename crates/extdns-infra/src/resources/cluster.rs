//! Managed cluster shaping and post-create identity resolution

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use extdns_common::{Error, ResourceId, Result};

use super::{ArmResource, ResourceKind};

const DNS_PREFIX: &str = "extdnse2e";
const NODE_RESOURCE_GROUP_MAX_LEN: usize = 80;
const KUBELET_IDENTITY: &str = "kubeletidentity";

/// Add-on state on a managed cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddonProfile {
    /// Whether the add-on is enabled
    pub enabled: bool,
    /// Add-on specific settings
    pub config: BTreeMap<String, String>,
}

/// Everything sent to ARM when creating a managed cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSpec {
    /// Cluster id (subscription, resource group and name)
    pub id: ResourceId,
    /// Region
    pub location: String,
    /// Subnet the node pool joins
    pub subnet_id: ResourceId,
    /// DNS prefix of the API server FQDN
    pub dns_prefix: String,
    /// Resource group AKS manages node resources in
    pub node_resource_group: String,
    /// Node pool VM size
    pub vm_size: String,
    /// Node pool size
    pub node_count: u32,
    /// Whether the API server has only a private endpoint
    pub private_cluster: bool,
    /// Enabled add-ons keyed by add-on name
    pub addons: BTreeMap<String, AddonProfile>,
    /// Names of the options applied to this spec
    pub options: BTreeSet<String>,
}

impl ClusterSpec {
    /// Default dual-stack kubenet cluster with a two-node system pool
    pub fn new(id: ResourceId, location: impl Into<String>, subnet_id: ResourceId) -> Self {
        let node_resource_group = truncate(&format!("MC_{}", id.name()), NODE_RESOURCE_GROUP_MAX_LEN);
        let addons = BTreeMap::from([(
            "azureKeyvaultSecretsProvider".to_string(),
            AddonProfile {
                enabled: true,
                config: BTreeMap::from([("enableSecretRotation".to_string(), "true".to_string())]),
            },
        )]);

        Self {
            id,
            location: location.into(),
            subnet_id,
            dns_prefix: DNS_PREFIX.to_string(),
            node_resource_group,
            vm_size: "Standard_DS3_v2".to_string(),
            node_count: 2,
            private_cluster: false,
            addons,
            options: BTreeSet::new(),
        }
    }

    /// Apply options in order, recording their names
    pub fn with_options(self, options: &[ClusterOption]) -> Self {
        options.iter().fold(self, |spec, opt| opt.apply(spec))
    }

    /// Request body for `PUT managedClusters/{name}`
    pub fn to_arm_body(&self) -> Value {
        let addons: serde_json::Map<String, Value> = self
            .addons
            .iter()
            .map(|(name, addon)| {
                let mut profile = json!({ "enabled": addon.enabled });
                if !addon.config.is_empty() {
                    profile["config"] = json!(addon.config);
                }
                (name.clone(), profile)
            })
            .collect();

        let mut body = json!({
            "location": self.location,
            "identity": { "type": "SystemAssigned" },
            "properties": {
                "dnsPrefix": self.dns_prefix,
                "nodeResourceGroup": self.node_resource_group,
                "agentPoolProfiles": [{
                    "name": "default",
                    "vmSize": self.vm_size,
                    "count": self.node_count,
                    "mode": "System",
                    "vnetSubnetID": self.subnet_id.to_string(),
                }],
                "addonProfiles": addons,
                "networkProfile": {
                    "networkPlugin": "kubenet",
                    "ipFamilies": ["IPv4", "IPv6"],
                },
            }
        });
        if self.private_cluster {
            body["properties"]["apiServerAccessProfile"] = json!({ "enablePrivateCluster": true });
        }
        body
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Named mutation of a [`ClusterSpec`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterOption {
    /// API server only reachable from inside the virtual network
    PrivateCluster,
    /// Open Service Mesh add-on
    OpenServiceMesh,
}

impl ClusterOption {
    /// Name recorded on the cluster and in snapshots
    pub fn name(&self) -> &'static str {
        match self {
            ClusterOption::PrivateCluster => "private cluster",
            ClusterOption::OpenServiceMesh => "osm cluster",
        }
    }

    /// Return `spec` with this option applied
    pub fn apply(&self, mut spec: ClusterSpec) -> ClusterSpec {
        match self {
            ClusterOption::PrivateCluster => spec.private_cluster = true,
            ClusterOption::OpenServiceMesh => {
                spec.addons.insert(
                    "openServiceMesh".to_string(),
                    AddonProfile {
                        enabled: true,
                        ..Default::default()
                    },
                );
            }
        }
        spec.options.insert(self.name().to_string());
        spec
    }
}

impl fmt::Display for ClusterOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClusterOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "private cluster" => Ok(ClusterOption::PrivateCluster),
            "osm cluster" => Ok(ClusterOption::OpenServiceMesh),
            other => Err(Error::validation(format!("unknown cluster option {:?}", other))),
        }
    }
}

/// A created managed cluster with its resolved kubelet identity
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    id: ResourceId,
    location: String,
    dns_service_ip: String,
    principal_id: String,
    client_id: String,
    options: BTreeSet<String>,
}

impl Cluster {
    /// Rebuild a handle to an existing cluster
    pub fn load(
        id: ResourceId,
        location: impl Into<String>,
        dns_service_ip: impl Into<String>,
        principal_id: impl Into<String>,
        client_id: impl Into<String>,
        options: BTreeSet<String>,
    ) -> Self {
        Self {
            id,
            location: location.into(),
            dns_service_ip: dns_service_ip.into(),
            principal_id: principal_id.into(),
            client_id: client_id.into(),
            options,
        }
    }

    /// Resolve a cluster from the final create response
    ///
    /// Fails if any identifying field is missing, so a half-populated cluster
    /// never reaches role assignment.
    pub fn from_created(spec: &ClusterSpec, body: &Value) -> Result<Self> {
        let field = |pointer: &str, what: &str| -> Result<String> {
            body.pointer(pointer)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::validation(format!("managed cluster {} is missing", what)))
        };

        if body.get("properties").map_or(true, Value::is_null) {
            return Err(Error::validation("managed cluster properties is missing"));
        }
        let identity = body
            .pointer("/properties/identityProfile")
            .ok_or_else(|| Error::validation("managed cluster identity profile is missing"))?
            .get(KUBELET_IDENTITY)
            .ok_or_else(|| Error::validation("kubelet identity not found"))?;

        field("/name", "name")?;
        let id: ResourceId = field("/id", "id")?.parse()?;
        let dns_service_ip = field("/properties/networkProfile/dnsServiceIP", "dns service ip")?;
        let principal_id = identity
            .get("objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("kubelet identity object id is missing"))?;
        let client_id = identity
            .get("clientId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("kubelet identity client id is missing"))?;

        Ok(Self::load(
            id,
            spec.location.clone(),
            dns_service_ip,
            principal_id,
            client_id,
            spec.options.clone(),
        ))
    }

    /// Subscription the cluster lives in
    pub fn subscription_id(&self) -> &str {
        self.id.subscription_id()
    }

    /// Resource group the cluster lives in
    pub fn resource_group(&self) -> &str {
        self.id.resource_group_name()
    }

    /// Region
    pub fn location(&self) -> &str {
        &self.location
    }

    /// In-cluster DNS service address
    pub fn dns_service_ip(&self) -> &str {
        &self.dns_service_ip
    }

    /// Object id of the kubelet identity, the principal granted roles
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    /// Client id of the kubelet identity, used by workloads for MSI auth
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Names of the options the cluster was created with
    pub fn options(&self) -> &BTreeSet<String> {
        &self.options
    }
}

impl ArmResource for Cluster {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.name()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ManagedCluster
    }
}
