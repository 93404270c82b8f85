use serde_json::{json, Value};

use extdns_common::ResourceId;

use super::{ArmResource, ResourceKind};

/// Requested shape of the virtual network a cluster joins
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualNetworkSpec {
    /// Network name
    pub name: String,
    /// Name of its single subnet
    pub subnet_name: String,
    /// Network address prefixes (IPv4 and IPv6)
    pub address_prefixes: Vec<String>,
    /// Subnet address prefixes (IPv4 and IPv6)
    pub subnet_prefixes: Vec<String>,
}

impl Default for VirtualNetworkSpec {
    fn default() -> Self {
        Self {
            name: "sample-virtual-network".to_string(),
            subnet_name: "sample-subnet".to_string(),
            address_prefixes: vec!["10.1.0.0/16".to_string(), "fd00:db8:deca::/48".to_string()],
            subnet_prefixes: vec![
                "10.1.0.0/24".to_string(),
                "fd00:db8:deca:deed::/64".to_string(),
            ],
        }
    }
}

impl VirtualNetworkSpec {
    /// Network for the `index`th infrastructure sharing a resource group
    ///
    /// Names carry `suffix` and address ranges are offset by `index`, so
    /// sibling networks never collide or overlap.
    pub fn numbered(suffix: &str, index: u8) -> Self {
        let v4 = 1 + u16::from(index);
        let v6 = 0xdeca + u16::from(index);
        Self {
            name: format!("vnet{}", suffix),
            subnet_name: format!("subnet{}", suffix),
            address_prefixes: vec![format!("10.{}.0.0/16", v4), format!("fd00:db8:{:x}::/48", v6)],
            subnet_prefixes: vec![
                format!("10.{}.0.0/24", v4),
                format!("fd00:db8:{:x}:deed::/64", v6),
            ],
        }
    }

    pub(crate) fn create_body(&self, location: &str) -> Value {
        json!({
            "location": location,
            "properties": {
                "addressSpace": { "addressPrefixes": self.address_prefixes },
                "subnets": [{
                    "name": self.subnet_name,
                    "properties": { "addressPrefixes": self.subnet_prefixes },
                }],
            }
        })
    }
}

/// A virtual network and the subnet clusters are placed in
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualNetwork {
    vnet_id: ResourceId,
    subnet_id: ResourceId,
}

impl VirtualNetwork {
    /// Build a handle from the network id and subnet name
    pub fn new(vnet_id: ResourceId, subnet_name: &str) -> Self {
        let subnet_id = vnet_id.clone().child("subnets", subnet_name);
        Self { vnet_id, subnet_id }
    }

    /// Id of the cluster subnet
    pub fn subnet_id(&self) -> &ResourceId {
        &self.subnet_id
    }

    /// Name of the cluster subnet
    pub fn subnet_name(&self) -> &str {
        self.subnet_id.name()
    }
}

impl ArmResource for VirtualNetwork {
    fn id(&self) -> &ResourceId {
        &self.vnet_id
    }

    fn name(&self) -> &str {
        self.vnet_id.name()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualNetwork
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_is_dual_stack() {
        let body = VirtualNetworkSpec::default().create_body("westus");
        assert_eq!(
            body["properties"]["addressSpace"]["addressPrefixes"],
            json!(["10.1.0.0/16", "fd00:db8:deca::/48"])
        );
        assert_eq!(body["properties"]["subnets"][0]["name"], "sample-subnet");
        assert_eq!(
            body["properties"]["subnets"][0]["properties"]["addressPrefixes"],
            json!(["10.1.0.0/24", "fd00:db8:deca:deed::/64"])
        );
    }

    #[test]
    fn test_numbered_networks_do_not_overlap() {
        let first = VirtualNetworkSpec::numbered("-a", 0);
        let second = VirtualNetworkSpec::numbered("-b", 1);

        assert_eq!(first.name, "vnet-a");
        assert_eq!(first.subnet_name, "subnet-a");
        assert_eq!(first.address_prefixes, VirtualNetworkSpec::default().address_prefixes);
        assert_eq!(
            second.subnet_prefixes,
            vec!["10.2.0.0/24", "fd00:db8:decb:deed::/64"]
        );
        assert_ne!(first.name, second.name);
        assert_ne!(first.subnet_prefixes[0], second.subnet_prefixes[0]);
    }

    #[test]
    fn test_subnet_id_derived_from_vnet() {
        let vnet_id = ResourceId::new("s", "rg", "Microsoft.Network", "virtualNetworks", "v");
        let vnet = VirtualNetwork::new(vnet_id, "sn");
        assert_eq!(vnet.name(), "v");
        assert_eq!(vnet.subnet_name(), "sn");
        assert_eq!(
            vnet.subnet_id().to_string(),
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v/subnets/sn"
        );
    }
}
