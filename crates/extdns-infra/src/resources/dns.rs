use serde_json::{json, Value};

use extdns_common::ResourceId;

use super::{ArmResource, ResourceKind};

/// A public DNS zone
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    id: ResourceId,
    nameservers: Vec<String>,
}

impl Zone {
    /// Build a zone handle from its id and delegated nameservers
    pub fn new(id: ResourceId, nameservers: Vec<String>) -> Self {
        Self { id, nameservers }
    }

    /// Nameservers the zone is served from
    pub fn nameservers(&self) -> &[String] {
        &self.nameservers
    }

    pub(crate) fn create_body() -> Value {
        json!({ "location": "global" })
    }

    /// Nameservers from a zone GET/PUT response
    pub(crate) fn nameservers_from(body: &Value) -> Vec<String> {
        body.pointer("/properties/nameServers")
            .and_then(Value::as_array)
            .map(|ns| {
                ns.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ArmResource for Zone {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.name()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::DnsZone
    }
}

/// A private DNS zone, resolvable only from linked virtual networks
#[derive(Clone, Debug, PartialEq)]
pub struct PrivateZone {
    id: ResourceId,
}

impl PrivateZone {
    /// Build a private zone handle from its id
    pub fn new(id: ResourceId) -> Self {
        Self { id }
    }

    pub(crate) fn create_body() -> Value {
        json!({ "location": "global" })
    }

    pub(crate) fn link_body(vnet_id: &ResourceId) -> Value {
        json!({
            "location": "global",
            "properties": {
                "virtualNetwork": { "id": vnet_id.to_string() },
                "registrationEnabled": false,
            }
        })
    }
}

impl ArmResource for PrivateZone {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.name()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::PrivateDnsZone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nameservers_from_response() {
        let body = json!({
            "properties": {
                "nameServers": ["ns1-01.azure-dns.com.", "ns2-01.azure-dns.net."]
            }
        });
        assert_eq!(
            Zone::nameservers_from(&body),
            vec!["ns1-01.azure-dns.com.", "ns2-01.azure-dns.net."]
        );
        assert!(Zone::nameservers_from(&json!({})).is_empty());
    }

    #[test]
    fn test_link_body_references_vnet() {
        let vnet = ResourceId::new("s", "rg", "Microsoft.Network", "virtualNetworks", "v");
        let body = PrivateZone::link_body(&vnet);
        assert_eq!(
            body["properties"]["virtualNetwork"]["id"],
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v"
        );
        assert_eq!(body["properties"]["registrationEnabled"], false);
    }
}
