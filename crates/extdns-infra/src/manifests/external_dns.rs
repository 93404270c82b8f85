//! ExternalDNS deployment manifests for the Azure public and private DNS
//! providers

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, ServiceAccount, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::json;

use extdns_common::{
    Error, ResourceId, Result, KUBE_SYSTEM_NAMESPACE, MANAGED_BY_KEY, MANAGED_BY_VALUE,
};

use super::Manifest;
use crate::resources::{ArmResource, Cluster};

/// ExternalDNS release deployed by the suite
const EXTERNAL_DNS_VERSION: &str = "v0.15.0";

const CONFIG_MOUNT_PATH: &str = "/etc/kubernetes";
const CONFIG_FILE: &str = "azure.json";

/// Which Azure DNS flavour an ExternalDNS instance manages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DnsProvider {
    /// `Microsoft.Network/dnsZones`
    Public,
    /// `Microsoft.Network/privateDnsZones`
    Private,
}

impl DnsProvider {
    fn resource_prefix(&self) -> &'static str {
        match self {
            DnsProvider::Public => "external-dns",
            DnsProvider::Private => "external-dns-private",
        }
    }

    fn provider_flag(&self) -> &'static str {
        match self {
            DnsProvider::Public => "azure",
            DnsProvider::Private => "azure-private-dns",
        }
    }
}

/// Zones one ExternalDNS instance is responsible for
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalDnsConfig {
    /// Azure AD tenant
    pub tenant_id: String,
    /// Subscription holding the zones
    pub subscription: String,
    /// Resource group holding the zones
    pub resource_group: String,
    /// Public or private zones
    pub provider: DnsProvider,
    /// Ids of the managed zones
    pub zone_resource_ids: Vec<ResourceId>,
}

impl ExternalDnsConfig {
    /// Configuration for a set of zones of one provider
    pub fn new(tenant_id: &str, provider: DnsProvider, zone_resource_ids: Vec<ResourceId>) -> Result<Self> {
        let first = zone_resource_ids
            .first()
            .ok_or_else(|| Error::validation("external dns config needs at least one zone"))?;

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            subscription: first.subscription_id().to_string(),
            resource_group: first.resource_group_name().to_string(),
            provider,
            zone_resource_ids,
        })
    }
}

/// Cluster-wide ExternalDNS settings
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalDnsSettings {
    /// Namespace ExternalDNS runs in
    pub namespace: String,
    /// Client id of the managed identity ExternalDNS authenticates as
    pub msi_client_id: String,
    /// Owner id written into TXT ownership records
    pub txt_owner_id: String,
    /// Reconcile interval
    pub sync_interval: Duration,
    /// Container registry hosting the image
    pub registry: String,
}

impl ExternalDnsSettings {
    /// Settings for running on `cluster` with its kubelet identity
    pub fn for_cluster(cluster: &Cluster) -> Self {
        Self {
            namespace: KUBE_SYSTEM_NAMESPACE.to_string(),
            msi_client_id: cluster.client_id().to_string(),
            txt_owner_id: cluster.name().to_string(),
            sync_interval: Duration::from_secs(3 * 60),
            registry: "mcr.microsoft.com".to_string(),
        }
    }
}

/// Format a duration the way Go's `time.Duration` flag parser expects
fn go_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{}s", s),
        (0, m, s) => format!("{}m{}s", m, s),
        (h, m, s) => format!("{}h{}m{}s", h, m, s),
    }
}

fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), name.to_string()),
        (MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

fn metadata(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels(name)),
        ..Default::default()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn service_account(name: &str, settings: &ExternalDnsSettings) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(name, Some(&settings.namespace)),
        ..Default::default()
    }
}

fn cluster_role(name: &str) -> ClusterRole {
    ClusterRole {
        metadata: metadata(name, None),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(strings(&["services", "endpoints", "pods", "nodes"])),
                verbs: strings(&["get", "watch", "list"]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&["extensions", "networking.k8s.io"])),
                resources: Some(strings(&["ingresses"])),
                verbs: strings(&["get", "watch", "list"]),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn cluster_role_binding(name: &str, settings: &ExternalDnsSettings) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: metadata(&format!("{}-viewer", name), None),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(settings.namespace.clone()),
            ..Default::default()
        }]),
    }
}

fn config_map(
    name: &str,
    settings: &ExternalDnsSettings,
    config: &ExternalDnsConfig,
) -> Result<ConfigMap> {
    let azure_json = serde_json::to_string_pretty(&json!({
        "tenantId": config.tenant_id,
        "subscriptionId": config.subscription,
        "resourceGroup": config.resource_group,
        "useManagedIdentityExtension": true,
        "userAssignedIdentityID": settings.msi_client_id,
    }))
    .map_err(|e| Error::serialization_for("ConfigMap", name, e.to_string()))?;

    Ok(ConfigMap {
        metadata: metadata(name, Some(&settings.namespace)),
        data: Some(BTreeMap::from([(CONFIG_FILE.to_string(), azure_json)])),
        ..Default::default()
    })
}

fn deployment(name: &str, settings: &ExternalDnsSettings, config: &ExternalDnsConfig) -> Deployment {
    let mut args = vec![
        format!("--provider={}", config.provider.provider_flag()),
        "--source=service".to_string(),
        "--source=ingress".to_string(),
        format!("--interval={}", go_duration(settings.sync_interval)),
        format!("--txt-owner-id={}", settings.txt_owner_id),
        format!("--azure-resource-group={}", config.resource_group),
        format!("--azure-config-file={}/{}", CONFIG_MOUNT_PATH, CONFIG_FILE),
    ];
    args.extend(
        config
            .zone_resource_ids
            .iter()
            .map(|id| format!("--domain-filter={}", id.name())),
    );

    let selector = BTreeMap::from([("app".to_string(), name.to_string())]);

    Deployment {
        metadata: metadata(name, Some(&settings.namespace)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name.to_string()),
                    containers: vec![Container {
                        name: "controller".to_string(),
                        image: Some(format!(
                            "{}/oss/v2/kubernetes/external-dns:{}",
                            settings.registry, EXTERNAL_DNS_VERSION
                        )),
                        args: Some(args),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "azure-config".to_string(),
                            mount_path: CONFIG_MOUNT_PATH.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "azure-config".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: name.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// All objects needed to run one ExternalDNS instance per config
///
/// Per config, in apply order: ServiceAccount, ClusterRole,
/// ClusterRoleBinding, ConfigMap, Deployment.
pub fn external_dns_resources(
    settings: &ExternalDnsSettings,
    configs: &[ExternalDnsConfig],
) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::with_capacity(configs.len() * 5);

    for config in configs {
        let name = config.provider.resource_prefix();
        manifests.push(Manifest::from_resource(&service_account(name, settings))?);
        manifests.push(Manifest::from_resource(&cluster_role(name))?);
        manifests.push(Manifest::from_resource(&cluster_role_binding(name, settings))?);
        manifests.push(Manifest::from_resource(&config_map(name, settings, config)?)?);
        manifests.push(Manifest::from_resource(&deployment(name, settings, config))?);
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn settings() -> ExternalDnsSettings {
        ExternalDnsSettings {
            namespace: "kube-system".to_string(),
            msi_client_id: "client-1".to_string(),
            txt_owner_id: "cluster1".to_string(),
            sync_interval: Duration::from_secs(180),
            registry: "mcr.microsoft.com".to_string(),
        }
    }

    fn zone(kind: &str, name: &str) -> ResourceId {
        ResourceId::new("sub", "rg", "Microsoft.Network", kind, name)
    }

    #[test]
    fn test_go_duration() {
        assert_eq!(go_duration(Duration::from_secs(180)), "3m0s");
        assert_eq!(go_duration(Duration::from_secs(45)), "45s");
        assert_eq!(go_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_config_requires_a_zone() {
        assert!(ExternalDnsConfig::new("t", DnsProvider::Public, vec![]).is_err());

        let config =
            ExternalDnsConfig::new("t", DnsProvider::Public, vec![zone("dnsZones", "a.com")]).unwrap();
        assert_eq!(config.subscription, "sub");
        assert_eq!(config.resource_group, "rg");
    }

    #[test]
    fn test_resources_per_provider() {
        let configs = vec![
            ExternalDnsConfig::new(
                "t",
                DnsProvider::Public,
                vec![zone("dnsZones", "a.com"), zone("dnsZones", "b.com")],
            )
            .unwrap(),
            ExternalDnsConfig::new("t", DnsProvider::Private, vec![zone("privateDnsZones", "p.com")])
                .unwrap(),
        ];

        let manifests = external_dns_resources(&settings(), &configs).unwrap();
        let kinds: Vec<_> = manifests.iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "ServiceAccount",
                "ClusterRole",
                "ClusterRoleBinding",
                "ConfigMap",
                "Deployment",
                "ServiceAccount",
                "ClusterRole",
                "ClusterRoleBinding",
                "ConfigMap",
                "Deployment",
            ]
        );
        assert!(manifests
            .iter()
            .all(|m| m.as_value()["metadata"]["labels"]["app.kubernetes.io/managed-by"] == "extdns-e2e"));

        let public = &manifests[4];
        assert_eq!(public.name(), "external-dns");
        let args = public.as_value()["spec"]["template"]["spec"]["containers"][0]["args"]
            .as_array()
            .unwrap()
            .clone();
        assert!(args.contains(&Value::from("--provider=azure")));
        assert!(args.contains(&Value::from("--interval=3m0s")));
        assert!(args.contains(&Value::from("--txt-owner-id=cluster1")));
        assert!(args.contains(&Value::from("--domain-filter=a.com")));
        assert!(args.contains(&Value::from("--domain-filter=b.com")));

        let private = &manifests[9];
        assert_eq!(private.name(), "external-dns-private");
        assert_eq!(
            private.as_value()["spec"]["template"]["spec"]["containers"][0]["args"][0],
            "--provider=azure-private-dns"
        );
    }

    #[test]
    fn test_config_map_carries_identity() {
        let config =
            ExternalDnsConfig::new("tenant", DnsProvider::Public, vec![zone("dnsZones", "a.com")]).unwrap();
        let cm = config_map("external-dns", &settings(), &config).unwrap();
        let raw = &cm.data.unwrap()["azure.json"];
        let parsed: Value = serde_json::from_str(raw).unwrap();

        assert_eq!(parsed["tenantId"], "tenant");
        assert_eq!(parsed["userAssignedIdentityID"], "client-1");
        assert_eq!(parsed["useManagedIdentityExtension"], true);
    }
}
