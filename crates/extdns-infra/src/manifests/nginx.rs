//! nginx test workload fronted by IPv4 and IPv6 LoadBalancer services
//!
//! ExternalDNS publishes A and AAAA records for these services, which is what
//! the DNS suites assert against.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, PodSpec, PodTemplateSpec, PreferredSchedulingTerm, Service, ServicePort,
    ServiceSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use extdns_common::{Result, KUBE_SYSTEM_NAMESPACE, MANAGED_BY_KEY, MANAGED_BY_VALUE};

use super::Manifest;

/// Name of the backing Deployment
pub const NGINX_NAME: &str = "nginx";
/// Service published with an IPv4 address
pub const IPV4_SERVICE_NAME: &str = "nginx-svc-ipv4";
/// Service published with an IPv6 address
pub const IPV6_SERVICE_NAME: &str = "nginx-svc-ipv6";

fn selector() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), NGINX_NAME.to_string())])
}

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(KUBE_SYSTEM_NAMESPACE.to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_KEY.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

fn requirement(key: &str, operator: &str, values: &[&str]) -> NodeSelectorRequirement {
    NodeSelectorRequirement {
        key: key.to_string(),
        operator: operator.to_string(),
        values: if values.is_empty() {
            None
        } else {
            Some(values.iter().map(|v| v.to_string()).collect())
        },
    }
}

/// Schedule a pod onto system nodes when possible
///
/// Adds the system-node-critical priority class, tolerates the
/// CriticalAddonsOnly taint, prefers nodes in system mode and requires Linux
/// AKS nodes that are not virtual kubelets.
pub fn with_prefer_system_nodes(spec: &PodSpec) -> PodSpec {
    let mut spec = spec.clone();
    spec.priority_class_name = Some("system-node-critical".to_string());

    spec.tolerations.get_or_insert_with(Vec::new).push(Toleration {
        key: Some("CriticalAddonsOnly".to_string()),
        operator: Some("Exists".to_string()),
        ..Default::default()
    });

    let node_affinity = spec
        .affinity
        .get_or_insert_with(Affinity::default)
        .node_affinity
        .get_or_insert_with(NodeAffinity::default);

    node_affinity
        .preferred_during_scheduling_ignored_during_execution
        .get_or_insert_with(Vec::new)
        .push(PreferredSchedulingTerm {
            weight: 100,
            preference: NodeSelectorTerm {
                match_expressions: Some(vec![requirement(
                    "kubernetes.azure.com/mode",
                    "In",
                    &["system"],
                )]),
                ..Default::default()
            },
        });

    node_affinity
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(NodeSelector::default)
        .node_selector_terms
        .push(NodeSelectorTerm {
            match_expressions: Some(vec![
                requirement("kubernetes.azure.com/cluster", "Exists", &[]),
                requirement("type", "NotIn", &["virtual-kubelet"]),
                requirement("kubernetes.io/os", "In", &["linux"]),
            ]),
            ..Default::default()
        });

    spec
}

/// Single-replica nginx Deployment in kube-system
pub fn deployment() -> Deployment {
    let pod_spec = PodSpec {
        containers: vec![Container {
            name: NGINX_NAME.to_string(),
            image: Some("nginx".to_string()),
            ports: Some(vec![ContainerPort {
                container_port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }],
        ..Default::default()
    };

    Deployment {
        metadata: metadata(NGINX_NAME),
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(selector()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector()),
                    ..Default::default()
                }),
                spec: Some(with_prefer_system_nodes(&pod_spec)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(name: &str, ip_families: Option<Vec<String>>) -> Service {
    Service {
        metadata: metadata(name),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            external_traffic_policy: Some("Cluster".to_string()),
            selector: Some(selector()),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port: 80,
                target_port: Some(IntOrString::Int(80)),
                ..Default::default()
            }]),
            ip_families,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The IPv4 and IPv6 LoadBalancer services in front of nginx
pub fn services() -> (Service, Service) {
    (
        service(IPV4_SERVICE_NAME, None),
        service(IPV6_SERVICE_NAME, Some(vec!["IPv6".to_string()])),
    )
}

/// Deployment followed by both services, ready to apply
pub fn nginx_manifests() -> Result<Vec<Manifest>> {
    let (ipv4, ipv6) = services();
    Ok(vec![
        Manifest::from_resource(&deployment())?,
        Manifest::from_resource(&ipv4)?,
        Manifest::from_resource(&ipv6)?,
    ])
}
