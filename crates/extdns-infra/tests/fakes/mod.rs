//! In-memory collaborators that record what the provisioner does and when

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio::time::Instant;

use extdns_common::{Error, ResourceId, Result};
use extdns_infra::command::{CommandRequest, CommandResult, CommandTransport};
use extdns_infra::manifests::{unpack_manifests, Manifest};
use extdns_infra::resources::{
    ArmResource, Cluster, ClusterSpec, PrivateZone, ResourceClient, ResourceGroup, VirtualNetwork,
    VirtualNetworkSpec, Zone,
};
use extdns_infra::role_assignment::{Role, RoleAssigner};

pub const PRINCIPAL_ID: &str = "kubelet-principal";
pub const CLIENT_ID: &str = "kubelet-client";

/// One recorded call, with start and end offsets from the recorder's epoch
#[derive(Clone, Debug)]
pub struct Event {
    pub op: String,
    pub target: String,
    pub started: Duration,
    pub finished: Duration,
}

#[derive(Clone)]
pub struct Recorder {
    epoch: Instant,
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn timed(&self, op: &str, target: &str, delay: Duration) {
        let started = self.elapsed();
        tokio::time::sleep(delay).await;
        self.events.lock().unwrap().push(Event {
            op: op.to_string(),
            target: target.to_string(),
            started,
            finished: self.elapsed(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn ops(&self, op: &str) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.op == op).collect()
    }
}

/// Resource client where every create takes `delay`
pub struct FakeResources {
    pub recorder: Recorder,
    pub delay: Duration,
}

#[async_trait]
impl ResourceClient for FakeResources {
    async fn create_resource_group(
        &self,
        subscription_id: &str,
        name: &str,
        _location: &str,
        _ttl: Duration,
    ) -> Result<ResourceGroup> {
        self.recorder.timed("resource_group", name, self.delay).await;
        Ok(ResourceGroup::new(ResourceId::resource_group(subscription_id, name)))
    }

    async fn create_zone(&self, resource_group: &ResourceGroup, name: &str) -> Result<Zone> {
        self.recorder.timed("zone", name, self.delay).await;
        let id = ResourceId::new(
            resource_group.subscription_id(),
            resource_group.name(),
            "Microsoft.Network",
            "dnsZones",
            name,
        );
        Ok(Zone::new(id, vec![format!("ns1.{}.", name)]))
    }

    async fn create_private_zone(
        &self,
        resource_group: &ResourceGroup,
        name: &str,
    ) -> Result<PrivateZone> {
        self.recorder.timed("private_zone", name, self.delay).await;
        Ok(PrivateZone::new(ResourceId::new(
            resource_group.subscription_id(),
            resource_group.name(),
            "Microsoft.Network",
            "privateDnsZones",
            name,
        )))
    }

    async fn create_virtual_network(
        &self,
        resource_group: &ResourceGroup,
        _location: &str,
        spec: &VirtualNetworkSpec,
    ) -> Result<VirtualNetwork> {
        self.recorder.timed("vnet", &spec.name, self.delay).await;
        let id = ResourceId::new(
            resource_group.subscription_id(),
            resource_group.name(),
            "Microsoft.Network",
            "virtualNetworks",
            &spec.name,
        );
        Ok(VirtualNetwork::new(id, &spec.subnet_name))
    }

    async fn link_private_zone(
        &self,
        zone: &PrivateZone,
        _link_name: &str,
        _vnet: &VirtualNetwork,
    ) -> Result<()> {
        self.recorder.timed("link", zone.name(), self.delay).await;
        Ok(())
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<Cluster> {
        self.recorder.timed("cluster", spec.id.name(), self.delay).await;
        Ok(Cluster::load(
            spec.id.clone(),
            &spec.location,
            "10.0.0.10",
            PRINCIPAL_ID,
            CLIENT_ID,
            spec.options.clone(),
        ))
    }
}

/// Role assigner that records every grant and fails for scopes named in
/// `fail_scopes`
pub struct FakeRoles {
    pub recorder: Recorder,
    pub delay: Duration,
    pub fail_scopes: HashSet<String>,
    pub grants: Mutex<Vec<(String, String, Role)>>,
}

impl FakeRoles {
    pub fn new(recorder: Recorder, delay: Duration) -> Self {
        Self {
            recorder,
            delay,
            fail_scopes: HashSet::new(),
            grants: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RoleAssigner for FakeRoles {
    async fn assign(
        &self,
        _subscription_id: &str,
        scope: &ResourceId,
        principal_id: &str,
        role: Role,
    ) -> Result<()> {
        self.recorder.timed("assign", scope.name(), self.delay).await;
        self.grants
            .lock()
            .unwrap()
            .push((scope.to_string(), principal_id.to_string(), role));
        if self.fail_scopes.contains(scope.name()) {
            return Err(Error::arm(
                "PUT roleAssignments",
                403,
                "AuthorizationFailed",
                "principal cannot assign roles",
            ));
        }
        Ok(())
    }
}

/// Transport that succeeds instantly and keeps every command it sees
pub struct FakeTransport {
    pub recorder: Recorder,
    pub commands: Mutex<Vec<CommandRequest>>,
}

impl FakeTransport {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Manifests staged by every `kubectl apply`, in submission order
    pub fn applied(&self) -> Vec<Vec<Manifest>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.context.as_ref())
            .map(|encoded| {
                let archive = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .unwrap();
                unpack_manifests(&archive).unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl CommandTransport for FakeTransport {
    async fn run(&self, cluster: &ResourceId, request: &CommandRequest) -> Result<CommandResult> {
        self.recorder
            .timed("command", cluster.name(), Duration::ZERO)
            .await;
        self.commands.lock().unwrap().push(request.clone());
        Ok(CommandResult {
            logs: String::new(),
            exit_code: 0,
        })
    }
}
