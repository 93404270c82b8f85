//! Provisioning orchestration
//!
//! Infrastructure is created in a fixed sequence of stages. Work inside a
//! stage runs concurrently and every branch finishes before the stage reports
//! its first error. Stages never overlap:
//!
//! 1. resource group
//! 2. stage A: DNS zones, private DNS zones, virtual network + subnet
//! 3. stage B: link each private zone to the virtual network
//! 4. stage C: managed cluster in the subnet
//! 5. stage D: role assignments for the cluster identity over every zone,
//!    the network and the subnet
//! 6. stage E: deploy ExternalDNS and the nginx test workload, then wait for
//!    everything deployed to be stable
//!
//! Results of concurrent branches are collected by input index, never by
//! completion order. Cloud side effects of a failed or cancelled run are left
//! in place; the resource group's deletion tag cleans them up.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use extdns_common::config::E2eSettings;
use extdns_common::{Error, ResourceId, Result, ResultExt};

use crate::arm::ArmClient;
use crate::command::{ArmCommandTransport, RemoteCommandChannel};
use crate::manifests::external_dns::{
    external_dns_resources, DnsProvider, ExternalDnsConfig, ExternalDnsSettings,
};
use crate::manifests::nginx::{nginx_manifests, IPV4_SERVICE_NAME, IPV6_SERVICE_NAME};
use crate::resources::{
    ArmResource, ArmResourceClient, Cluster, ClusterOption, ClusterSpec, PrivateZone,
    ResourceClient, ResourceGroup, VirtualNetwork, VirtualNetworkSpec, Zone,
    DEFAULT_RESOURCE_GROUP_TTL,
};
use crate::role_assignment::{
    Role, RoleAssigner, RoleAssignmentCoordinator, DNS_ZONE_CONTRIBUTOR, NETWORK_CONTRIBUTOR,
    PRIVATE_DNS_ZONE_CONTRIBUTOR,
};
use crate::stability::{StabilityConfig, StabilityWaiter};

/// What to provision for one named infrastructure
#[derive(Clone, Debug, PartialEq)]
pub struct InfraSpec {
    /// Infrastructure name (e.g. "basic cluster")
    pub name: String,
    /// Unique suffix appended to generated resource names
    pub suffix: String,
    /// Resource group everything is created in
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Options applied to the cluster, in order
    pub cluster_options: Vec<ClusterOption>,
    /// Public zone names
    pub zones: Vec<String>,
    /// Private zone names
    pub private_zones: Vec<String>,
    /// Virtual network the cluster joins
    pub virtual_network: VirtualNetworkSpec,
    /// Lifetime of the resource group before garbage collection
    pub resource_group_ttl: Duration,
}

impl InfraSpec {
    /// Infrastructure with defaults for everything but identity and placement
    pub fn new(
        name: impl Into<String>,
        suffix: impl Into<String>,
        resource_group: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
            resource_group: resource_group.into(),
            location: location.into(),
            cluster_options: Vec::new(),
            zones: Vec::new(),
            private_zones: Vec::new(),
            virtual_network: VirtualNetworkSpec::default(),
            resource_group_ttl: DEFAULT_RESOURCE_GROUP_TTL,
        }
    }

    /// Name of the managed cluster
    pub fn cluster_name(&self) -> String {
        format!("cluster{}", self.suffix)
    }
}

/// Everything provisioned for one infrastructure
#[derive(Clone, Debug, PartialEq)]
pub struct Provisioned {
    /// Infrastructure name
    pub name: String,
    /// The managed cluster
    pub cluster: Cluster,
    /// Resource group holding everything
    pub resource_group: ResourceGroup,
    /// Subscription
    pub subscription_id: String,
    /// Tenant
    pub tenant_id: String,
    /// Public zones, in requested order
    pub zones: Vec<Zone>,
    /// Private zones, in requested order
    pub private_zones: Vec<PrivateZone>,
    /// Service published with an IPv4 address
    pub ipv4_service_name: String,
    /// Service published with an IPv6 address
    pub ipv6_service_name: String,
}

/// Collect branch results in input order, returning the first error
fn first_error<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    results.into_iter().collect()
}

/// Runs the stage graph against injected collaborators
pub struct Provisioner {
    resources: Arc<dyn ResourceClient>,
    roles: Arc<dyn RoleAssigner>,
    channel: RemoteCommandChannel,
    waiter: StabilityWaiter,
}

impl Provisioner {
    /// Create a provisioner
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        roles: Arc<dyn RoleAssigner>,
        channel: RemoteCommandChannel,
        stability: StabilityConfig,
    ) -> Self {
        let waiter = StabilityWaiter::new(channel.clone(), stability);
        Self {
            resources,
            roles,
            channel,
            waiter,
        }
    }

    /// Provisioner whose resources, role assignments and remote commands all
    /// go through one shared ARM client
    pub fn over_arm(arm: Arc<ArmClient>, stability: StabilityConfig) -> Self {
        let transport = ArmCommandTransport::new(arm.clone());
        Self::new(
            Arc::new(ArmResourceClient::new(arm.clone())),
            Arc::new(RoleAssignmentCoordinator::new(arm)),
            RemoteCommandChannel::new(Arc::new(transport)),
            stability,
        )
    }

    /// Provisioner for the Azure environment described by `settings`
    ///
    /// Tokens come from the Azure CLI and Job logs land in
    /// `settings.log_dir`.
    pub fn for_azure(settings: &E2eSettings) -> Result<Self> {
        let arm = ArmClient::for_settings(settings).context("creating ARM client")?;
        info!(endpoint = %arm.endpoint(), "using ARM endpoint");
        Ok(Self::over_arm(
            Arc::new(arm),
            StabilityConfig::in_dir(&settings.log_dir),
        ))
    }

    /// Provision one infrastructure
    ///
    /// Cancelling `cancel` drops every in-flight operation and returns
    /// [`Error::Cancelled`].
    #[instrument(skip(self, cancel, tenant_id, spec), fields(infra = %spec.name))]
    pub async fn provision(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        subscription_id: &str,
        spec: &InfraSpec,
    ) -> Result<Provisioned> {
        info!("provisioning infrastructure");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(format!("provisioning {}", spec.name))),
            result = self.run_stages(tenant_id, subscription_id, spec) => result,
        };

        let provisioned =
            result.with_context(|| format!("provisioning infrastructure {}", spec.name))?;
        info!("finished provisioning infrastructure");
        Ok(provisioned)
    }

    /// Provision several infrastructures concurrently, results in input order
    #[instrument(skip_all, fields(count = specs.len()))]
    pub async fn provision_all(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        subscription_id: &str,
        specs: &[InfraSpec],
    ) -> Result<Vec<Provisioned>> {
        info!("provisioning all infrastructure");
        let results = join_all(
            specs
                .iter()
                .map(|spec| self.provision(cancel, tenant_id, subscription_id, spec)),
        )
        .await;
        let provisioned = first_error(results)?;
        info!("finished provisioning all infrastructure");
        Ok(provisioned)
    }

    async fn run_stages(
        &self,
        tenant_id: &str,
        subscription_id: &str,
        spec: &InfraSpec,
    ) -> Result<Provisioned> {
        let resource_group = self
            .resources
            .create_resource_group(
                subscription_id,
                &spec.resource_group,
                &spec.location,
                spec.resource_group_ttl,
            )
            .await?;

        let (zones, private_zones, vnet) = self.create_networking(spec, &resource_group).await?;
        self.link_private_zones(&private_zones, &vnet).await?;

        let cluster = self.create_cluster(subscription_id, spec, &vnet).await?;
        self.assign_roles(subscription_id, &cluster, &zones, &private_zones, &vnet)
            .await?;

        self.deploy_workloads(tenant_id, &cluster, &zones, &private_zones)
            .await?;

        Ok(Provisioned {
            name: spec.name.clone(),
            cluster,
            resource_group,
            subscription_id: subscription_id.to_string(),
            tenant_id: tenant_id.to_string(),
            zones,
            private_zones,
            ipv4_service_name: IPV4_SERVICE_NAME.to_string(),
            ipv6_service_name: IPV6_SERVICE_NAME.to_string(),
        })
    }

    /// Stage A
    async fn create_networking(
        &self,
        spec: &InfraSpec,
        resource_group: &ResourceGroup,
    ) -> Result<(Vec<Zone>, Vec<PrivateZone>, VirtualNetwork)> {
        info!(
            zones = spec.zones.len(),
            private_zones = spec.private_zones.len(),
            "creating zones and virtual network"
        );

        let zones = join_all(
            spec.zones
                .iter()
                .map(|name| self.resources.create_zone(resource_group, name)),
        );
        let private_zones = join_all(
            spec.private_zones
                .iter()
                .map(|name| self.resources.create_private_zone(resource_group, name)),
        );
        let vnet = self.resources.create_virtual_network(
            resource_group,
            &spec.location,
            &spec.virtual_network,
        );

        let (zones, private_zones, vnet) = tokio::join!(zones, private_zones, vnet);
        let zones = first_error(zones)?;
        let private_zones = first_error(private_zones)?;
        let vnet = vnet?;
        Ok((zones, private_zones, vnet))
    }

    /// Stage B
    async fn link_private_zones(
        &self,
        private_zones: &[PrivateZone],
        vnet: &VirtualNetwork,
    ) -> Result<()> {
        info!("linking private zones to virtual network");
        let link_name = format!("{}-link", vnet.name());
        let results = join_all(
            private_zones
                .iter()
                .map(|zone| self.resources.link_private_zone(zone, &link_name, vnet)),
        )
        .await;
        first_error(results).map(|_| ())
    }

    /// Stage C
    async fn create_cluster(
        &self,
        subscription_id: &str,
        spec: &InfraSpec,
        vnet: &VirtualNetwork,
    ) -> Result<Cluster> {
        let id = ResourceId::new(
            subscription_id,
            &spec.resource_group,
            "Microsoft.ContainerService",
            "managedClusters",
            spec.cluster_name(),
        );
        let cluster_spec = ClusterSpec::new(id, &spec.location, vnet.subnet_id().clone())
            .with_options(&spec.cluster_options);

        let cluster = self.resources.create_cluster(&cluster_spec).await?;
        info!(
            cluster = %cluster.name(),
            principal_id = %cluster.principal_id(),
            "cluster identity resolved"
        );
        Ok(cluster)
    }

    /// Stage D
    async fn assign_roles(
        &self,
        subscription_id: &str,
        cluster: &Cluster,
        zones: &[Zone],
        private_zones: &[PrivateZone],
        vnet: &VirtualNetwork,
    ) -> Result<()> {
        let grants: Vec<(&ResourceId, Role)> = zones
            .iter()
            .map(|z| (z.id(), DNS_ZONE_CONTRIBUTOR))
            .chain(private_zones.iter().map(|z| (z.id(), PRIVATE_DNS_ZONE_CONTRIBUTOR)))
            .chain([
                (vnet.id(), NETWORK_CONTRIBUTOR),
                (vnet.subnet_id(), NETWORK_CONTRIBUTOR),
            ])
            .collect();
        info!(count = grants.len(), "assigning roles to cluster identity");

        let results = join_all(grants.iter().map(|(scope, role)| {
            self.roles
                .assign(subscription_id, scope, cluster.principal_id(), *role)
        }))
        .await;
        first_error(results).map(|_| ())
    }

    /// Stage E
    async fn deploy_workloads(
        &self,
        tenant_id: &str,
        cluster: &Cluster,
        zones: &[Zone],
        private_zones: &[PrivateZone],
    ) -> Result<()> {
        let mut configs = Vec::new();
        if !zones.is_empty() {
            configs.push(ExternalDnsConfig::new(
                tenant_id,
                DnsProvider::Public,
                zones.iter().map(|z| z.id().clone()).collect(),
            )?);
        }
        if !private_zones.is_empty() {
            configs.push(ExternalDnsConfig::new(
                tenant_id,
                DnsProvider::Private,
                private_zones.iter().map(|z| z.id().clone()).collect(),
            )?);
        }

        let external_dns =
            external_dns_resources(&ExternalDnsSettings::for_cluster(cluster), &configs)?;
        self.channel
            .apply_manifests(cluster.id(), &external_dns)
            .await
            .context("deploying external dns")?;

        let workloads = nginx_manifests()?;
        self.channel
            .apply_manifests(cluster.id(), &workloads)
            .await
            .context("deploying test workloads")?;

        let deployed: Vec<_> = external_dns.into_iter().chain(workloads).collect();
        self.waiter.wait_stable(cluster.id(), &deployed).await
    }
}
