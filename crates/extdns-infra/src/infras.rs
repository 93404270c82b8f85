//! Named infrastructure configurations the e2e suite runs against

use uuid::Uuid;

use crate::provisioner::InfraSpec;
use crate::resources::{ClusterOption, VirtualNetworkSpec};

/// Public zones provisioned per infrastructure
pub const ZONE_COUNT: usize = 2;
/// Private zones provisioned per infrastructure
pub const PRIVATE_ZONE_COUNT: usize = 2;

const RESOURCE_GROUP_PREFIX: &str = "externalDns-e2e";

/// An ordered set of infrastructure specs
#[derive(Clone, Debug, PartialEq)]
pub struct Infras(Vec<InfraSpec>);

impl Infras {
    /// The standard catalogue: a basic cluster and a private cluster
    ///
    /// Every name is made unique with fresh UUIDs. Both clusters share one
    /// resource group, each with its own virtual network and address range.
    pub fn catalogue(location: &str) -> Self {
        let resource_group = format!("{}{}", RESOURCE_GROUP_PREFIX, Uuid::new_v4());
        let infra = |index: u8, name: &str, options: Vec<ClusterOption>| {
            let suffix = Uuid::new_v4().to_string();
            let mut spec = InfraSpec::new(name, &suffix, &resource_group, location);
            spec.virtual_network = VirtualNetworkSpec::numbered(&suffix, index);
            spec.cluster_options = options;
            spec.zones = zone_names("public-zone", ZONE_COUNT);
            spec.private_zones = zone_names("private-zone", PRIVATE_ZONE_COUNT);
            spec
        };

        Self(vec![
            infra(0, "basic cluster", Vec::new()),
            infra(1, "private cluster", vec![ClusterOption::PrivateCluster]),
        ])
    }

    /// Keep only infrastructures whose name appears in `names`
    pub fn filter_names<S: AsRef<str>>(&self, names: &[S]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|infra| names.iter().any(|n| n.as_ref() == infra.name))
                .cloned()
                .collect(),
        )
    }

    /// The specs, in catalogue order
    pub fn specs(&self) -> &[InfraSpec] {
        &self.0
    }

    /// Names of every infrastructure
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|i| i.name.as_str()).collect()
    }
}

impl From<Vec<InfraSpec>> for Infras {
    fn from(specs: Vec<InfraSpec>) -> Self {
        Self(specs)
    }
}

fn zone_names(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|_| format!("{}-{}.com", prefix, Uuid::new_v4()))
        .collect()
}
