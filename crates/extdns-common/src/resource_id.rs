//! Azure Resource Manager resource ids
//!
//! Ids look like
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{child-type}/{child-name}...]`.
//! A resource group id stops after `{rg}`. Segment keys are matched
//! case-insensitively since ARM itself is inconsistent (`resourcegroups`
//! vs `resourceGroups`, `dnszones` vs `dnsZones`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A parsed ARM resource id
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    subscription_id: String,
    resource_group: String,
    /// Provider namespace (e.g. "Microsoft.Network"), absent for resource groups
    provider: Option<String>,
    /// `(type, name)` pairs below the provider, outermost first
    types: Vec<(String, String)>,
}

impl ResourceId {
    /// Build the id of a resource group
    pub fn resource_group(subscription_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: name.into(),
            provider: None,
            types: Vec::new(),
        }
    }

    /// Build the id of a top-level resource inside a resource group
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        provider: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            provider: Some(provider.into()),
            types: vec![(resource_type.into(), name.into())],
        }
    }

    /// Append a child resource segment (e.g. `subnets/{name}`)
    pub fn child(mut self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        self.types.push((resource_type.into(), name.into()));
        self
    }

    /// Subscription the resource lives in
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Resource group the resource lives in (or the group itself)
    pub fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    /// Provider namespace, `None` for a resource group id
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Type of the innermost resource (e.g. "managedClusters", "subnets")
    pub fn resource_type(&self) -> Option<&str> {
        self.types.last().map(|(t, _)| t.as_str())
    }

    /// Name of the innermost resource, the group name for a group id
    pub fn name(&self) -> &str {
        self.types
            .last()
            .map(|(_, n)| n.as_str())
            .unwrap_or(&self.resource_group)
    }

    /// Whether this id names a resource group rather than a resource in one
    pub fn is_resource_group(&self) -> bool {
        self.provider.is_none()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )?;
        if let Some(provider) = &self.provider {
            write!(f, "/providers/{}", provider)?;
            for (t, n) in &self.types {
                write!(f, "/{}/{}", t, n)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();
        let bad = |msg: &str| Error::resource_id(id, msg);

        if segments.iter().any(|s| s.is_empty()) {
            return Err(bad("empty path segment"));
        }
        if segments.len() < 4
            || !segments[0].eq_ignore_ascii_case("subscriptions")
            || !segments[2].eq_ignore_ascii_case("resourceGroups")
        {
            return Err(bad(
                "expected /subscriptions/{id}/resourceGroups/{name} prefix",
            ));
        }

        let mut parsed = ResourceId::resource_group(segments[1], segments[3]);
        let rest = &segments[4..];
        if rest.is_empty() {
            return Ok(parsed);
        }

        if !rest[0].eq_ignore_ascii_case("providers") || rest.len() < 4 {
            return Err(bad("expected /providers/{namespace}/{type}/{name}"));
        }
        let pairs = &rest[2..];
        if pairs.len() % 2 != 0 {
            return Err(bad("resource type without a name"));
        }

        parsed.provider = Some(rest[1].to_string());
        parsed.types = pairs
            .chunks(2)
            .map(|c| (c[0].to_string(), c[1].to_string()))
            .collect();
        Ok(parsed)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}
