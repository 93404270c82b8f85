use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use extdns_common::ResourceId;

use super::{ArmResource, ResourceKind};

/// How long a run's resource group lives before garbage collection
pub const DEFAULT_RESOURCE_GROUP_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Tag read by the subscription's garbage collector
const DELETION_DUE_TAG: &str = "deletion_due_time";
const DELETION_MARKED_BY_TAG: &str = "deletion_marked_by";

/// A resource group owning everything created for one infra
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceGroup {
    id: ResourceId,
}

impl ResourceGroup {
    /// Wrap a resource group id
    pub fn new(id: ResourceId) -> Self {
        Self { id }
    }

    /// Subscription the group lives in
    pub fn subscription_id(&self) -> &str {
        self.id.subscription_id()
    }

    pub(crate) fn create_body(location: &str, ttl: Duration, now: DateTime<Utc>) -> Value {
        let due = now + chrono::Duration::seconds(ttl.as_secs() as i64);
        json!({
            "location": location,
            "tags": {
                DELETION_DUE_TAG: due.timestamp().to_string(),
                DELETION_MARKED_BY_TAG: "gc",
            }
        })
    }
}

impl ArmResource for ResourceGroup {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.resource_group_name()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ResourceGroup
    }
}
