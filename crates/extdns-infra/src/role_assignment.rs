//! Role assignments granting the cluster identity access to DNS and network
//! resources
//!
//! Assignments are not idempotent. Every call mints a fresh assignment id, so
//! a retried call either creates a duplicate grant or is rejected by ARM as a
//! conflict. Callers must not retry blindly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use extdns_common::{ResourceId, Result, ResultExt};

use crate::arm::ArmClient;

const ROLE_ASSIGNMENT_API: &str = "2022-04-01";

/// A built-in Azure role
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Role {
    /// Display name
    pub name: &'static str,
    definition_guid: &'static str,
}

impl Role {
    /// Full role definition id within a subscription
    pub fn definition_id(&self, subscription_id: &str) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            subscription_id, self.definition_guid
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Manage public DNS zones
pub const DNS_ZONE_CONTRIBUTOR: Role = Role {
    name: "DNS Zone Contributor",
    definition_guid: "befefa01-2a29-4197-83a8-272ff33ce314",
};

/// Manage private DNS zones
pub const PRIVATE_DNS_ZONE_CONTRIBUTOR: Role = Role {
    name: "Private DNS Zone Contributor",
    definition_guid: "b12aa53e-6015-4669-85d0-8515ebb3ae7f",
};

/// Manage networks
pub const NETWORK_CONTRIBUTOR: Role = Role {
    name: "Network Contributor",
    definition_guid: "b34d265f-36f7-4a0d-a4d4-e158ca92e90f",
};

/// Grants roles to principals over resource scopes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleAssigner: Send + Sync {
    /// Grant `role` to `principal_id` over `scope`
    async fn assign(
        &self,
        subscription_id: &str,
        scope: &ResourceId,
        principal_id: &str,
        role: Role,
    ) -> Result<()>;
}

/// [`RoleAssigner`] backed by `Microsoft.Authorization/roleAssignments`
pub struct RoleAssignmentCoordinator {
    arm: Arc<ArmClient>,
}

impl RoleAssignmentCoordinator {
    /// Create a coordinator over a shared ARM client
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

fn assignment_path(scope: &ResourceId, assignment_id: Uuid) -> String {
    format!(
        "{}/providers/Microsoft.Authorization/roleAssignments/{}",
        scope, assignment_id
    )
}

fn assignment_body(subscription_id: &str, principal_id: &str, role: Role) -> Value {
    json!({
        "properties": {
            "roleDefinitionId": role.definition_id(subscription_id),
            "principalId": principal_id,
            "principalType": "ServicePrincipal",
        }
    })
}

#[async_trait]
impl RoleAssigner for RoleAssignmentCoordinator {
    #[instrument(skip(self, subscription_id), fields(scope = %scope, role = %role))]
    async fn assign(
        &self,
        subscription_id: &str,
        scope: &ResourceId,
        principal_id: &str,
        role: Role,
    ) -> Result<()> {
        let path = assignment_path(scope, Uuid::new_v4());
        info!("assigning role");

        self.arm
            .put(
                &path,
                ROLE_ASSIGNMENT_API,
                &assignment_body(subscription_id, principal_id, role),
            )
            .await
            .with_context(|| format!("assigning {} over {}", role, scope.name()))?;
        Ok(())
    }
}
