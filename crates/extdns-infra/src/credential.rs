//! Bearer credential acquisition and caching
//!
//! A [`CachedCredential`] is built once per run and handed to every ARM
//! client. The first caller fetches a token while holding the cache lock, so
//! concurrent first callers share one fetch instead of racing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use extdns_common::{Error, Result};

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// A bearer token with its expiry
#[derive(Clone, Debug, PartialEq)]
pub struct AccessToken {
    /// Raw bearer token
    pub token: String,
    /// Instant after which the token is rejected
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::minutes(REFRESH_MARGIN_MINUTES) > now
    }
}

/// Something that can mint bearer tokens for a resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token for `resource` (e.g. `https://management.azure.com/`)
    async fn fetch_token(&self, resource: &str) -> Result<AccessToken>;
}

/// Token source backed by the logged-in Azure CLI
#[derive(Clone, Debug, Default)]
pub struct AzureCliTokenSource {
    tenant_id: Option<String>,
}

impl AzureCliTokenSource {
    /// Create a source that asks for tokens in the given tenant
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

fn parse_cli_token(raw: &[u8]) -> Result<AccessToken> {
    let parsed: CliToken = serde_json::from_slice(raw)
        .map_err(|e| Error::credential(format!("parsing az output: {}", e)))?;

    let expires_at = match (parsed.expires_on_epoch, parsed.expires_on) {
        (Some(epoch), _) => Utc
            .timestamp_opt(epoch, 0)
            .single()
            .ok_or_else(|| Error::credential(format!("invalid expires_on {}", epoch)))?,
        // older CLIs only report local wall-clock time
        (None, Some(local)) => {
            let naive = NaiveDateTime::parse_from_str(&local, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|e| Error::credential(format!("invalid expiresOn {:?}: {}", local, e)))?;
            Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| Error::credential(format!("ambiguous expiresOn {:?}", local)))?
                .with_timezone(&Utc)
        }
        (None, None) => return Err(Error::credential("az output has no expiry")),
    };

    Ok(AccessToken {
        token: parsed.access_token,
        expires_at,
    })
}

#[async_trait]
impl TokenSource for AzureCliTokenSource {
    async fn fetch_token(&self, resource: &str) -> Result<AccessToken> {
        let mut cmd = Command::new("az");
        cmd.args([
            "account",
            "get-access-token",
            "--resource",
            resource,
            "--output",
            "json",
        ]);
        if let Some(tenant) = &self.tenant_id {
            cmd.args(["--tenant", tenant.as_str()]);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::io("running az account get-access-token", e))?;

        if !output.status.success() {
            return Err(Error::credential(format!(
                "az account get-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_cli_token(&output.stdout)
    }
}

/// Single-flight token cache in front of a [`TokenSource`]
pub struct CachedCredential {
    source: Arc<dyn TokenSource>,
    resource: String,
    cached: Mutex<Option<AccessToken>>,
}

impl CachedCredential {
    /// Cache tokens for `resource` minted by `source`
    pub fn new(source: Arc<dyn TokenSource>, resource: impl Into<String>) -> Self {
        Self {
            source,
            resource: resource.into(),
            cached: Mutex::new(None),
        }
    }

    /// Resource tokens are minted for
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Return a usable bearer token, fetching only when the cached one is
    /// missing or close to expiry
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_usable_at(Utc::now()) {
                return Ok(token.token.clone());
            }
            debug!(resource = %self.resource, "cached token near expiry, refreshing");
        }

        let fresh = self.source.fetch_token(&self.resource).await?;
        info!(
            resource = %self.resource,
            expires_at = %fresh.expires_at,
            "obtained bearer credential"
        );
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
