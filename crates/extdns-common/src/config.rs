//! Environment configuration for a provisioning run
//!
//! Provides trait-based access to environment configuration so settings can be
//! resolved in tests without touching process-global state.

use std::path::PathBuf;

use crate::{Error, Result};

/// Default Azure region for provisioned infrastructure
pub const DEFAULT_LOCATION: &str = "westus";

/// Public Azure Resource Manager endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Trait for reading e2e environment configuration
#[cfg_attr(test, mockall::automock)]
pub trait E2eEnv: Send + Sync {
    /// Azure AD tenant the subscription belongs to
    fn tenant_id(&self) -> Option<String>;

    /// Subscription infrastructure is provisioned into
    fn subscription_id(&self) -> Option<String>;

    /// Region override
    fn location(&self) -> Option<String>;

    /// ARM endpoint override (sovereign clouds, test servers)
    fn arm_endpoint(&self) -> Option<String>;

    /// Directory job logs are captured into
    fn log_dir(&self) -> Option<String>;
}

/// Default implementation that reads from environment variables
#[derive(Clone, Default)]
pub struct OsEnv;

impl E2eEnv for OsEnv {
    fn tenant_id(&self) -> Option<String> {
        std::env::var("AZURE_TENANT_ID").ok()
    }

    fn subscription_id(&self) -> Option<String> {
        std::env::var("AZURE_SUBSCRIPTION_ID").ok()
    }

    fn location(&self) -> Option<String> {
        std::env::var("E2E_LOCATION").ok()
    }

    fn arm_endpoint(&self) -> Option<String> {
        std::env::var("ARM_ENDPOINT").ok()
    }

    fn log_dir(&self) -> Option<String> {
        std::env::var("E2E_LOG_DIR").ok()
    }
}

/// Resolved settings for a provisioning run
#[derive(Clone, Debug, PartialEq)]
pub struct E2eSettings {
    /// Azure AD tenant id
    pub tenant_id: String,
    /// Subscription id
    pub subscription_id: String,
    /// Region for all resources
    pub location: String,
    /// ARM endpoint without trailing slash
    pub arm_endpoint: String,
    /// Directory for job log capture files
    pub log_dir: PathBuf,
}

impl E2eSettings {
    /// Resolve settings, failing if tenant or subscription is missing
    pub fn from_env(env: &dyn E2eEnv) -> Result<Self> {
        let tenant_id = required(env.tenant_id(), "AZURE_TENANT_ID")?;
        let subscription_id = required(env.subscription_id(), "AZURE_SUBSCRIPTION_ID")?;

        Ok(Self {
            tenant_id,
            subscription_id,
            location: env
                .location()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            arm_endpoint: env
                .arm_endpoint()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_ARM_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            log_dir: PathBuf::from(env.log_dir().unwrap_or_else(|| ".".to_string())),
        })
    }

    /// Resolve settings from the process environment
    pub fn from_os_env() -> Result<Self> {
        Self::from_env(&OsEnv)
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::validation(format!("{} must be set", name))),
    }
}
