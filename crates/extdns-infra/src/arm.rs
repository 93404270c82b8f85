//! Azure Resource Manager REST client
//!
//! Thin JSON client over `reqwest` with bearer auth and long-running operation
//! (LRO) tracking. Creates and commands in ARM answer with one of three
//! tracking styles, chosen from the initial response:
//!
//! - an `Azure-AsyncOperation` header: poll its `status` until terminal, then
//!   read the final resource (PUT) or the `Location` result (POST)
//! - a `Location` header only: poll it until it stops answering 202
//! - neither: re-read the resource until `properties.provisioningState` is
//!   terminal (absent means the response was already final)

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use extdns_common::config::E2eSettings;
use extdns_common::retry::{retry_transient, RetryConfig};
use extdns_common::{Error, Result};

use crate::credential::{AzureCliTokenSource, CachedCredential};

/// Poll interval when the service does not send `Retry-After`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";

/// How a long-running operation is tracked after its initial response
#[derive(Clone, Debug, PartialEq)]
pub enum Tracking {
    /// The initial response is already final
    Done,
    /// Poll an operation-status URL
    AsyncOperation {
        /// Status URL
        status_url: String,
        /// Result URL for POST operations
        location: Option<String>,
    },
    /// Poll a URL until it stops answering 202
    Location(String),
    /// Re-read the resource until its provisioning state is terminal
    ProvisioningState,
}

/// Progress reported by a status document
#[derive(Clone, Debug, PartialEq)]
pub enum OperationStatus {
    /// Still running
    InProgress,
    /// Finished successfully
    Succeeded,
    /// Finished with `Failed` or `Canceled`
    Failed {
        /// ARM error code
        code: String,
        /// ARM error message
        message: String,
    },
}

/// Decide how to follow an operation from its initial response
pub fn tracking_for(
    method: &Method,
    status: u16,
    async_operation: Option<&str>,
    location: Option<&str>,
    body: &Value,
) -> Tracking {
    if let Some(url) = async_operation {
        return Tracking::AsyncOperation {
            status_url: url.to_string(),
            location: location.map(str::to_string),
        };
    }
    if status == 202 {
        if let Some(url) = location {
            return Tracking::Location(url.to_string());
        }
    }
    if *method == Method::PUT && !matches!(provisioning_state(body), OperationStatus::Succeeded)
    {
        return Tracking::ProvisioningState;
    }
    Tracking::Done
}

fn classify_state(state: &str, body: &Value) -> OperationStatus {
    if state.eq_ignore_ascii_case("succeeded") {
        OperationStatus::Succeeded
    } else if state.eq_ignore_ascii_case("failed") || state.eq_ignore_ascii_case("canceled") {
        let (code, message) = error_parts(body);
        OperationStatus::Failed {
            code: if code.is_empty() {
                state.to_string()
            } else {
                code
            },
            message,
        }
    } else {
        OperationStatus::InProgress
    }
}

/// Read the `status` field of an operation-status document
pub fn operation_status(body: &Value) -> OperationStatus {
    match body.get("status").and_then(Value::as_str) {
        Some(state) => classify_state(state, body),
        None => OperationStatus::InProgress,
    }
}

/// Read `properties.provisioningState` of a resource; a resource without one
/// is treated as succeeded
pub fn provisioning_state(body: &Value) -> OperationStatus {
    match body
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
    {
        Some(state) => classify_state(state, body),
        None => OperationStatus::Succeeded,
    }
}

fn error_parts(body: &Value) -> (String, String) {
    let err = body.get("error").unwrap_or(body);
    let code = err
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (code, message)
}

/// `Retry-After` in seconds, falling back to `default`
pub fn poll_delay(headers: &HeaderMap, default: Duration) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl RawResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Authenticated ARM client
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<CachedCredential>,
    poll_interval: Duration,
    poll_retry: RetryConfig,
}

impl ArmClient {
    /// Create a client for `endpoint` (e.g. `https://management.azure.com`)
    pub fn new(endpoint: impl Into<String>, credential: Arc<CachedCredential>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_retry: RetryConfig::default(),
        })
    }

    /// Client for the endpoint in `settings`, authenticated through the Azure
    /// CLI in the configured tenant
    pub fn for_settings(settings: &E2eSettings) -> Result<Self> {
        let source = AzureCliTokenSource::new(Some(settings.tenant_id.clone()));
        let credential = CachedCredential::new(
            Arc::new(source),
            format!("{}/", settings.arm_endpoint.trim_end_matches('/')),
        );
        Self::new(&settings.arm_endpoint, Arc::new(credential))
    }

    /// Endpoint requests are sent to, without a trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Override the poll interval used without `Retry-After`
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<RawResponse> {
        let token = self.credential.token().await?;
        let mut req = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {}", token));
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        if !status.is_success() {
            let (code, message) = error_parts(&body);
            return Err(Error::arm(
                format!("{} {}", method, strip_query(url)),
                status.as_u16(),
                code,
                message,
            ));
        }

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    async fn poll_get(&self, url: &str) -> Result<RawResponse> {
        retry_transient(&self.poll_retry, "arm poll", || {
            self.send(Method::GET, url, None)
        })
        .await
    }

    /// GET a resource
    pub async fn get(&self, path: &str, api_version: &str) -> Result<Value> {
        let url = self.url(path, api_version);
        Ok(self.poll_get(&url).await?.body)
    }

    /// PUT a resource and wait for it to finish provisioning
    pub async fn put(&self, path: &str, api_version: &str, body: &Value) -> Result<Value> {
        self.begin(Method::PUT, path, api_version, body).await
    }

    /// POST an action and wait for its result
    pub async fn post(&self, path: &str, api_version: &str, body: &Value) -> Result<Value> {
        self.begin(Method::POST, path, api_version, body).await
    }

    async fn begin(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: &Value,
    ) -> Result<Value> {
        let url = self.url(path, api_version);
        let operation = format!("{} {}", method, path);
        let initial = self.send(method.clone(), &url, Some(body)).await?;

        let tracking = tracking_for(
            &method,
            initial.status.as_u16(),
            initial.header(ASYNC_OPERATION_HEADER),
            initial.header(LOCATION_HEADER),
            &initial.body,
        );
        debug!(operation = %operation, tracking = ?tracking, "started operation");

        let mut delay = poll_delay(&initial.headers, self.poll_interval);
        match tracking {
            Tracking::Done => Ok(initial.body),
            Tracking::AsyncOperation {
                status_url,
                location,
            } => {
                loop {
                    tokio::time::sleep(delay).await;
                    let resp = self.poll_get(&status_url).await?;
                    match operation_status(&resp.body) {
                        OperationStatus::Succeeded => break,
                        OperationStatus::Failed { code, message } => {
                            return Err(Error::arm(&operation, 0, code, message));
                        }
                        OperationStatus::InProgress => {
                            info!(operation = %operation, "still waiting for operation");
                            delay = poll_delay(&resp.headers, self.poll_interval);
                        }
                    }
                }

                match (method, location) {
                    (Method::POST, Some(location)) => Ok(self.poll_get(&location).await?.body),
                    (Method::POST, None) => Ok(Value::Null),
                    _ => Ok(self.poll_get(&url).await?.body),
                }
            }
            Tracking::Location(location) => loop {
                tokio::time::sleep(delay).await;
                let resp = self.poll_get(&location).await?;
                if resp.status != StatusCode::ACCEPTED {
                    return Ok(resp.body);
                }
                info!(operation = %operation, "still waiting for operation");
                delay = poll_delay(&resp.headers, self.poll_interval);
            },
            Tracking::ProvisioningState => loop {
                tokio::time::sleep(delay).await;
                let resp = self.poll_get(&url).await?;
                match provisioning_state(&resp.body) {
                    OperationStatus::Succeeded => return Ok(resp.body),
                    OperationStatus::Failed { code, message } => {
                        return Err(Error::arm(&operation, 0, code, message));
                    }
                    OperationStatus::InProgress => {
                        info!(operation = %operation, "still waiting for provisioning");
                        delay = poll_delay(&resp.headers, self.poll_interval);
                    }
                }
            },
        }
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
