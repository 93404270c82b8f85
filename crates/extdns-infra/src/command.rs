//! Remote command execution on a managed cluster
//!
//! Commands run through the AKS run-command API: the request carries the
//! literal command line plus an optional base64 zip whose contents are
//! unpacked into the command's working directory. The operation is polled to
//! completion and yields the command's output and exit code.
//!
//! A non-zero exit code is reported as [`Error::NonZeroExit`]. Condition
//! probes (`kubectl wait --timeout=5s`) rely on this to mean "not yet", so it
//! must stay distinguishable from transport failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use extdns_common::{Error, ResourceId, Result, ResultExt};

use crate::arm::ArmClient;
use crate::manifests::{package_manifests, Manifest, MANIFEST_DIR};
use crate::resources::MANAGED_CLUSTER_API;

/// A command to run on the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct CommandRequest {
    /// Literal shell command line
    pub command: String,
    /// Base64 zip staged into the working directory
    pub context: Option<String>,
}

impl CommandRequest {
    /// Command with no staged files
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            context: None,
        }
    }

    /// Stage `archive` (a zip) alongside the command
    pub fn with_archive(mut self, archive: &[u8]) -> Self {
        self.context = Some(base64::engine::general_purpose::STANDARD.encode(archive));
        self
    }
}

/// Terminal outcome of a command
#[derive(Clone, Debug, PartialEq)]
pub struct CommandResult {
    /// Combined command output
    pub logs: String,
    /// Process exit code
    pub exit_code: i32,
}

/// Per-call options for [`RemoteCommandChannel::run_command`]
#[derive(Clone, Debug, Default)]
pub struct RunCommandOpts {
    /// Append output to this file instead of logging it
    pub output_file: Option<PathBuf>,
}

impl RunCommandOpts {
    /// Send output to `path`
    pub fn output_to(path: impl Into<PathBuf>) -> Self {
        Self {
            output_file: Some(path.into()),
        }
    }
}

/// Submits commands to a cluster and waits for them to finish
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Run `request` on `cluster` and return its terminal result
    async fn run(&self, cluster: &ResourceId, request: &CommandRequest) -> Result<CommandResult>;
}

/// [`CommandTransport`] over `managedClusters/{name}/runCommand`
pub struct ArmCommandTransport {
    arm: Arc<ArmClient>,
}

impl ArmCommandTransport {
    /// Create a transport over a shared ARM client
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

fn run_command_body(request: &CommandRequest) -> Value {
    let mut body = json!({ "command": request.command });
    if let Some(context) = &request.context {
        body["context"] = Value::from(context.as_str());
    }
    body
}

fn parse_run_command_result(body: &Value) -> Result<CommandResult> {
    let props = body
        .get("properties")
        .ok_or_else(|| Error::validation("run command result has no properties"))?;
    let exit_code = props
        .get("exitCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::validation("run command result has no exit code"))?;
    let logs = props
        .get("logs")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(CommandResult {
        logs,
        exit_code: exit_code as i32,
    })
}

#[async_trait]
impl CommandTransport for ArmCommandTransport {
    async fn run(&self, cluster: &ResourceId, request: &CommandRequest) -> Result<CommandResult> {
        let path = format!("{}/runCommand", cluster);
        let result = self
            .arm
            .post(&path, MANAGED_CLUSTER_API, &run_command_body(request))
            .await?;
        parse_run_command_result(&result)
    }
}

/// Runs commands on a cluster and classifies them by exit code
#[derive(Clone)]
pub struct RemoteCommandChannel {
    transport: Arc<dyn CommandTransport>,
}

impl RemoteCommandChannel {
    /// Create a channel over a transport
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self { transport }
    }

    /// Run a command, returning its result if it exited zero
    ///
    /// Output goes to the log unless `opts.output_file` is set, in which case
    /// it is appended there. This happens before the exit code is checked so
    /// a failing command's output is still captured.
    #[instrument(skip(self, request, opts), fields(cluster = %cluster.name(), command = %request.command))]
    pub async fn run_command(
        &self,
        cluster: &ResourceId,
        request: CommandRequest,
        opts: &RunCommandOpts,
    ) -> Result<CommandResult> {
        info!("running command");
        let result = self
            .transport
            .run(cluster, &request)
            .await
            .with_context(|| format!("running `{}`", request.command))?;

        match &opts.output_file {
            Some(path) => append_output(path, &result.logs).await?,
            None => info!(output = %result.logs, "command output"),
        }

        if result.exit_code != 0 {
            info!(exit_code = result.exit_code, "command exited non-zero");
            return Err(Error::NonZeroExit {
                command: request.command,
                exit_code: result.exit_code,
                logs: result.logs,
            });
        }
        Ok(result)
    }

    /// Package `manifests` and `kubectl apply` them on the cluster
    #[instrument(skip(self, manifests), fields(cluster = %cluster.name(), count = manifests.len()))]
    pub async fn apply_manifests(&self, cluster: &ResourceId, manifests: &[Manifest]) -> Result<()> {
        info!("deploying manifests");
        let archive = package_manifests(manifests).context("packaging manifests")?;
        let request = CommandRequest::new(format!("kubectl apply -f {}/", MANIFEST_DIR))
            .with_archive(&archive);

        self.run_command(cluster, request, &RunCommandOpts::default())
            .await
            .context("running kubectl apply")?;
        info!("deployed manifests");
        Ok(())
    }
}

async fn append_output(path: &Path, logs: &str) -> Result<()> {
    let ctx = || format!("appending command output to {}", path.display());
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::io(ctx(), e))?;
    file.write_all(logs.as_bytes())
        .await
        .map_err(|e| Error::io(ctx(), e))?;
    file.flush().await.map_err(|e| Error::io(ctx(), e))
}
