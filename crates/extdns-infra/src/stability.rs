//! Waiting for deployed objects to become stable
//!
//! Stability depends on kind: workloads must finish rolling out, Pods must be
//! Ready, Jobs must complete. Everything else is stable once applied. All
//! objects are waited on concurrently and every wait runs to completion before
//! the first failure is reported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use extdns_common::{Error, ResourceId, Result};

use crate::command::{CommandRequest, RemoteCommandChannel, RunCommandOpts};
use crate::manifests::Manifest;

/// Per-probe timeout for Job condition waits
pub const JOB_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How to decide an object is stable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StabilityCheck {
    /// `kubectl rollout status`
    Rollout,
    /// `kubectl wait --for=condition=Ready`
    Ready,
    /// Poll for the Complete or Failed condition
    JobCompletion,
    /// Stable once applied
    None,
}

impl StabilityCheck {
    /// Check used for objects of `kind`
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "Deployment" | "StatefulSet" | "DaemonSet" => StabilityCheck::Rollout,
            "Pod" => StabilityCheck::Ready,
            "Job" => StabilityCheck::JobCompletion,
            _ => StabilityCheck::None,
        }
    }
}

/// Terminal state of a Job wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Complete,
    Failed,
}

/// Tuning for [`StabilityWaiter`]
#[derive(Clone, Debug)]
pub struct StabilityConfig {
    /// Directory `job-<namespace>-<name>.log` files are written to
    pub log_dir: PathBuf,
    /// Timeout passed to each Job condition probe
    pub probe_timeout: Duration,
    /// Overall limit on a Job wait; `None` polls until the Job completes or
    /// fails
    pub job_deadline: Option<Duration>,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            probe_timeout: JOB_PROBE_TIMEOUT,
            job_deadline: None,
        }
    }
}

impl StabilityConfig {
    /// Default tuning with Job logs written under `log_dir`
    pub fn in_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }
}

/// Path of the log capture file for a Job
pub fn job_log_path(log_dir: &Path, namespace: &str, job_name: &str) -> PathBuf {
    log_dir.join(format!("job-{}-{}.log", namespace, job_name))
}

/// Drives per-kind stability checks over a [`RemoteCommandChannel`]
pub struct StabilityWaiter {
    channel: RemoteCommandChannel,
    config: StabilityConfig,
}

impl StabilityWaiter {
    /// Create a waiter
    pub fn new(channel: RemoteCommandChannel, config: StabilityConfig) -> Self {
        Self { channel, config }
    }

    /// Tuning this waiter runs with
    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Wait until every object in `manifests` is stable
    #[instrument(skip(self, manifests), fields(cluster = %cluster.name(), count = manifests.len()))]
    pub async fn wait_stable(&self, cluster: &ResourceId, manifests: &[Manifest]) -> Result<()> {
        info!("waiting for resources to be stable");

        let results = join_all(manifests.iter().map(|m| self.wait_one(cluster, m))).await;
        if let Some(err) = results.into_iter().find_map(|r| r.err()) {
            return Err(err.wrap("waiting for resources to be stable"));
        }

        info!("resources are stable");
        Ok(())
    }

    async fn wait_one(&self, cluster: &ResourceId, manifest: &Manifest) -> Result<()> {
        let kind = manifest.kind();
        let name = manifest.name();
        let ns = manifest.namespace_or_default();

        let outcome = match StabilityCheck::for_kind(kind) {
            StabilityCheck::Rollout => {
                info!(kind, name, namespace = ns, "checking rollout status");
                self.probe(cluster, format!("kubectl rollout status {}/{} -n {}", kind, name, ns))
                    .await
            }
            StabilityCheck::Ready => {
                info!(name, namespace = ns, "waiting for pod to be ready");
                self.probe(
                    cluster,
                    format!("kubectl wait --for=condition=Ready pod/{} -n {}", name, ns),
                )
                .await
            }
            StabilityCheck::JobCompletion => self.wait_job(cluster, name, ns).await,
            StabilityCheck::None => Ok(()),
        };

        outcome.map_err(|e| e.wrap(format!("waiting for {}/{} to be stable", kind, name)))
    }

    async fn probe(&self, cluster: &ResourceId, command: String) -> Result<()> {
        self.channel
            .run_command(cluster, CommandRequest::new(command), &RunCommandOpts::default())
            .await
            .map(|_| ())
    }

    /// Poll a Job's Complete and Failed conditions until one holds
    ///
    /// A non-zero exit from either probe means the condition does not hold
    /// yet. Any other error ends the wait. Logs are captured once on every
    /// exit path.
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name()))]
    async fn wait_job(&self, cluster: &ResourceId, name: &str, ns: &str) -> Result<()> {
        info!("waiting for job to complete");
        let log_file = job_log_path(&self.config.log_dir, ns, name);
        remove_stale_log(&log_file).await?;

        let timeout = self.config.probe_timeout.as_secs();
        let complete = format!(
            "kubectl wait --for=condition=complete --timeout={}s job/{} -n {}",
            timeout, name, ns
        );
        let failed = format!(
            "kubectl wait --for=condition=failed --timeout={}s job/{} -n {}",
            timeout, name, ns
        );
        let started = Instant::now();

        let state = loop {
            match self.probe(cluster, complete.clone()).await {
                Ok(()) => break JobState::Complete,
                Err(e) if e.is_non_zero_exit() => {}
                Err(e) => {
                    self.capture_after_error(cluster, name, ns, &log_file).await;
                    return Err(e);
                }
            }

            match self.probe(cluster, failed.clone()).await {
                Ok(()) => break JobState::Failed,
                Err(e) if e.is_non_zero_exit() => {}
                Err(e) => {
                    self.capture_after_error(cluster, name, ns, &log_file).await;
                    return Err(e);
                }
            }

            if let Some(deadline) = self.config.job_deadline {
                if started.elapsed() >= deadline {
                    self.capture_after_error(cluster, name, ns, &log_file).await;
                    return Err(Error::Timeout {
                        message: format!("job/{} in namespace {} did not finish", name, ns),
                        elapsed_secs: started.elapsed().as_secs(),
                    });
                }
            }
        };

        match state {
            JobState::Complete => {
                self.capture_logs(cluster, name, ns, &log_file).await?;
                info!("job completed");
                Ok(())
            }
            JobState::Failed => {
                self.capture_after_error(cluster, name, ns, &log_file).await;
                Err(Error::JobFailed {
                    name: name.to_string(),
                    namespace: ns.to_string(),
                })
            }
        }
    }

    async fn capture_logs(
        &self,
        cluster: &ResourceId,
        name: &str,
        ns: &str,
        log_file: &Path,
    ) -> Result<()> {
        self.channel
            .run_command(
                cluster,
                CommandRequest::new(format!("kubectl logs job/{} -n {}", name, ns)),
                &RunCommandOpts::output_to(log_file),
            )
            .await
            .map(|_| ())
            .map_err(|e| e.wrap(format!("getting logs for job/{}", name)))
    }

    /// Capture logs when the wait is already failing; the original error wins
    async fn capture_after_error(&self, cluster: &ResourceId, name: &str, ns: &str, log_file: &Path) {
        if let Err(e) = self.capture_logs(cluster, name, ns, log_file).await {
            warn!(error = %e, "failed to capture job logs");
        }
    }
}

async fn remove_stale_log(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("removing previous job log {}", path.display()), e)),
    }
}
