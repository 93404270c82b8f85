//! Error types for the ExternalDNS e2e harness
//!
//! Errors are structured with fields to aid debugging when a provisioning run
//! fails halfway through. Each layer wraps the error it received with the
//! operation and resource it was working on (see [`ResultExt`]) so the final
//! message reads like a path from the failed stage down to the root cause.

use thiserror::Error;

/// Main error type for e2e infrastructure operations
#[derive(Debug, Error)]
pub enum Error {
    /// Azure Resource Manager returned a failure for an operation
    #[error("ARM error during {operation} (status {status}, code {code}): {message}")]
    Arm {
        /// Operation being performed (e.g. "PUT managedClusters/cluster1")
        operation: String,
        /// HTTP status code returned, 0 when the failure came from an LRO body
        status: u16,
        /// ARM error code (e.g. "QuotaExceeded")
        code: String,
        /// Error message from the service
        message: String,
    },

    /// HTTP transport failure talking to ARM
    #[error("http error: {source}")]
    Http {
        /// The underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// Failed to obtain a bearer credential
    #[error("credential error: {message}")]
    Credential {
        /// Description of what failed
        message: String,
    },

    /// A remote command finished with a non-zero exit code
    ///
    /// This is an expected outcome for condition probes and is branched on by
    /// callers, not a crash.
    #[error("command `{command}` exited with non-zero exit code {exit_code}")]
    NonZeroExit {
        /// The literal command text
        command: String,
        /// Exit code reported by the cluster
        exit_code: i32,
        /// Captured output of the command
        logs: String,
    },

    /// A Job reached its Failed condition
    #[error("job/{name} in namespace {namespace} failed")]
    JobFailed {
        /// Job name
        name: String,
        /// Job namespace
        namespace: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error{}: {message}", .object.as_ref().map(|o| format!(" for {}", o)).unwrap_or_default())]
    Serialization {
        /// Description of what failed
        message: String,
        /// The offending object as `kind/name` (if known)
        object: Option<String>,
    },

    /// A string could not be parsed as an ARM resource id
    #[error("invalid resource id {id:?}: {message}")]
    ResourceId {
        /// The rejected id
        id: String,
        /// Why it was rejected
        message: String,
    },

    /// Local file system error
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done (e.g. "appending to job-foo.log")
        context: String,
        /// The underlying io error
        source: std::io::Error,
    },

    /// Configuration or input validation error
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// An explicit deadline elapsed
    #[error("timed out after {elapsed_secs}s: {message}")]
    Timeout {
        /// What was being waited on
        message: String,
        /// Seconds elapsed before giving up
        elapsed_secs: u64,
    },

    /// The surrounding operation was cancelled
    #[error("operation cancelled: {context}")]
    Cancelled {
        /// What was running when cancellation was observed
        context: String,
    },

    /// An error wrapped with the operation and resource it occurred in
    #[error("{context}: {source}")]
    Context {
        /// Operation and resource name (e.g. "creating resource group rg1")
        context: String,
        /// The wrapped error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an ARM error
    pub fn arm(
        operation: impl Into<String>,
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Arm {
            operation: operation.into(),
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            object: None,
        }
    }

    /// Create a serialization error naming the offending object
    pub fn serialization_for(
        kind: impl AsRef<str>,
        name: impl AsRef<str>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Serialization {
            message: msg.into(),
            object: Some(format!("{}/{}", kind.as_ref(), name.as_ref())),
        }
    }

    /// Create a resource id error
    pub fn resource_id(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ResourceId {
            id: id.into(),
            message: msg.into(),
        }
    }

    /// Create an io error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Wrap this error with operation/resource context
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any [`Error::Context`] layers
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the root cause is a non-zero command exit
    pub fn is_non_zero_exit(&self) -> bool {
        matches!(self.root_cause(), Error::NonZeroExit { .. })
    }

    /// Exit code of a non-zero command exit, if that is the root cause
    pub fn exit_code(&self) -> Option<i32> {
        match self.root_cause() {
            Error::NonZeroExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Captured command output of a non-zero command exit, if that is the root cause
    pub fn command_logs(&self) -> Option<&str> {
        match self.root_cause() {
            Error::NonZeroExit { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// Whether the root cause was cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Error::Cancelled { .. })
    }

    /// Check if this error is retryable
    ///
    /// Throttling, server-side ARM failures and transport errors are transient.
    /// Everything else needs a config fix or reflects a real outcome (a
    /// command's exit code, a failed Job) and must not be retried.
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Error::Arm { status, .. } => *status == 429 || (500..600).contains(status),
            Error::Http { source } => {
                source.is_timeout()
                    || source.is_connect()
                    || source
                        .status()
                        .map(|s| s.as_u16() == 429 || s.is_server_error())
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Attach operation/resource context to a `Result`'s error
pub trait ResultExt<T> {
    /// Wrap the error with a fixed context string
    fn context(self, context: impl Into<String>) -> Result<T, Error>;

    /// Wrap the error with a lazily built context string
    fn with_context<F, S>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context(self, context: impl Into<String>) -> Result<T, Error> {
        self.map_err(|e| e.wrap(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.wrap(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation Through a Provisioning Run
    // ==========================================================================

    /// Story: a probe's non-zero exit stays recognisable after wrapping
    ///
    /// The Job wait loop branches on "non-zero exit" even after the channel
    /// and waiter have added their own context.
    #[test]
    fn story_non_zero_exit_survives_context_wrapping() {
        let err = Error::NonZeroExit {
            command: "kubectl wait --for=condition=complete job/j".to_string(),
            exit_code: 1,
            logs: "timed out waiting for the condition".to_string(),
        }
        .wrap("probing job/j")
        .wrap("waiting for resources to be stable");

        assert!(err.is_non_zero_exit());
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(
            err.command_logs(),
            Some("timed out waiting for the condition")
        );
        assert!(err.to_string().starts_with("waiting for resources to be stable: probing job/j"));
    }

    /// Story: the full chain reads from stage to root cause
    #[test]
    fn story_context_chain_reads_top_down() {
        let result: Result<(), Error> = Err(Error::arm(
            "PUT resourceGroups/rg1",
            409,
            "Conflict",
            "resource group is being deleted",
        ));
        let err = result
            .context("creating resource group rg1")
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("creating resource group rg1: ARM error"));
        assert!(msg.contains("Conflict"));
        assert!(matches!(err.root_cause(), Error::Arm { status: 409, .. }));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::arm("GET x", 503, "ServiceUnavailable", "busy").is_retryable());
        assert!(Error::arm("GET x", 429, "TooManyRequests", "slow down").is_retryable());
        assert!(!Error::arm("PUT x", 400, "InvalidTemplate", "bad").is_retryable());
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::NonZeroExit {
            command: "false".to_string(),
            exit_code: 1,
            logs: String::new(),
        }
        .is_retryable());
        assert!(Error::arm("GET x", 500, "InternalServerError", "oops")
            .wrap("polling")
            .is_retryable());
    }

    #[test]
    fn test_serialization_error_names_object() {
        let err = Error::serialization_for("Deployment", "nginx", "bad float");
        assert_eq!(
            err.to_string(),
            "serialization error for Deployment/nginx: bad float"
        );
        assert_eq!(
            Error::serialization("eof").to_string(),
            "serialization error: eof"
        );
    }

    #[test]
    fn test_cancelled_is_detected_through_context() {
        let err = Error::cancelled("stage A").wrap("provisioning basic cluster");
        assert!(err.is_cancelled());
        assert!(!err.is_non_zero_exit());
    }
}
