//! Error types for the orchestrator.
//!
//! A single `thiserror`-derived enum carries every failure kind named in the
//! design (`InvalidInput`, `MissingRequired`, `MissingDependency`, `Insufficient`,
//! `SupplyChainViolation`, `DetectionFailed`, `RuntimeUnreachable`, `SynthesisFailed`,
//! `TransientOperation`, `PermanentOperation`, `DeadlineExceeded`, `Cancelled`), each
//! carrying enough context (step name, attempted command) to render a useful report.

use std::time::Duration;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Context attached to an error: which pipeline step was running and what command,
/// if any, was attempted.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Name of the pipeline step that was executing when the error occurred.
    pub step: Option<String>,
    /// The command line that was attempted, if the error is command-shaped.
    pub command: Option<String>,
}

impl ErrorContext {
    /// Build a context naming only the step.
    #[must_use]
    pub fn step(name: impl Into<String>) -> Self {
        Self {
            step: Some(name.into()),
            command: None,
        }
    }

    /// Build a context naming both step and command.
    #[must_use]
    pub fn step_command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            step: Some(name.into()),
            command: Some(command.into()),
        }
    }
}

/// Top-level error type for all orchestrator operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Configuration value failed validation.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what failed validation.
        message: String,
    },

    /// A required value was absent in a non-interactive context.
    #[error("missing required value: {field}")]
    MissingRequired {
        /// Name of the missing field.
        field: String,
    },

    /// Neither a usable runtime nor compose implementation could be found.
    #[error("missing dependency: {message}")]
    MissingDependency {
        /// Description of what is missing (runtime, compose plugin, binary).
        message: String,
    },

    /// Host preflight found the machine under-provisioned.
    #[error("insufficient host resources: {}", .reasons.join("; "))]
    Insufficient {
        /// All collected failure reasons (preflight aggregates, never short-circuits).
        reasons: Vec<String>,
    },

    /// The supply-chain validator rejected an image reference.
    #[error("supply-chain violation: {message} (image: {image})")]
    SupplyChainViolation {
        /// Human-readable explanation.
        message: String,
        /// The offending image reference or manifest key.
        image: String,
    },

    /// Runtime/compose-implementation detection could not select a viable pair.
    #[error("detection failed: {message}")]
    DetectionFailed {
        /// Explanation of why no viable (runtime, compose) pair was found.
        message: String,
    },

    /// The selected runtime/compose invoker was called before detection completed.
    #[error("runtime unreachable: {message}")]
    RuntimeUnreachable {
        /// Explanation of the connectivity failure.
        message: String,
    },

    /// Compose document synthesis or atomic rendering failed.
    #[error("compose synthesis failed: {message}")]
    SynthesisFailed {
        /// Explanation of the synthesis failure.
        message: String,
    },

    /// A transient failure in an operation designated retryable.
    #[error("transient operation failed: {command} (exit {exit_code}): {stderr}")]
    TransientOperation {
        /// The command that failed.
        command: String,
        /// Process exit code.
        exit_code: i32,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A permanent failure that must not be retried.
    #[error("operation failed: {command} (exit {exit_code}): {stderr}")]
    PermanentOperation {
        /// The command that failed.
        command: String,
        /// Process exit code.
        exit_code: i32,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A wall-clock deadline was exceeded; semantically equivalent to POSIX 124.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded {
        /// How long the operation ran before being killed.
        elapsed: Duration,
    },

    /// The process received a cancellation signal.
    #[error("cancelled")]
    Cancelled,

    /// The runtime socket/binary exists but the current user lacks permission to use
    /// it (e.g. not a member of the `docker` group).
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Explanation of what access was refused.
        message: String,
    },

    /// A platform helper changed group membership; the change only takes effect after
    /// the user logs in again.
    #[error("re-login required: {message}")]
    ReloginRequired {
        /// Explanation of what changed and why a new session is needed.
        message: String,
    },

    /// An I/O error occurred.
    #[error("io error: {message}")]
    Io {
        /// Human-readable description of what I/O operation failed.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON encode/decode error occurred.
    #[error("json error: {message}")]
    Json {
        /// Human-readable description of the failing operation.
        message: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A YAML encode/decode error occurred.
    #[error("yaml error: {message}")]
    Yaml {
        /// Human-readable description of the failing operation.
        message: String,
        /// The underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}

impl OrchestratorError {
    /// Create an `InvalidInput` error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a `MissingRequired` error.
    pub fn missing_required(field: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
        }
    }

    /// Create a `MissingDependency` error.
    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self::MissingDependency {
            message: message.into(),
        }
    }

    /// Create an `Insufficient` error from a reason list.
    pub fn insufficient(reasons: Vec<String>) -> Self {
        Self::Insufficient { reasons }
    }

    /// Create a `SupplyChainViolation` error.
    pub fn supply_chain_violation(message: impl Into<String>, image: impl Into<String>) -> Self {
        Self::SupplyChainViolation {
            message: message.into(),
            image: image.into(),
        }
    }

    /// Create a `DetectionFailed` error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed {
            message: message.into(),
        }
    }

    /// Create a `RuntimeUnreachable` error.
    pub fn runtime_unreachable(message: impl Into<String>) -> Self {
        Self::RuntimeUnreachable {
            message: message.into(),
        }
    }

    /// Create a `PermissionDenied` error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a `ReloginRequired` error.
    pub fn relogin_required(message: impl Into<String>) -> Self {
        Self::ReloginRequired {
            message: message.into(),
        }
    }

    /// Create a `SynthesisFailed` error.
    pub fn synthesis_failed(message: impl Into<String>) -> Self {
        Self::SynthesisFailed {
            message: message.into(),
        }
    }

    /// Create a `TransientOperation` error.
    pub fn transient(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::TransientOperation {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a `PermanentOperation` error.
    pub fn permanent(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::PermanentOperation {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error should be absorbed by the retry combinator.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientOperation { .. } | Self::Io { .. })
    }

    /// Coarse category, used for logging and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } | Self::MissingRequired { .. } => "config",
            Self::MissingDependency { .. } | Self::DetectionFailed { .. } => "prerequisites",
            Self::Insufficient { .. } => "preflight",
            Self::SupplyChainViolation { .. } => "supply-chain",
            Self::RuntimeUnreachable { .. } | Self::PermissionDenied { .. } => "runtime",
            Self::SynthesisFailed { .. } => "synthesis",
            Self::TransientOperation { .. } | Self::PermanentOperation { .. } => "command",
            Self::DeadlineExceeded { .. } => "deadline",
            Self::Cancelled => "cancelled",
            Self::ReloginRequired { .. } => "permissions",
            Self::Io { .. } => "io",
            Self::Json { .. } | Self::Yaml { .. } => "parsing",
        }
    }

    /// The process exit code this error maps to, per the CLI contract.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput { .. } | Self::MissingRequired { .. } => 2,
            Self::MissingDependency { .. } | Self::DetectionFailed { .. } => 3,
            Self::Insufficient { .. } => 4,
            Self::SupplyChainViolation { .. } => 2,
            Self::PermissionDenied { .. } => 5,
            Self::DeadlineExceeded { .. } => 124,
            Self::Cancelled => 130,
            Self::ReloginRequired { .. } => 78,
            _ => 1,
        }
    }

    /// Remediation text for well-known failure classes, rendered on the advisory path.
    #[must_use]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::MissingDependency { .. } => Some(
                "Install Docker or Podman and a compose implementation, then re-run. \
                 See https://docs.docker.com/compose/install/ or your distribution's podman-compose package.",
            ),
            Self::RuntimeUnreachable { .. } => Some(
                "Confirm the container runtime daemon/socket is reachable (try `docker info` \
                 or `podman info`) and that your user has permission to access it.",
            ),
            Self::Insufficient { .. } => Some(
                "Free disk space, add RAM/CPU, or reduce indexer_count/search_head_count, \
                 then re-run preflight.",
            ),
            Self::SupplyChainViolation { .. } => Some(
                "Pin the offending image to a `repo@sha256:<digest>` reference in the \
                 versions manifest before deploying in a production-class mode.",
            ),
            Self::PermissionDenied { .. } => Some(
                "Add your user to the runtime's admin group (e.g. `usermod -aG docker $USER`) \
                 or run with sufficient privileges, then retry.",
            ),
            Self::ReloginRequired { .. } => Some(
                "Log out and back in (or start a new shell session) for the group membership \
                 change to take effect, then re-run.",
            ),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(OrchestratorError::invalid_input("x").category(), "config");
        assert_eq!(
            OrchestratorError::missing_dependency("x").category(),
            "prerequisites"
        );
        assert_eq!(
            OrchestratorError::insufficient(vec!["x".into()]).category(),
            "preflight"
        );
    }

    #[test]
    fn retryable() {
        assert!(OrchestratorError::transient("cmd", 1, "", "").is_retryable());
        assert!(!OrchestratorError::permanent("cmd", 1, "", "").is_retryable());
        assert!(!OrchestratorError::invalid_input("x").is_retryable());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(OrchestratorError::invalid_input("x").exit_code(), 2);
        assert_eq!(OrchestratorError::missing_dependency("x").exit_code(), 3);
        assert_eq!(
            OrchestratorError::insufficient(vec!["x".into()]).exit_code(),
            4
        );
        assert_eq!(
            OrchestratorError::DeadlineExceeded {
                elapsed: Duration::from_secs(1)
            }
            .exit_code(),
            124
        );
        assert_eq!(OrchestratorError::Cancelled.exit_code(), 130);
        assert_eq!(OrchestratorError::permission_denied("x").exit_code(), 5);
        assert_eq!(OrchestratorError::relogin_required("x").exit_code(), 78);
    }

    #[test]
    fn remediation_present_for_known_classes() {
        assert!(OrchestratorError::missing_dependency("x")
            .remediation()
            .is_some());
        assert!(OrchestratorError::invalid_input("x")
            .remediation()
            .is_none());
    }
}
