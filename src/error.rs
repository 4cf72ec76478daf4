//! Error types for aiidalab-launch.
//!
//! # Error Message Style Guide
//!
//! All error messages follow a consistent format:
//!
//! - **Format**: `"<operation> failed: <reason>"` or `"<entity> not found: <identifier>"`
//! - **Case**: All lowercase (Rust convention for error messages)
//! - **Context**: Include the container, profile, path or volume when available
//!
//! ```text
//! "engine operation failed: start container: port is already allocated"
//! "profile not found: default"
//! "invalid mount spec '/a:/b:xx': invalid mode 'xx' (expected ro or rw)"
//! ```
//!
//! # Taxonomy
//!
//! Every error reaching the CLI belongs to one of the following groups:
//!
//! | Group        | Variants |
//! |--------------|----------|
//! | validation   | `InvalidProfileName`, `InvalidMountSpec`, `InvalidVolumeName`, `MountSourceNotFound` |
//! | precondition | `RequiresContainer`, `ContainerExists`, `NoHostPortAssigned`, `NotManagedContainer` |
//! | engine       | `EngineUnavailable`, `Engine`, `ImagePull`, `CommandFailed` |
//! | readiness    | `ServicesFailed` |
//! | timeout      | `ServicesTimeout` |
//! | removal      | `Removal` |
//! | config       | `Config`, `ProfileNotFound`, `ProfileExists` |
//!
//! Raw `bollard` errors never leave [`crate::engine::docker`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classification for engine errors so callers can tolerate specific
/// responses without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineErrorKind {
    /// Resource does not exist (HTTP 404).
    NotFound,
    /// Resource already exists or is in use (HTTP 409).
    Conflict,
    /// Request was a no-op, e.g. starting a running container (HTTP 304).
    NotModified,
    /// Anything else.
    #[default]
    Other,
}

/// Result type alias using aiidalab-launch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for aiidalab-launch operations.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// Profile name violates the naming rules.
    #[error(
        "invalid profile name '{name}': the name must be composed of the characters \
         [a-zA-Z0-9.-] and must start with an alphanumeric character"
    )]
    InvalidProfileName {
        /// The rejected name.
        name: String,
    },

    /// Mount specification could not be parsed.
    #[error("invalid mount spec '{spec}': {reason}")]
    InvalidMountSpec {
        /// The rejected specification.
        spec: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Relative mount source that is not a valid volume name.
    #[error("invalid volume name '{name}': use an absolute path for bind mounts")]
    InvalidVolumeName {
        /// The rejected volume name.
        name: String,
    },

    /// Bind mount source does not exist on the host.
    #[error("mount source not found: {}", path.display())]
    MountSourceNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    // ========================================================================
    // Precondition Errors
    // ========================================================================
    /// Operation requires a container but none exists.
    #[error("operation requires a container instance: container not found: {container}")]
    RequiresContainer {
        /// Name of the expected container.
        container: String,
    },

    /// Container already exists where none was expected.
    #[error("container already exists: {container}")]
    ContainerExists {
        /// Name of the existing container.
        container: String,
    },

    /// The container has no host port bound to the notebook service.
    #[error("no host port assigned: {container}")]
    NoHostPortAssigned {
        /// Name or id of the container.
        container: String,
    },

    /// Container was not created by this tool.
    #[error("not a managed container: {name}")]
    NotManagedContainer {
        /// Name of the foreign container.
        name: String,
    },

    // ========================================================================
    // Readiness Errors
    // ========================================================================
    /// A readiness probe failed hard.
    #[error("services failed to become ready: {0}")]
    ServicesFailed(String),

    /// Readiness was not reached in time.
    #[error("services did not become ready within {}", humantime::format_duration(*timeout))]
    ServicesTimeout {
        /// The timeout that expired.
        timeout: Duration,
    },

    /// A command executed inside the container failed.
    #[error("command failed with exit code: {exit_code}")]
    CommandFailed {
        /// Exit code reported by the engine.
        exit_code: i64,
    },

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// The container engine could not be reached.
    #[error("engine not available: {0}")]
    EngineUnavailable(String),

    /// An engine API call failed.
    #[error("engine operation failed: {operation}: {reason}")]
    Engine {
        /// The operation that failed (e.g., "start container").
        operation: String,
        /// The reason for the failure.
        reason: String,
        /// Classification of the engine response.
        kind: EngineErrorKind,
    },

    /// Image could not be pulled.
    #[error("image pull failed: {image}: {reason}")]
    ImagePull {
        /// Image reference.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Removal Errors
    // ========================================================================
    /// Removing a container, volume or directory failed.
    #[error("removal failed: {resource}: {reason}")]
    Removal {
        /// What was being removed.
        resource: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration operation failed.
    #[error("config operation failed: {operation}: {reason}")]
    Config {
        /// The operation that failed (e.g., "load", "save", "parse").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Profile lookup by name failed.
    #[error("profile not found: {name}")]
    ProfileNotFound {
        /// Requested profile name.
        name: String,
    },

    /// Profile with this name is already configured.
    #[error("profile already exists: {name}")]
    ProfileExists {
        /// Conflicting profile name.
        name: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error wrapper.
    #[error("io operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    // ========================================================================
    // Validation Error Constructors
    // ========================================================================

    /// Create an invalid profile name error.
    pub fn invalid_profile_name(name: impl Into<String>) -> Self {
        Self::InvalidProfileName { name: name.into() }
    }

    /// Create an invalid mount spec error.
    pub fn invalid_mount_spec(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMountSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid volume name error.
    pub fn invalid_volume_name(name: impl Into<String>) -> Self {
        Self::InvalidVolumeName { name: name.into() }
    }

    // ========================================================================
    // Precondition Error Constructors
    // ========================================================================

    /// Create a "requires container" error.
    pub fn requires_container(container: impl Into<String>) -> Self {
        Self::RequiresContainer {
            container: container.into(),
        }
    }

    /// Create a "no host port" error.
    pub fn no_host_port(container: impl Into<String>) -> Self {
        Self::NoHostPortAssigned {
            container: container.into(),
        }
    }

    // ========================================================================
    // Engine Error Constructors
    // ========================================================================

    /// Create a generic engine error.
    pub fn engine(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            reason: reason.into(),
            kind: EngineErrorKind::Other,
        }
    }

    /// Create an engine error with an explicit classification.
    pub fn engine_with_kind(
        operation: impl Into<String>,
        reason: impl Into<String>,
        kind: EngineErrorKind,
    ) -> Self {
        Self::Engine {
            operation: operation.into(),
            reason: reason.into(),
            kind,
        }
    }

    /// Create an engine "not found" error.
    pub fn engine_not_found(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::engine_with_kind(operation, reason, EngineErrorKind::NotFound)
    }

    // ========================================================================
    // Removal / Config Error Constructors
    // ========================================================================

    /// Create a removal error.
    pub fn removal(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Removal {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a config operation error.
    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Engine reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Engine {
                kind: EngineErrorKind::NotFound,
                ..
            }
        )
    }

    /// Engine reported a conflict (e.g. name already in use).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Engine {
                kind: EngineErrorKind::Conflict,
                ..
            }
        )
    }

    /// Engine reported that the request changed nothing.
    pub fn is_not_modified(&self) -> bool {
        matches!(
            self,
            Error::Engine {
                kind: EngineErrorKind::NotModified,
                ..
            }
        )
    }

    /// User-facing guidance for errors the user can fix themselves.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::EngineUnavailable(_) => Some(
                "Unable to communicate with docker on this host. This usually means that \
                 Docker is not installed or that the installation is misconfigured. \
                 See https://docs.docker.com/get-docker/ for installation instructions."
                    .to_string(),
            ),
            Error::ServicesFailed(_) => Some(
                "The instance failed to start up. Inspect its output with \
                 'aiidalab-launch logs' for details."
                    .to_string(),
            ),
            Error::ServicesTimeout { .. } => Some(
                "The instance may still be starting up. Check again later with \
                 'aiidalab-launch status'."
                    .to_string(),
            ),
            Error::RequiresContainer { .. } => {
                Some("Use 'aiidalab-launch start' to create and start the instance.".to_string())
            }
            Error::Engine { reason, .. } if reason.contains("port is already allocated") => Some(
                "The configured port is already in use. Choose another port for this \
                 profile, or remove the port to let docker assign one."
                    .to_string(),
            ),
            _ => None,
        }
    }
}
