//! Error types for the MetaKube provisioner.
//!
//! This module provides the error hierarchy for every stage of a cluster
//! operation: manifest loading, local state, API transport, remote
//! preconditions, version selection, provisioning waits and planning.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the MetaKube provisioner.
#[derive(Debug, Error)]
pub enum MetaKubeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// MetaKube API errors.
    #[error("MetaKube API error: {0}")]
    Api(#[from] ApiError),

    /// A remote precondition did not hold; nothing was written.
    #[error("Validation failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// Version parsing or selection errors.
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// Provisioning errors (timeouts, stuck upgrades).
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was interrupted.
        operation: String,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Autoscale bounds are inconsistent with each other or with replicas.
    #[error("Invalid autoscale settings [{min_replicas}; {max_replicas}] for {replicas} replicas: {reason}")]
    InvalidAutoscale {
        /// Lower bound.
        min_replicas: u32,
        /// Upper bound.
        max_replicas: u32,
        /// Requested replica count.
        replicas: u32,
        /// What is wrong with the bounds.
        reason: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Body of a failed API response.
///
/// The control plane usually answers with a JSON error document; when it
/// does not, the raw text is kept so nothing is lost.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// Body decoded as JSON.
    Json(serde_json::Value),
    /// Body that was not valid JSON.
    Raw(String),
}

impl ErrorBody {
    /// Decodes a response body, falling back to lossy UTF-8 text.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes)
            .map_or_else(|_| Self::Raw(String::from_utf8_lossy(bytes).into_owned()), Self::Json)
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Raw(text) if text.trim().is_empty() => write!(f, "<empty body>"),
            Self::Raw(text) => write!(f, "{}", text.trim()),
        }
    }
}

/// MetaKube API transport errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network error.
    #[error("Network error communicating with MetaKube: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("{method} {path} failed with status {status}: {body}")]
    RequestFailed {
        /// HTTP method.
        method: String,
        /// Resource path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Decoded error payload.
        body: ErrorBody,
    },

    /// Authentication failed.
    #[error("{method} {path} was rejected as unauthorized (status {status}): {body}")]
    AuthenticationFailed {
        /// HTTP method.
        method: String,
        /// Resource path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Decoded error payload.
        body: ErrorBody,
    },

    /// A resource that must exist was not found.
    #[error("Resource not found: {path}")]
    NotFound {
        /// Resource path.
        path: String,
    },

    /// Patch kept conflicting with in-flight provisioning.
    #[error("PATCH {path} still conflicting after {attempts} attempts (is cluster provisioning complete?)")]
    ConflictRetriesExhausted {
        /// Resource path.
        path: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A success status other than the one required.
    #[error("{method} {path} returned status {status}, expected {expected}")]
    UnexpectedStatus {
        /// HTTP method.
        method: String,
        /// Resource path.
        path: String,
        /// Required status.
        expected: u16,
        /// Received status.
        status: u16,
    },

    /// Invalid response from API.
    #[error("Invalid response from {path}: {message}")]
    InvalidResponse {
        /// Resource path.
        path: String,
        /// Description of the response issue.
        message: String,
    },
}

/// Remote preconditions checked before any mutating call.
#[derive(Debug, Error)]
pub enum PreconditionError {
    /// Datacenter lookup returned nothing.
    #[error("Datacenter `{name}` does not exist")]
    UnknownDatacenter {
        /// Human-facing datacenter name.
        name: String,
    },

    /// Tenant is not visible with the supplied credentials.
    #[error("Tenant `{tenant}` is not available in datacenter `{datacenter}`. Consider changing to one of:\n{}", bullet_list(.available))]
    UnknownTenant {
        /// Requested tenant.
        tenant: String,
        /// Datacenter name.
        datacenter: String,
        /// Tenants that are visible.
        available: Vec<String>,
    },

    /// Image is not visible with the supplied credentials.
    #[error("Image `{image}` is not available in datacenter `{datacenter}`. Consider changing to one of:\n{}", bullet_list(.available))]
    UnknownImage {
        /// Requested image.
        image: String,
        /// Datacenter name.
        datacenter: String,
        /// Images that are visible.
        available: Vec<String>,
    },

    /// Cluster tries to redeclare a project-level label.
    #[error("Cannot change labels inherited from project: {key}={value}")]
    LabelCollision {
        /// Colliding label key.
        key: String,
        /// Value the cluster declared.
        value: String,
    },

    /// Requested version is older than the running one.
    #[error("Cluster version cannot be downgraded from {current} to {target}")]
    Downgrade {
        /// Current cluster version.
        current: String,
        /// Resolved target version.
        target: String,
    },

    /// SSH key name does not exist in the project.
    #[error("No SSH key with name `{name}` found in the project")]
    UnknownSshKey {
        /// Missing key name.
        name: String,
    },
}

/// Version parsing and selection errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// Not a `major.minor.patch` triple.
    #[error("Invalid version `{input}`: expected major.minor.patch")]
    Parse {
        /// The rejected input.
        input: String,
    },

    /// No candidate carries the requested prefix.
    #[error("Could not find versions prefixed by `{prefix}`, available versions are: {}", .available.join(", "))]
    NoMatch {
        /// Requested prefix.
        prefix: String,
        /// Candidates that were considered.
        available: Vec<String>,
    },
}

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A wait ran out of ticks.
    #[error("Timeout waiting for {operation}{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Last probe error, when the wait reports them.
        last_error: Option<String>,
    },

    /// Upgrade endpoint offers no further hop and the target is not reached.
    #[error("Cluster has no further upgrades, stuck at {version}")]
    UpgradeStuck {
        /// Version the cluster is stuck at.
        version: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// An immutable field changed.
    #[error("Changing `{field}` from `{from}` to `{to}` requires destroying and recreating the cluster")]
    RequiresReplacement {
        /// Field that changed.
        field: String,
        /// Previously applied value.
        from: String,
        /// Requested value.
        to: String,
    },
}

/// Result type alias for provisioner operations.
pub type Result<T> = std::result::Result<T, MetaKubeError>;

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("* {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl MetaKubeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a cancellation error for the given operation.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Returns true if this error means the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(ApiError::NotFound { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}
