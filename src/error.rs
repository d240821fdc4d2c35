//! Error types for the Pod Control Plane
//!
//! Provides structured error types for pod discovery, reconciliation,
//! compose/decompose workflows and the data store.

use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Use the asynchronous delete workflow to remove pod {pod}")]
    PodDeleteRequiresWorkflow { pod: String },

    #[error("Resource pool {pool} is in use and cannot be deleted")]
    PoolInUse { pool: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("{field}: {message}")]
    FieldValidation { field: String, message: String },

    #[error("{0}")]
    OverCommit(crate::reconcile::admission::OverCommitViolation),

    #[error("Pod with type and parameters already exists.")]
    PodExists,

    #[error("No current pod resources match constraints.")]
    NoMatchingPods,

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    #[error("Unable to start the pod discovery process. No rack controllers connected.")]
    NoRackControllers,

    #[error("No rack controllers connected to reach the '{power_type}' pod.")]
    NoConnectionsAvailable { power_type: String },

    #[error("Unable to {operation} because '{power_type}' driver timed out after {seconds} seconds.")]
    DriverTimeout {
        operation: String,
        power_type: String,
        seconds: u64,
    },

    // =========================================================================
    // Remote Operation Errors
    // =========================================================================
    #[error("{0}")]
    PodProblem(String),

    // =========================================================================
    // Data Consistency Errors
    // =========================================================================
    #[error("Unknown block device type: {device_type}")]
    UnknownBlockDeviceType { device_type: String },

    #[error("Discovered {entity} share the match key {key}")]
    DuplicateMatchKey { entity: String, key: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad category of a failure, used by callers to decide presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any remote call was attempted
    Validation,
    /// No reachable rack controller, or the driver timed out
    Connectivity,
    /// The remote driver reported a failure
    RemoteOperation,
    /// Discovery data does not fit the data model
    DataConsistency,
    /// Everything else
    Internal,
}

impl Error {
    /// Shorthand for a field-scoped validation error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FieldValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing record
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Determine the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::FieldValidation { .. }
            | Error::OverCommit(_)
            | Error::PodExists
            | Error::NoMatchingPods
            | Error::PoolInUse { .. } => ErrorCategory::Validation,

            Error::NoRackControllers
            | Error::NoConnectionsAvailable { .. }
            | Error::DriverTimeout { .. } => ErrorCategory::Connectivity,

            Error::PodProblem(_) => ErrorCategory::RemoteOperation,

            Error::UnknownBlockDeviceType { .. } | Error::DuplicateMatchKey { .. } => {
                ErrorCategory::DataConsistency
            }

            _ => ErrorCategory::Internal,
        }
    }

    /// Check if this error is transient.
    ///
    /// Nothing in the control plane retries on its own; callers may use this
    /// to decide whether to try again later.
    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Connectivity)
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;
