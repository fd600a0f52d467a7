//! Error types for kinematic model building and solving.

use thiserror::Error;

/// Errors that can occur while building or solving a kinematic model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KinError {
    /// Invalid body ID referenced.
    #[error("invalid body ID: {0}")]
    InvalidBodyId(u64),

    /// Invalid grip ID referenced.
    #[error("invalid grip ID: {0}")]
    InvalidGripId(u64),

    /// Invalid joint ID referenced.
    #[error("invalid joint ID: {0}")]
    InvalidJointId(u64),

    /// Joint variable index out of range.
    #[error("joint {joint} has {count} variables, index {index} is out of range")]
    VarIndexOutOfRange {
        /// Name of the joint.
        joint: String,
        /// Requested variable index.
        index: usize,
        /// Number of variables of the joint.
        count: usize,
    },

    /// A grip that takes part in the topology has no joint.
    #[error("grip {grip} has no joint")]
    MissingJoint {
        /// Name of the grip.
        grip: String,
    },

    /// A loop could not be reconstructed or does not close.
    #[error("malformed loop: {reason}")]
    MalformedLoop {
        /// Description of what went wrong.
        reason: String,
    },

    /// The model structure changed after the topology was built.
    #[error("topology is stale: built at structure epoch {built}, model is at {current}")]
    StaleTopology {
        /// Epoch at which the topology was built.
        built: u64,
        /// Current model epoch.
        current: u64,
    },

    /// A required earlier solve stage is not valid.
    #[error("{stage} requires a valid {required} state")]
    InvalidState {
        /// The stage that was attempted.
        stage: &'static str,
        /// The stage that must be valid first.
        required: &'static str,
    },

    /// Banded factorization hit a non-positive pivot.
    #[error("singular normal matrix: pivot {pivot} at row {row}")]
    SingularMatrix {
        /// Row of the failing pivot.
        row: usize,
        /// Value of the failing pivot.
        pivot: f64,
    },

    /// Vector length does not match the topology's variable count.
    #[error("vector length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl KinError {
    /// Create a malformed loop error.
    #[must_use]
    pub fn malformed_loop(reason: impl Into<String>) -> Self {
        Self::MalformedLoop {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a missing joint error.
    #[must_use]
    pub fn missing_joint(grip: impl Into<String>) -> Self {
        Self::MissingJoint { grip: grip.into() }
    }

    /// Check if this is a structural error (the model graph itself is wrong).
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidBodyId(_)
                | Self::InvalidGripId(_)
                | Self::InvalidJointId(_)
                | Self::MissingJoint { .. }
                | Self::MalformedLoop { .. }
                | Self::StaleTopology { .. }
        )
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this is a numerical failure of the linear solve.
    #[must_use]
    pub fn is_singular(&self) -> bool {
        matches!(self, Self::SingularMatrix { .. })
    }
}

/// Result type for kinematic operations.
pub type Result<T> = std::result::Result<T, KinError>;
