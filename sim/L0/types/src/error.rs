//! Error types for simulation and gradient operations.

use thiserror::Error;

/// Errors that can occur while stepping or differentiating a world.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Skeleton not found in world.
    #[error("skeleton not found: {name}")]
    SkeletonNotFound {
        /// Name of the missing skeleton.
        name: String,
    },

    /// A vector or matrix had the wrong size.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being sized.
        what: String,
        /// Expected size.
        expected: usize,
        /// Actual size provided.
        actual: usize,
    },

    /// Mass matrix could not be factored.
    #[error("mass matrix of skeleton {skeleton} is not positive definite")]
    SingularMassMatrix {
        /// Name of the offending skeleton.
        skeleton: String,
    },

    /// The constraint solver could not produce a solution.
    #[error("constraint solver failure: {reason}")]
    SolverFailure {
        /// Description of the failure.
        reason: String,
    },
}

impl SimError {
    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
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

    /// Create a skeleton-not-found error.
    #[must_use]
    pub fn skeleton_not_found(name: impl Into<String>) -> Self {
        Self::SkeletonNotFound { name: name.into() }
    }

    /// Create a dimension mismatch error.
    #[must_use]
    pub fn dimension_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Create a solver failure error.
    #[must_use]
    pub fn solver_failure(reason: impl Into<String>) -> Self {
        Self::SolverFailure {
            reason: reason.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::InvalidTimestep(_))
    }
}
