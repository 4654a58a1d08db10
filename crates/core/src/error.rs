//! Error types for the smoke simulator and optimizer.
//!
//! Configuration and input errors are reported before any simulation runs.
//! Numerical degeneracy (NaN/Inf) is detected after every kernel and aborts the
//! current outer iteration with [`SimError::NonFinite`].

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Pipeline stage at which a non-finite value was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Semi-Lagrangian advection of the velocity components
    VelocityAdvection,
    /// Divergence of the advected velocity
    Divergence,
    /// One relaxation sweep of the pressure solve
    Relaxation,
    /// Pressure-gradient velocity correction
    Correction,
    /// Advection of the smoke density
    DensityAdvection,
    /// Terminal mean squared error
    Loss,
    /// Gradient w.r.t. the initial velocity
    Gradient,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VelocityAdvection => "velocity advection",
            Self::Divergence => "divergence",
            Self::Relaxation => "pressure relaxation",
            Self::Correction => "velocity correction",
            Self::DensityAdvection => "density advection",
            Self::Loss => "loss",
            Self::Gradient => "gradient",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while configuring or running the simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A configuration parameter is out of range.
    #[error("invalid configuration: {parameter} {reason}")]
    InvalidConfig {
        /// Parameter name.
        parameter: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// An input field does not have n×n cells.
    #[error("{name}: expected {expected} cells, got {actual}")]
    DimensionMismatch {
        /// Input name (e.g. "initial density").
        name: String,
        /// Expected cell count.
        expected: usize,
        /// Actual cell count.
        actual: usize,
    },

    /// An input field could not be parsed or holds invalid values.
    #[error("{name}, line {line}: {reason}")]
    MalformedInput {
        /// Input name.
        name: String,
        /// 1-based line number (0 when not line-specific).
        line: usize,
        /// What is wrong.
        reason: String,
    },

    /// A NaN or infinity appeared during the forward or backward pass.
    #[error("non-finite value after {stage} at step {step}{}", sweep_suffix(.sweep))]
    NonFinite {
        /// Stage that produced the value.
        stage: Stage,
        /// Time step.
        step: usize,
        /// Relaxation sweep, if the stage is a sweep.
        sweep: Option<usize>,
    },

    /// Failed to read an input file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[allow(clippy::ref_option)]
fn sweep_suffix(sweep: &Option<usize>) -> String {
    sweep.map(|k| format!(", sweep {k}")).unwrap_or_default()
}

impl SimError {
    /// Shorthand for an [`SimError::InvalidConfig`].
    pub fn invalid_config(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            parameter,
            reason: reason.into(),
        }
    }

    /// Returns `true` for numerical degeneracy detected mid-run.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::NonFinite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_message_includes_sweep() {
        let err = SimError::NonFinite {
            stage: Stage::Relaxation,
            step: 3,
            sweep: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "non-finite value after pressure relaxation at step 3, sweep 7"
        );
        assert!(err.is_numerical());
    }

    #[test]
    fn test_non_finite_message_without_sweep() {
        let err = SimError::NonFinite {
            stage: Stage::Loss,
            step: 9,
            sweep: None,
        };
        assert_eq!(err.to_string(), "non-finite value after loss at step 9");
    }

    #[test]
    fn test_invalid_config_message() {
        let err = SimError::invalid_config("resolution", "must be positive, got 0");
        assert_eq!(
            err.to_string(),
            "invalid configuration: resolution must be positive, got 0"
        );
        assert!(!err.is_numerical());
    }
}
