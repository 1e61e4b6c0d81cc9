//! Error types shared by the samplers and the density evaluators.

use std::convert::Infallible;

use thiserror::Error;

/// Errors that abort a single chain.
///
/// In an ensemble these are collected per chain; one chain failing never
/// stops its siblings.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Logp function returned unrecoverable error: {0}")]
    LogpFailure(Box<dyn std::error::Error + Send + Sync>),

    #[error("Log-density {value} at an in-support point {state:?} is not a valid density value")]
    NonFinite { value: f64, state: Vec<f64> },

    #[error("Proposal density from {from:?} to {to:?} gave a NaN acceptance ratio")]
    InvalidProposal { from: Vec<f64>, to: Vec<f64> },

    #[error("Initial state {0:?} lies outside the support of the target")]
    InvalidInitialState(Vec<f64>),

    #[error("Expected {expected} initial states (or a single one to broadcast), got {got}")]
    ChainCountMismatch { expected: usize, got: usize },

    #[error("Chain was cancelled before it started")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SamplerError>;

/// Errors that happen when a target evaluates its log-density.
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Recoverable errors mark a point as outside the support and lead to
    /// rejection; unrecoverable errors stop the chain.
    fn is_recoverable(&self) -> bool;
}

impl LogpError for Infallible {
    fn is_recoverable(&self) -> bool {
        match *self {}
    }
}

/// A ready-to-use [`LogpError`] for targets built from the types in this crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DensityError {
    #[error("Parameter vector lies outside the support of the prior")]
    OutsideSupport,

    #[error("Forward simulation failed: {0}")]
    SimulationFailed(#[from] SimulationError),

    #[error("Invalid model: {0}")]
    Invalid(String),
}

impl LogpError for DensityError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DensityError::OutsideSupport | DensityError::SimulationFailed(_)
        )
    }
}

/// Failure of an external forward model, e.g. an integrator hitting a singularity.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Simulation diverged at t = {0}")]
    Diverged(f64),

    #[error("Simulation produced a non-finite value at output index {0}")]
    NonFinite(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_failures_are_recoverable() {
        let err: DensityError = SimulationError::Diverged(1.5).into();
        assert!(err.is_recoverable());
        assert!(DensityError::OutsideSupport.is_recoverable());
        assert!(!DensityError::Invalid("bad shape".into()).is_recoverable());
    }

    #[test]
    fn logp_failure_message_carries_source() {
        let err = SamplerError::LogpFailure(Box::new(DensityError::Invalid("x".into())));
        assert_eq!(
            err.to_string(),
            "Logp function returned unrecoverable error: Invalid model: x"
        );
    }
}
