//! Core types for differentiable rigid-body simulation.
//!
//! This crate provides the plain data shared by the gradient core
//! (`sim-diff`) and any world that feeds it:
//!
//! - [`SimError`] - Recoverable failures (stepping, configuration, mass matrices)
//! - [`GradientConfig`] - Strategy selection, finite-difference epsilons, diagnostic tolerances
//! - [`SolverFlags`] - Constraint solver toggles flipped during finite differencing
//! - [`LossGradient`] - The `{position, velocity, torque}` triple carried by backprop
//! - [`WithRespectTo`] - Differentiation target selector
//!
//! # Layer 0
//!
//! These types are **pure data**. They carry no physics and can be used by
//! headless training loops, optimizers, or other engines.
//!
//! # Example
//!
//! ```
//! use sim_types::{GradientConfig, GradientStrategy, LossGradient};
//!
//! let config = GradientConfig::default().with_strategy(GradientStrategy::Massed);
//! assert!(config.validate().is_ok());
//!
//! let loss = LossGradient::zeros(3);
//! assert_eq!(loss.dofs(), 3);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-types/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod config;
mod error;
mod loss;

pub use config::{
    DiagnosticTolerance, FiniteDifferenceConfig, GradientConfig, GradientStrategy, SolverFlags,
};
pub use error::SimError;
pub use loss::{LossGradient, WithRespectTo};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
