//! Integration tests for the differentiable simulation core.
//!
//! These tests drive the reference world through one step and check:
//! - Analytic step Jacobians against finite differences of the stepped world
//! - Contact gradients against brute-force re-detection of the contact
//! - Implicit backprop against the transposed Jacobians
//! - LCP and mass-weighted projection strategies
//! - That every probe leaves the world exactly as it found it

pub mod backprop;
pub mod bounce;
pub mod contact_gradients;
pub mod finite_differences;
pub mod partition;
pub mod restoration;
pub mod strategies;
pub mod wrt;
