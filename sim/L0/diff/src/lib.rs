//! Analytic gradients through one constrained rigid-body timestep.
//!
//! Given the state of a multibody world before and after a step, and the
//! constraint groups the LCP solver resolved during that step, this crate
//! computes how the post-step velocity and position depend on the pre-step
//! position, velocity and torque:
//!
//! - [`ContactGradient`] - Per-constraint-dimension sensitivity of contact
//!   point, normal, force direction and generalized constraint force.
//! - [`ConstraintGroupMatrices`] - Turns one group's impulse tests and LCP
//!   solution into clamping, upper-bound and bounce matrices.
//! - [`StepGradientSnapshot`] - Assembles world-sized matrices, the four step
//!   Jacobians, implicit backprop and finite-difference checks.
//!
//! The physics engine itself is abstracted behind [`DifferentiableWorld`] and
//! [`Skeleton`]. Every routine that perturbs the live world does so through a
//! [`StateGuard`], which puts the world back exactly as it found it on drop.
//!
//! # Example
//!
//! ```ignore
//! use sim_diff::{forward_pass, LossGradient};
//!
//! let snapshot = forward_pass(&mut world)?;
//! let vel_vel = snapshot.vel_vel_jacobian(&mut world);
//! let this_step = snapshot.backprop(&mut world, &next_step_loss);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-diff/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // nalgebra types block most const fns
    clippy::suboptimal_flops,          // mul_add rewrites obscure the formulas
    clippy::cast_precision_loss,       // usize to f64 is fine for counts
    clippy::missing_panics_doc,        // Panics are contract violations, documented on the type
    clippy::many_single_char_names,    // Matrix formulas read better with short names
)]

pub mod contact;
pub mod contact_gradient;
pub mod group;
pub mod linalg;
pub mod projection;
pub mod restore;
pub mod snapshot;
pub mod spatial;
pub mod world;

pub use contact::{
    BodyRef, ConstraintKey, ConstraintKind, ConstraintRole, ContactGeometry, ContactType,
    JointLimitGeometry, SkeletonContactType,
};
pub use contact_gradient::ContactGradient;
pub use group::{
    ConstraintDimension, ConstraintGroupMatrices, ConstraintMapping, GroupSkeleton, ImpulseTest,
};
pub use projection::ConstraintBlocks;
pub use restore::{RestorableSnapshot, ScopedSolverFlags, StateGuard};
pub use snapshot::{
    DofSegment, Evaluation, SegmentOwner, StepGradientSnapshot, StepState, forward_pass,
    forward_pass_idempotent, forward_pass_with_config,
};
pub use spatial::SpatialVector;
pub use world::{BodyIndex, DifferentiableWorld, Skeleton};

pub use sim_types::{
    GradientConfig, GradientStrategy, LossGradient, Result, SimError, SolverFlags, WithRespectTo,
};
