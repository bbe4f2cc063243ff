//! Reference multibody world for the differentiable simulation core.
//!
//! Implements [`sim_diff::DifferentiableWorld`] with:
//!
//! - [`ChainSkeleton`] - Serial chains of revolute, prismatic and weld joints
//!   with recursive Newton-Euler bias forces
//! - [`collision`] - Vertex-plane contacts and joint-limit detection
//! - [`lcp`] - Boxed projected Gauss-Seidel with friction coupling
//! - [`World`] - Semi-implicit Euler stepping that records
//!   [`sim_diff::ConstraintGroupMatrices`] for every constraint island
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector3;
//! use sim_diff::{forward_pass, DifferentiableWorld};
//! use sim_world::{presets, World, WorldConfig};
//!
//! let mut world = World::new(WorldConfig::default())?
//!     .with_skeleton(presets::ground("ground", 0.0))?
//!     .with_skeleton(presets::point_mass("ball", 1.0, Vector3::zeros()))?;
//!
//! let snapshot = forward_pass(&mut world)?;
//! assert_eq!(snapshot.num_clamping(), 1);
//! let vel_vel = snapshot.vel_vel_jacobian(&mut world);
//! assert_eq!(vel_vel.nrows(), world.num_dofs());
//! # Ok::<(), sim_types::SimError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/sim-world/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // nalgebra types block most const fns
    clippy::suboptimal_flops,          // mul_add rewrites obscure the formulas
    clippy::cast_precision_loss,       // usize to f64 is fine for counts
    clippy::many_single_char_names,    // Dynamics formulas read better with short names
)]

pub mod collision;
pub mod config;
pub mod lcp;
pub mod presets;
pub mod skeleton;
mod world;

pub use config::{LcpSolverConfig, PenetrationCorrection, WorldConfig};
pub use skeleton::{ChainSkeleton, Joint, JointKind, JointLimits, Link, Shape};
pub use world::{StepStats, World};
