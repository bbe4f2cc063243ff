//! Scene fixtures shared by the integration tests and benchmarks.
//!
//! Every scene is a [`World`] set up so that one step has a known constraint
//! structure:
//!
//! | Scene | Constraints |
//! |-------|-------------|
//! | [`falling_ball`] | none |
//! | [`resting_ball`] | one clamping normal |
//! | [`sliding_ball`] | clamping normal, two upper-bound friction dims |
//! | [`pushed_ball`] | clamping normal and friction |
//! | [`bouncing_ball`] | one bouncing normal |
//! | [`ball_on_paddle`] | one normal shared by two mobile skeletons |
//! | [`two_resting_balls`] | two independent groups |
//! | [`double_pendulum`] | none, configuration-dependent mass matrix |
//! | [`pendulum_on_ground`] | clamping contact at a rotating vertex |
//! | [`arm_at_limit`] | clamping joint limit |
//! | [`box_on_ground`] | four contacts on one planar body |

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]

use nalgebra::{DMatrix, DVector, Isometry3, Vector3};
use sim_diff::DifferentiableWorld;
use sim_types::Result;
use sim_world::{ChainSkeleton, Joint, Link, Shape, World, WorldConfig, presets};

/// Gravity of [`WorldConfig::default`].
pub const GRAVITY: f64 = 9.81;

/// Largest element-wise relative error between two matrices.
///
/// Each entry is `|a - b| / max(|a|, |b|, floor)`, so entries near zero are
/// compared absolutely against `floor`.
///
/// # Panics
///
/// If the shapes differ.
#[must_use]
pub fn max_relative_error(a: &DMatrix<f64>, b: &DMatrix<f64>, floor: f64) -> f64 {
    assert_eq!(a.shape(), b.shape(), "matrices must have the same shape");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs() / x.abs().max(y.abs()).max(floor))
        .fold(0.0, f64::max)
}

fn ground_world(config: WorldConfig, friction: f64) -> Result<World> {
    World::new(config)?.with_skeleton(presets::ground("ground", 0.0).with_friction(friction))
}

/// Unit ball one meter above the ground, far from any contact.
///
/// # Errors
///
/// Never for the built-in configuration; propagated from world construction.
pub fn falling_ball() -> Result<World> {
    let mut world = ground_world(WorldConfig::default(), 0.0)?
        .with_skeleton(presets::point_mass("ball", 1.0, Vector3::new(0.0, 0.0, 1.0)))?;
    world.set_velocities(&DVector::from_vec(vec![0.3, -0.2, 0.1]));
    world.set_forces(&DVector::from_vec(vec![0.5, 0.0, -1.0]));
    Ok(world)
}

/// Frictionless ball of `mass` resting on the ground.
///
/// # Errors
///
/// Propagated from world construction.
pub fn resting_ball(mass: f64) -> Result<World> {
    ground_world(WorldConfig::default(), 0.0)?
        .with_skeleton(presets::point_mass("ball", mass, Vector3::zeros()))
}

/// Ball sliding on rough ground (`mu = 1`) along `(1, 0.5)`.
///
/// Both tangent directions saturate at the friction bound.
///
/// # Errors
///
/// Propagated from world construction.
pub fn sliding_ball() -> Result<World> {
    let mut world = ground_world(WorldConfig::default(), 1.0)?.with_skeleton(
        presets::point_mass("ball", 1.0, Vector3::zeros()).with_friction(1.0),
    )?;
    world.set_velocities(&DVector::from_vec(vec![1.0, 0.5, 0.0]));
    Ok(world)
}

/// Ball at rest on rough ground with a tangential push friction can hold.
///
/// # Errors
///
/// Propagated from world construction.
pub fn pushed_ball() -> Result<World> {
    let mut world = ground_world(WorldConfig::default(), 1.0)?.with_skeleton(
        presets::point_mass("ball", 1.0, Vector3::zeros()).with_friction(1.0),
    )?;
    world.set_forces(&DVector::from_vec(vec![2.0, 1.0, 0.0]));
    Ok(world)
}

/// Weightless ball hitting the ground at 2 m/s with combined restitution 0.5.
///
/// # Errors
///
/// Propagated from world construction.
pub fn bouncing_ball() -> Result<World> {
    let mut world = World::new(WorldConfig::zero_gravity())?
        .with_skeleton(presets::ground("ground", 0.0).with_restitution(1.0))?
        .with_skeleton(presets::point_mass("ball", 1.0, Vector3::zeros()).with_restitution(0.5))?;
    world.set_velocities(&DVector::from_vec(vec![0.0, 0.0, -2.0]));
    Ok(world)
}

/// Unit ball sitting on a plate of `paddle_mass` that is driven upward.
///
/// The plate lifts along `z` only, so the contact couples the two skeletons
/// into one group.
///
/// # Errors
///
/// Propagated from world construction.
pub fn ball_on_paddle(paddle_mass: f64) -> Result<World> {
    let paddle = ChainSkeleton::new("paddle", Isometry3::identity()).with_link(
        Link::new("lift", Joint::prismatic(Vector3::z(), Isometry3::identity()))
            .with_inertia(paddle_mass, Vector3::zeros(), Vector3::zeros())
            .with_shape(Shape::Plane {
                point: Vector3::zeros(),
                normal: Vector3::z_axis(),
            }),
    );
    let mut world = World::new(WorldConfig::default())?
        .with_skeleton(paddle)?
        .with_skeleton(presets::point_mass("ball", 1.0, Vector3::zeros()))?;
    let lift = (paddle_mass + 1.0) * GRAVITY + 5.0;
    world.set_forces(&DVector::from_vec(vec![lift, 0.0, 0.0, 0.0]));
    Ok(world)
}

/// Two frictionless balls resting on the ground, far apart.
///
/// # Errors
///
/// Propagated from world construction.
pub fn two_resting_balls() -> Result<World> {
    ground_world(WorldConfig::default(), 0.0)?
        .with_skeleton(presets::point_mass("left", 1.0, Vector3::new(-1.0, 0.0, 0.0)))?
        .with_skeleton(presets::point_mass("right", 2.0, Vector3::new(1.0, 0.0, 0.0)))
}

/// Swinging double pendulum with unequal links and masses, no contacts.
///
/// # Errors
///
/// Propagated from world construction.
pub fn double_pendulum() -> Result<World> {
    let mut world =
        World::new(WorldConfig::default())?.with_skeleton(presets::pendulum("pendulum", &[1.0, 0.7], &[1.0, 2.0]))?;
    world.set_positions(&DVector::from_vec(vec![0.4, -0.3]));
    world.set_velocities(&DVector::from_vec(vec![0.5, 1.2]));
    world.set_forces(&DVector::from_vec(vec![0.1, -0.2]));
    Ok(world)
}

/// Single pendulum at angle 0.3 whose bob touches a ground plane.
///
/// Gravity swings the bob into the ground, so the contact clamps and its
/// point moves with the joint.
///
/// # Errors
///
/// Propagated from world construction.
pub fn pendulum_on_ground() -> Result<World> {
    let angle: f64 = 0.3;
    let mut world = World::new(WorldConfig::default())?
        .with_skeleton(presets::ground("ground", -angle.cos()))?
        .with_skeleton(presets::pendulum("pendulum", &[1.0], &[1.0]))?;
    world.set_positions(&DVector::from_vec(vec![angle]));
    Ok(world)
}

/// Pendulum pushed against its lower joint limit.
///
/// # Errors
///
/// Propagated from world construction.
pub fn arm_at_limit() -> Result<World> {
    let arm = ChainSkeleton::new("arm", Isometry3::identity()).with_link(
        Link::new(
            "shoulder",
            Joint::revolute(Vector3::y(), Isometry3::identity()).with_limits(-0.5, 0.5),
        )
        .with_inertia(1.0, Vector3::new(0.0, 0.0, -1.0), Vector3::zeros()),
    );
    let mut world = World::new(WorldConfig::default())?.with_skeleton(arm)?;
    world.set_positions(&DVector::from_vec(vec![-0.5]));
    world.set_velocities(&DVector::from_vec(vec![-0.2]));
    Ok(world)
}

/// Flat planar box resting on the ground with its four bottom corners in contact.
///
/// # Errors
///
/// Propagated from world construction.
pub fn box_on_ground() -> Result<World> {
    ground_world(WorldConfig::default(), 0.0)?.with_skeleton(presets::planar_box(
        "box",
        2.0,
        Vector3::new(0.4, 0.3, 0.2),
        Vector3::new(0.0, 0.2, 0.0),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_max_relative_error_uses_floor() {
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let b = DMatrix::from_row_slice(1, 2, &[1.1, 1e-9]);
        let err = max_relative_error(&a, &b, 1e-6);
        assert!((err - 0.1 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_scene_dof_counts() {
        assert_eq!(falling_ball().unwrap().num_dofs(), 3);
        assert_eq!(ball_on_paddle(2.0).unwrap().num_dofs(), 4);
        assert_eq!(two_resting_balls().unwrap().num_dofs(), 6);
        assert_eq!(double_pendulum().unwrap().num_dofs(), 2);
        assert_eq!(box_on_ground().unwrap().num_dofs(), 3);
    }
}
