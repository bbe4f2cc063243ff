//! Analytic step Jacobians against central differences of the reference world.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use sim_diff::{ConstraintMapping, forward_pass};
use sim_diff_tests::{
    arm_at_limit, ball_on_paddle, box_on_ground, double_pendulum, falling_ball,
    max_relative_error, pushed_ball, resting_ball, sliding_ball, two_resting_balls,
};
use sim_world::World;

/// Check the velocity and force Jacobians of one step of `world`.
fn check_velocity_jacobians(mut world: World, epsilon: f64) {
    let snapshot = forward_pass(&mut world).unwrap();

    let analytic = snapshot.vel_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(analytic, fd, epsilon = epsilon);

    let analytic = snapshot.force_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_force_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(analytic, fd, epsilon = epsilon);
}

// ============================================================================
// Unconstrained
// ============================================================================

#[test]
fn free_ball_jacobians() {
    let mut world = falling_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_constraint_dims(), 0);
    let dt = snapshot.time_step();

    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    assert_relative_eq!(vel_vel, DMatrix::identity(3, 3), epsilon = 1e-12);
    let fd = snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, vel_vel, epsilon = 1e-6);

    let force_vel = snapshot.force_vel_jacobian(&mut world);
    assert_relative_eq!(force_vel, DMatrix::identity(3, 3) * dt, epsilon = 1e-12);
    let fd = snapshot.finite_difference_force_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, force_vel, epsilon = 1e-7);

    let pos_pos = snapshot.pos_pos_jacobian();
    let fd = snapshot.finite_difference_pos_pos_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, pos_pos, epsilon = 1e-8);

    let vel_pos = snapshot.vel_pos_jacobian();
    assert_relative_eq!(vel_pos, DMatrix::identity(3, 3) * dt, epsilon = 1e-12);
    let fd = snapshot.finite_difference_vel_pos_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, vel_pos, epsilon = 1e-8);

    let pos_vel = snapshot.pos_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_pos_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(pos_vel, DMatrix::zeros(3, 3), epsilon = 1e-10);
    assert_relative_eq!(fd, pos_vel, epsilon = 1e-8);
}

#[test]
fn double_pendulum_jacobians() {
    let mut world = double_pendulum().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_clamping(), 0);

    let analytic = snapshot.vel_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap();
    let err = max_relative_error(&analytic, &fd, 1e-6);
    assert!(err < 1e-4, "velVel error {err:.3e}\nanalytic: {analytic}fd: {fd}");

    let analytic = snapshot.force_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_force_vel_jacobian(&mut world).unwrap();
    let err = max_relative_error(&analytic, &fd, 1e-6);
    assert!(err < 1e-4, "forceVel error {err:.3e}\nanalytic: {analytic}fd: {fd}");
}

#[test]
fn double_pendulum_pos_vel() {
    let mut world = double_pendulum().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();

    let analytic = snapshot.pos_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_pos_vel_jacobian(&mut world).unwrap();
    assert!(analytic.norm() > 1e-3, "gravity makes posVel non-trivial");
    let err = max_relative_error(&analytic, &fd, 1e-6);
    assert!(err < 1e-4, "posVel error {err:.3e}\nanalytic: {analytic}fd: {fd}");
}

// ============================================================================
// Contacts
// ============================================================================

#[test]
fn resting_ball_clamps_normal_velocity() {
    let mut world = resting_ball(2.0).unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_clamping(), 1);
    let dt = snapshot.time_step();

    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    let expected = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 0.0]));
    assert_relative_eq!(vel_vel, expected, epsilon = 1e-12);

    let force_vel = snapshot.force_vel_jacobian(&mut world);
    assert_relative_eq!(force_vel, expected * (dt / 2.0), epsilon = 1e-12);

    check_velocity_jacobians(resting_ball(2.0).unwrap(), 1e-6);
}

#[test]
fn resting_ball_position_jacobians() {
    let mut world = resting_ball(1.0).unwrap();
    let snapshot = forward_pass(&mut world).unwrap();

    let pos_vel = snapshot.pos_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_pos_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(pos_vel, DMatrix::zeros(3, 3), epsilon = 1e-8);
    assert_relative_eq!(fd, pos_vel, epsilon = 1e-6);

    // The upward probe lifts the ball off the ground, where it falls a little
    // during the sub-steps.
    let fd = snapshot.finite_difference_pos_pos_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, snapshot.pos_pos_jacobian(), epsilon = 1e-3);
}

#[test]
fn sliding_friction_follows_normal_impulse() {
    let mut world = sliding_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_clamping(), 1);
    assert_eq!(snapshot.num_upper_bound(), 2);
    assert_eq!(
        snapshot.contact_mappings(),
        vec![
            ConstraintMapping::Clamping,
            ConstraintMapping::UpperBound { friction_index: 0 },
            ConstraintMapping::UpperBound { friction_index: 0 },
        ]
    );

    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    // Slowing the approach weakens both friction impulses.
    assert!(vel_vel[(0, 2)].abs() > 0.5);
    assert!(vel_vel[(1, 2)].abs() > 0.5);
    assert_relative_eq!(vel_vel[(0, 0)], 1.0, epsilon = 1e-12);

    check_velocity_jacobians(sliding_ball().unwrap(), 1e-6);
}

#[test]
fn static_friction_clamps_every_direction() {
    let mut world = pushed_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_clamping(), 3);
    assert_eq!(snapshot.num_upper_bound(), 0);

    assert_relative_eq!(
        snapshot.vel_vel_jacobian(&mut world),
        DMatrix::zeros(3, 3),
        epsilon = 1e-12
    );
    check_velocity_jacobians(pushed_ball().unwrap(), 1e-6);
}

#[test]
fn paddle_contact_couples_two_skeletons() {
    let mut world = ball_on_paddle(2.0).unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.groups().len(), 1);
    assert_eq!(snapshot.groups()[0].skeletons().len(), 2);
    assert_eq!(snapshot.num_clamping(), 1);

    // Ball and paddle leave the step with the same vertical velocity.
    let v = snapshot.post_step_velocity();
    assert_relative_eq!(v[0], v[3], epsilon = 1e-12);

    check_velocity_jacobians(ball_on_paddle(2.0).unwrap(), 1e-6);
}

#[test]
fn independent_contacts_form_separate_groups() {
    let mut world = two_resting_balls().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.groups().len(), 2);
    assert_eq!(snapshot.num_clamping(), 2);

    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    let expected = DMatrix::from_diagonal(&DVector::from_vec(vec![
        1.0, 1.0, 0.0, 1.0, 1.0, 0.0,
    ]));
    assert_relative_eq!(vel_vel, expected, epsilon = 1e-12);

    check_velocity_jacobians(two_resting_balls().unwrap(), 1e-6);
}

#[test]
fn box_corners_clamp_height_and_tilt() {
    let mut world = box_on_ground().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert!(snapshot.num_clamping() >= 2);

    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    let expected = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.0, 0.0]));
    assert_relative_eq!(vel_vel, expected, epsilon = 1e-8);

    let fd = snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, vel_vel, epsilon = 1e-4);
}

// ============================================================================
// Joint limits
// ============================================================================

#[test]
fn joint_limit_stops_the_arm() {
    let mut world = arm_at_limit().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_clamping(), 1);
    assert_relative_eq!(snapshot.post_step_velocity()[0], 0.0, epsilon = 1e-12);
    assert_eq!(world.last_step().limits, 1);

    let pos_vel = snapshot.pos_vel_jacobian(&mut world);
    let fd = snapshot.finite_difference_pos_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, pos_vel, epsilon = 1e-6);

    check_velocity_jacobians(arm_at_limit().unwrap(), 1e-6);
}
