//! Velocity Jacobians with respect to positions and link inertial parameters.

use nalgebra::DVector;
use sim_diff::{DifferentiableWorld, WithRespectTo, forward_pass, world::wrt_dim};
use sim_diff_tests::{ball_on_paddle, double_pendulum, max_relative_error};
use sim_world::World;

fn check_wrt(mut world: World, wrt: WithRespectTo, tolerance: f64) {
    let snapshot = forward_pass(&mut world).unwrap();
    let analytic = snapshot.vel_jacobian_wrt(&mut world, wrt);
    let fd = snapshot
        .finite_difference_vel_jacobian_wrt(&mut world, wrt)
        .unwrap();
    assert_eq!(analytic.shape(), (world.num_dofs(), wrt_dim(&world, wrt)));
    assert!(analytic.norm() > 1e-6, "{wrt:?} should move the next velocity");
    let err = max_relative_error(&analytic, &fd, 1e-6);
    assert!(
        err < tolerance,
        "{wrt:?} error {err:.3e}\nanalytic: {analytic}fd: {fd}"
    );
}

#[test]
fn pendulum_velocity_wrt_link_masses() {
    check_wrt(double_pendulum().unwrap(), WithRespectTo::LinkMasses, 1e-4);
}

#[test]
fn pendulum_velocity_wrt_link_coms() {
    check_wrt(double_pendulum().unwrap(), WithRespectTo::LinkComs, 1e-3);
}

#[test]
fn pendulum_velocity_wrt_position() {
    let mut world = double_pendulum().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let wrt = snapshot.vel_jacobian_wrt(&mut world, WithRespectTo::Position);
    let pos_vel = snapshot.pos_vel_jacobian(&mut world);
    assert_eq!(wrt, pos_vel);

    check_wrt(double_pendulum().unwrap(), WithRespectTo::Position, 1e-4);
}

#[test]
fn paddle_velocity_wrt_link_masses() {
    // The shared post-step velocity is the momentum over the total mass, so
    // both the paddle and the ball mass matter through the contact.
    check_wrt(ball_on_paddle(2.0).unwrap(), WithRespectTo::LinkMasses, 1e-3);
}

#[test]
#[allow(clippy::cast_precision_loss)]
fn projection_jacobian_matches_finite_differences() {
    let mut world = ball_on_paddle(2.0).unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let n = snapshot.num_dofs();
    let v = DVector::from_fn(n, |i, _| 0.5 - 0.3 * i as f64);

    let analytic = snapshot.jacobian_of_projection_into_clamps(&mut world, &v, WithRespectTo::LinkMasses);
    let fd = snapshot.fd_jacobian_of_projection_into_clamps(&mut world, &v, WithRespectTo::LinkMasses);
    assert_eq!(analytic.shape(), fd.shape());
    assert!(analytic.norm() > 1e-6);
    assert!(max_relative_error(&analytic, &fd, 1e-6) < 1e-4);
}
