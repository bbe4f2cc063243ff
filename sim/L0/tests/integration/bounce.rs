//! Restitution: reflected velocities and the position Jacobian they imply.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector, Vector3};
use sim_diff::{DifferentiableWorld, LossGradient, forward_pass};
use sim_diff_tests::bouncing_ball;

fn reflection() -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, -0.5]))
}

#[test]
fn bounce_reflects_normal_velocity() {
    let mut world = bouncing_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_bouncing(), 1);
    assert!(snapshot.has_bounces());
    assert_relative_eq!(snapshot.post_step_velocity()[2], 1.0, epsilon = 1e-12);
    assert_relative_eq!(snapshot.bounce_diagonals()[0], 1.5, epsilon = 1e-12);
    assert_relative_eq!(snapshot.restitution_diagonals()[0], 0.5, epsilon = 1e-12);

    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    assert_relative_eq!(vel_vel, reflection(), epsilon = 1e-12);
    let fd = snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap();
    assert_relative_eq!(fd, vel_vel, epsilon = 1e-6);
}

#[test]
fn bounce_position_jacobians() {
    let mut world = bouncing_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let dt = snapshot.time_step();

    let pos_pos = snapshot.pos_pos_jacobian();
    assert_relative_eq!(pos_pos, reflection(), epsilon = 1e-10);
    let normal = Vector3::z();
    let along = normal.dot(&(pos_pos.fixed_view::<3, 3>(0, 0) * normal));
    assert_relative_eq!(along, -0.5, epsilon = 1e-10);

    assert_relative_eq!(snapshot.vel_pos_jacobian(), reflection() * dt, epsilon = 1e-12);
}

#[test]
fn bounce_backprop_reflects_position_loss() {
    let mut world = bouncing_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let next = LossGradient::from_state(
        DVector::from_vec(vec![0.0, 0.0, 1.0]),
        DVector::from_vec(vec![0.0, 0.0, 2.0]),
    );
    let this = snapshot.backprop(&mut world, &next);
    assert_relative_eq!(this.loss_wrt_position[2], -0.5, epsilon = 1e-10);
    assert_relative_eq!(
        this.loss_wrt_velocity[2],
        -1.0 - 0.5 * snapshot.time_step(),
        epsilon = 1e-10
    );
    assert_eq!(world.num_dofs(), 3);
}
