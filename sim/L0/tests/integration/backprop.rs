//! Implicit backprop against the transposed step Jacobians.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector, Vector3};
use sim_diff::{LossGradient, forward_pass};
use sim_diff_tests::{
    ball_on_paddle, bouncing_ball, double_pendulum, falling_ball, pushed_ball, resting_ball,
    sliding_ball, two_resting_balls,
};
use sim_world::{World, WorldConfig, presets};

#[allow(clippy::cast_precision_loss)]
fn sample_loss(dofs: usize, scale: f64) -> LossGradient {
    LossGradient::from_state(
        DVector::from_fn(dofs, |i, _| scale * (0.3 + i as f64)),
        DVector::from_fn(dofs, |i, _| scale * if i % 2 == 0 { 1.0 } else { -0.7 }),
    )
}

/// For point-mass scenes `dC/dq` vanishes, so backprop must reproduce the
/// transposed Jacobians exactly.
fn check_against_jacobians(mut world: World) {
    let snapshot = forward_pass(&mut world).unwrap();
    let next = sample_loss(snapshot.num_dofs(), 1.0);
    let this = snapshot.backprop(&mut world, &next);

    let lp = &next.loss_wrt_position;
    let lv = &next.loss_wrt_velocity;
    let force_vel = snapshot.force_vel_jacobian(&mut world);
    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    let pos_vel = snapshot.pos_vel_jacobian(&mut world);
    let pos_pos = snapshot.pos_pos_jacobian();
    let vel_pos = snapshot.vel_pos_jacobian();

    assert_relative_eq!(this.loss_wrt_torque, force_vel.tr_mul(lv), epsilon = 1e-10);
    assert_relative_eq!(
        this.loss_wrt_position,
        pos_pos.tr_mul(lp) + pos_vel.tr_mul(lv),
        epsilon = 1e-10
    );
    assert_relative_eq!(
        this.loss_wrt_velocity,
        vel_vel.tr_mul(lv) + vel_pos.tr_mul(lp),
        epsilon = 1e-10
    );
}

#[test]
fn free_ball_backprop() {
    check_against_jacobians(falling_ball().unwrap());
}

#[test]
fn free_ball_backprop_closed_form() {
    let mass = 2.0;
    let mut world = World::new(WorldConfig::default())
        .unwrap()
        .with_skeleton(presets::point_mass("ball", mass, Vector3::new(0.0, 0.0, 1.0)))
        .unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.num_clamping(), 0);
    let dt = snapshot.time_step();

    let lp = DVector::from_vec(vec![0.4, -1.0, 2.0]);
    let lv = DVector::from_vec(vec![1.5, 0.25, -3.0]);
    let this = snapshot.backprop(&mut world, &LossGradient::from_state(lp.clone(), lv.clone()));
    assert_relative_eq!(this.loss_wrt_torque, &lv * (dt / mass), epsilon = 1e-12);
    assert_relative_eq!(this.loss_wrt_position, lp.clone(), epsilon = 1e-12);
    assert_relative_eq!(this.loss_wrt_velocity, &lv + &lp * dt, epsilon = 1e-12);
}

#[test]
fn contact_backprop() {
    check_against_jacobians(resting_ball(2.0).unwrap());
    check_against_jacobians(two_resting_balls().unwrap());
    check_against_jacobians(ball_on_paddle(2.0).unwrap());
}

#[test]
fn friction_backprop() {
    check_against_jacobians(sliding_ball().unwrap());
    check_against_jacobians(pushed_ball().unwrap());
}

#[test]
fn bounce_backprop() {
    check_against_jacobians(bouncing_ball().unwrap());
}

#[test]
fn resting_ball_blocks_normal_torque_gradient() {
    let mut world = resting_ball(1.0).unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let next = LossGradient::from_state(DVector::zeros(3), DVector::from_vec(vec![1.0, 1.0, 1.0]));
    let this = snapshot.backprop(&mut world, &next);
    let dt = snapshot.time_step();
    // Pushing into the ground changes nothing; pushing sideways moves the ball.
    assert_relative_eq!(this.loss_wrt_torque, DVector::from_vec(vec![dt, dt, 0.0]), epsilon = 1e-12);
}

#[test]
fn pendulum_backprop_is_linear() {
    let mut world = double_pendulum().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let a = sample_loss(2, 1.0);
    let b = LossGradient::from_state(DVector::from_vec(vec![-0.2, 0.9]), DVector::from_vec(vec![0.4, 0.1]));
    let sum = LossGradient::from_state(
        &a.loss_wrt_position + &b.loss_wrt_position,
        &a.loss_wrt_velocity + &b.loss_wrt_velocity,
    );

    let ga = snapshot.backprop(&mut world, &a);
    let gb = snapshot.backprop(&mut world, &b);
    let gsum = snapshot.backprop(&mut world, &sum);
    assert_relative_eq!(gsum.loss_wrt_torque, &ga.loss_wrt_torque + &gb.loss_wrt_torque, epsilon = 1e-10);
    assert_relative_eq!(gsum.loss_wrt_position, &ga.loss_wrt_position + &gb.loss_wrt_position, epsilon = 1e-10);
    assert_relative_eq!(gsum.loss_wrt_velocity, &ga.loss_wrt_velocity + &gb.loss_wrt_velocity, epsilon = 1e-10);

    let force_vel = snapshot.force_vel_jacobian(&mut world);
    assert_relative_eq!(ga.loss_wrt_torque, force_vel.tr_mul(&a.loss_wrt_velocity), epsilon = 1e-12);
}

#[test]
fn zero_loss_pulls_back_to_zero() {
    let mut world = sliding_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let this = snapshot.backprop(&mut world, &LossGradient::zeros(3));
    assert_eq!(this, LossGradient::zeros(3));
}

#[test]
fn basis_losses_rebuild_the_jacobians() {
    let mut world = sliding_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let n = snapshot.num_dofs();
    let mut velocity_rows = DMatrix::zeros(n, n);
    let mut torque_rows = DMatrix::zeros(n, n);
    for i in 0..n {
        let mut lv = DVector::zeros(n);
        lv[i] = 1.0;
        let this = snapshot.backprop(&mut world, &LossGradient::from_state(DVector::zeros(n), lv));
        velocity_rows.set_column(i, &this.loss_wrt_velocity);
        torque_rows.set_column(i, &this.loss_wrt_torque);
    }
    let vel_vel = snapshot.vel_vel_jacobian(&mut world);
    let force_vel = snapshot.force_vel_jacobian(&mut world);
    assert_relative_eq!(velocity_rows, vel_vel.transpose(), epsilon = 1e-10);
    assert_relative_eq!(torque_rows, force_vel.transpose(), epsilon = 1e-10);
}
