//! Every probe must leave the world bit-for-bit as it found it.

use nalgebra::DVector;
use sim_diff::{
    DifferentiableWorld, GradientConfig, LossGradient, RestorableSnapshot, SolverFlags,
    WithRespectTo, forward_pass, forward_pass_idempotent, forward_pass_with_config,
};
use sim_diff_tests::{double_pendulum, pendulum_on_ground, sliding_ball};

#[test]
fn analytic_queries_restore_the_world() {
    let mut world = sliding_ball().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let saved = RestorableSnapshot::capture(&world);

    let _ = snapshot.vel_vel_jacobian(&mut world);
    let _ = snapshot.force_vel_jacobian(&mut world);
    let _ = snapshot.pos_vel_jacobian(&mut world);
    let _ = snapshot.massed_vel_vel_jacobian(&mut world);
    for wrt in WithRespectTo::ALL {
        let _ = snapshot.vel_jacobian_wrt(&mut world, wrt);
    }
    let _ = snapshot.backprop(&mut world, &LossGradient::zeros(3));
    assert!(saved.matches(&world));
}

#[test]
fn finite_differences_restore_the_world() {
    let mut world = double_pendulum().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    let saved = RestorableSnapshot::capture(&world);

    snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap();
    snapshot.finite_difference_force_vel_jacobian(&mut world).unwrap();
    snapshot.finite_difference_pos_vel_jacobian(&mut world).unwrap();
    snapshot.finite_difference_pos_pos_jacobian(&mut world).unwrap();
    snapshot.finite_difference_vel_pos_jacobian(&mut world).unwrap();
    snapshot
        .finite_difference_vel_jacobian_wrt(&mut world, WithRespectTo::LinkMasses)
        .unwrap();
    assert!(saved.matches(&world));
    assert_eq!(world.solver_flags(), SolverFlags::default());
}

#[test]
fn brute_force_contact_probes_restore_the_world() {
    let mut world = pendulum_on_ground().unwrap();
    let snapshot = forward_pass_idempotent(&mut world).unwrap();
    let saved = RestorableSnapshot::capture(&world);

    let contact = snapshot.clamping_constraints()[0].clone();
    contact
        .brute_force_constraint_forces_jacobian(&mut world, 1e-6)
        .unwrap();
    assert!(saved.matches(&world));
}

#[test]
fn idempotent_forward_pass_does_not_advance() {
    let mut world = double_pendulum().unwrap();
    let saved = RestorableSnapshot::capture(&world);
    let snapshot = forward_pass_idempotent(&mut world).unwrap();
    assert!(saved.matches(&world));
    assert_eq!(snapshot.pre_step_position(), saved.positions());
    assert_eq!(snapshot.pre_step_velocity(), saved.velocities());
    assert_eq!(snapshot.pre_step_torque(), saved.forces());
    assert_eq!(snapshot.post_step_torque(), saved.forces());
    assert_ne!(snapshot.post_step_position(), saved.positions());

    let advanced = forward_pass(&mut world).unwrap();
    assert_eq!(advanced.post_step_position(), &world.positions());
    assert_eq!(advanced.post_step_velocity(), snapshot.post_step_velocity());
}

#[test]
fn invalid_config_is_rejected_before_stepping() {
    let mut world = double_pendulum().unwrap();
    let saved = RestorableSnapshot::capture(&world);
    let mut config = GradientConfig::default();
    config.finite_difference.velocity_eps = -1.0;

    let err = forward_pass_with_config(&mut world, config).unwrap_err();
    assert!(err.is_config_error());
    assert!(saved.matches(&world));
}

#[test]
fn failed_step_keeps_solver_flags() {
    let mut world = double_pendulum().unwrap();
    world.set_time_step(0.0);
    assert!(forward_pass(&mut world).is_err());
    assert_eq!(world.solver_flags(), SolverFlags::default());
    assert_eq!(world.velocities(), DVector::from_vec(vec![0.5, 1.2]));
}

#[test]
fn repeated_queries_are_identical() {
    let mut world = pendulum_on_ground().unwrap();
    let snapshot = forward_pass(&mut world).unwrap();
    assert_eq!(snapshot.vel_vel_jacobian(&mut world), snapshot.vel_vel_jacobian(&mut world));
    assert_eq!(snapshot.pos_vel_jacobian(&mut world), snapshot.pos_vel_jacobian(&mut world));
    assert_eq!(snapshot.clamping_matrix(), snapshot.clamping_matrix());
}
