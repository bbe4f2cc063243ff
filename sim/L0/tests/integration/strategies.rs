//! LCP projection versus mass-weighted projection.

use approx::assert_relative_eq;
use sim_diff::{
    DifferentiableWorld, GradientConfig, GradientStrategy, forward_pass, forward_pass_with_config,
};
use sim_diff_tests::{ball_on_paddle, resting_ball};
use sim_world::World;

fn strategy_gap(mut world: World) -> (f64, f64) {
    let snapshot = forward_pass(&mut world).unwrap();
    let force_vel = snapshot.force_vel_jacobian(&mut world) - snapshot.massed_force_vel_jacobian(&mut world);
    let vel_vel = snapshot.vel_vel_jacobian(&mut world) - snapshot.massed_vel_vel_jacobian(&mut world);
    (force_vel.amax(), vel_vel.amax())
}

#[test]
fn strategies_agree_for_isotropic_mass() {
    for world in [resting_ball(2.0).unwrap(), ball_on_paddle(1.0).unwrap()] {
        let (force_vel, vel_vel) = strategy_gap(world);
        assert!(force_vel < 1e-12, "forceVel gap {force_vel:e}");
        assert!(vel_vel < 1e-12, "velVel gap {vel_vel:e}");
    }
}

#[test]
fn strategies_diverge_for_unequal_masses() {
    let (force_vel, _) = strategy_gap(ball_on_paddle(3.0).unwrap());
    assert!(force_vel > 1e-6, "forceVel gap {force_vel:e}");
}

#[test]
fn configured_strategy_drives_the_default_jacobians() {
    let mut world = ball_on_paddle(3.0).unwrap();
    let config = GradientConfig::default().with_strategy(GradientStrategy::Massed);
    let snapshot = forward_pass_with_config(&mut world, config).unwrap();
    assert_eq!(snapshot.config().strategy, GradientStrategy::Massed);
    assert_relative_eq!(
        snapshot.force_vel_jacobian(&mut world),
        snapshot.massed_force_vel_jacobian(&mut world),
        epsilon = 1e-15
    );
    assert_eq!(world.num_dofs(), 4);
}
