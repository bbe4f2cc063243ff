//! Property tests over random collections of balls, some resting and some in flight.

use approx::relative_eq;
use nalgebra::{DVector, Vector3};
use proptest::prelude::*;
use sim_diff::{DifferentiableWorld, LossGradient, SegmentOwner, forward_pass};
use sim_world::{World, WorldConfig, presets};

/// `(mass, resting, vertical speed)` per ball.
fn arb_balls() -> impl Strategy<Value = Vec<(f64, bool, f64)>> {
    prop::collection::vec((0.5f64..5.0, any::<bool>(), -1.0f64..0.0), 1..5)
}

#[allow(clippy::cast_precision_loss)]
fn scene(balls: &[(f64, bool, f64)]) -> World {
    let mut world = World::new(WorldConfig::default())
        .unwrap()
        .with_skeleton(presets::ground("ground", 0.0))
        .unwrap();
    let mut velocities = Vec::new();
    for (i, &(mass, resting, vz)) in balls.iter().enumerate() {
        let height = if resting { 0.0 } else { 1.0 };
        let position = Vector3::new(2.0 * i as f64, 0.0, height);
        world
            .add_skeleton(presets::point_mass(&format!("ball{i}"), mass, position))
            .unwrap();
        velocities.extend([0.0, 0.0, vz]);
    }
    world.set_velocities(&DVector::from_vec(velocities));
    world
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every world DOF belongs to exactly one segment of the backprop partition.
    #[test]
    fn partition_covers_every_dof_once(balls in arb_balls()) {
        let mut world = scene(&balls);
        let snapshot = forward_pass(&mut world).unwrap();
        let mut owners = vec![0usize; world.num_dofs()];
        for segment in snapshot.dof_partition() {
            for dof in segment.offset..segment.offset + segment.num_dofs {
                owners[dof] += 1;
            }
        }
        prop_assert!(owners.iter().all(|&count| count == 1));
    }

    /// Each resting ball forms its own group with one clamping normal.
    #[test]
    fn resting_balls_form_their_own_groups(balls in arb_balls()) {
        let mut world = scene(&balls);
        let snapshot = forward_pass(&mut world).unwrap();
        let resting = balls.iter().filter(|b| b.1).count();
        prop_assert_eq!(snapshot.groups().len(), resting);
        prop_assert_eq!(snapshot.num_clamping(), resting);

        let grouped = snapshot
            .dof_partition()
            .iter()
            .filter(|s| matches!(s.owner, SegmentOwner::Group(_)))
            .count();
        prop_assert_eq!(grouped, resting);
    }

    /// Torque gradients of free balls are `dt/m` times the velocity loss, and
    /// resting balls cannot feel a vertical push.
    #[test]
    fn torque_gradient_per_ball(balls in arb_balls()) {
        let mut world = scene(&balls);
        let snapshot = forward_pass(&mut world).unwrap();
        let dt = snapshot.time_step();
        let n = world.num_dofs();
        let next = LossGradient::from_state(DVector::zeros(n), DVector::from_element(n, 1.0));
        let this = snapshot.backprop(&mut world, &next);

        for (i, &(mass, resting, _)) in balls.iter().enumerate() {
            let vertical = this.loss_wrt_torque[3 * i + 2];
            let expected = if resting { 0.0 } else { dt / mass };
            prop_assert!(relative_eq!(vertical, expected, epsilon = 1e-12));
            prop_assert!(relative_eq!(this.loss_wrt_torque[3 * i], dt / mass, epsilon = 1e-12));
        }
    }
}
