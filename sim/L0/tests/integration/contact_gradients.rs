//! Contact gradients against brute-force re-detection after moving a DOF.

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use sim_diff::{
    ContactGradient, SkeletonContactType, SpatialVector, StepGradientSnapshot,
    forward_pass_idempotent,
};
use sim_diff_tests::{ball_on_paddle, double_pendulum, pendulum_on_ground};
use sim_world::World;

const EPS: f64 = 1e-6;

/// Snapshot the next step without advancing, and pick its first clamping contact.
fn first_clamping_contact(world: &mut World) -> (StepGradientSnapshot, ContactGradient) {
    let snapshot = forward_pass_idempotent(world).unwrap();
    let contact = snapshot.clamping_constraints()[0].clone();
    (snapshot, contact)
}

// ============================================================================
// Rotating vertex on a fixed face
// ============================================================================

#[test]
fn pendulum_contact_point_follows_the_joint() {
    let mut world = pendulum_on_ground().unwrap();
    let (_, contact) = first_clamping_contact(&mut world);
    assert_eq!(contact.contact_type_for("pendulum"), SkeletonContactType::Vertex);
    assert_eq!(contact.contact_type_for("ground"), SkeletonContactType::Face);

    let analytic = contact.contact_position_jacobian(&world);
    let angle: f64 = 0.3;
    assert_relative_eq!(analytic[(0, 0)], -angle.cos(), epsilon = 1e-9);
    assert_relative_eq!(analytic[(1, 0)], 0.0, epsilon = 1e-12);
    assert_relative_eq!(analytic[(2, 0)], angle.sin(), epsilon = 1e-9);

    let brute = contact
        .brute_force_contact_position_jacobian(&mut world, EPS)
        .unwrap();
    assert_relative_eq!(analytic, brute, epsilon = 1e-6);
}

#[test]
fn fixed_face_keeps_its_normal() {
    let mut world = pendulum_on_ground().unwrap();
    let (_, contact) = first_clamping_contact(&mut world);

    let analytic = contact.contact_normal_jacobian(&world);
    assert_relative_eq!(analytic, DMatrix::zeros(3, 1), epsilon = 1e-12);
    let brute = contact
        .brute_force_contact_normal_jacobian(&mut world, EPS)
        .unwrap();
    assert_relative_eq!(brute, analytic, epsilon = 1e-9);

    let analytic = contact.contact_force_direction_jacobian(&world);
    let brute = contact
        .brute_force_contact_force_direction_jacobian(&mut world, EPS)
        .unwrap();
    assert_relative_eq!(brute, analytic, epsilon = 1e-9);
}

#[test]
fn pendulum_contact_forces_match_brute_force() {
    let mut world = pendulum_on_ground().unwrap();
    let (_, contact) = first_clamping_contact(&mut world);

    let analytic = contact.contact_force_jacobian(&world);
    let brute = contact
        .brute_force_contact_force_jacobian(&mut world, EPS)
        .unwrap();
    assert_eq!(analytic.shape(), (6, 1));
    assert_relative_eq!(analytic, brute, epsilon = 1e-6);

    let analytic = contact.constraint_forces_jacobian(&world);
    let brute = contact
        .brute_force_constraint_forces_jacobian(&mut world, EPS)
        .unwrap();
    assert!(analytic[(0, 0)].abs() > 0.1, "the lever arm changes with the angle");
    assert_relative_eq!(analytic, brute, epsilon = 1e-6);
}

#[test]
fn exponential_map_predicts_contact_motion() {
    let mut world = pendulum_on_ground().unwrap();
    let (_, contact) = first_clamping_contact(&mut world);

    // Swing into the ground so the contact survives the move.
    let step = -1e-3;
    let estimate = contact.estimate_perturbed_contact_position(&world, 0, step);
    let brute = contact
        .brute_force_perturbed_contact_position(&mut world, 0, step)
        .unwrap();
    assert_relative_eq!(estimate, brute, epsilon = 1e-10);

    let estimate = contact.estimate_perturbed_contact_normal(&world, 0, step);
    let brute = contact
        .brute_force_perturbed_contact_normal(&mut world, 0, step)
        .unwrap();
    assert_relative_eq!(estimate, brute, epsilon = 1e-12);
}

#[test]
fn peer_survives_a_small_perturbation() {
    let mut world = pendulum_on_ground().unwrap();
    let (snapshot, contact) = first_clamping_contact(&mut world);
    let again = forward_pass_idempotent(&mut world).unwrap();
    let peer = contact.peer_constraint(&again).unwrap();
    assert_eq!(peer.key(), contact.key());
    assert_relative_eq!(peer.world_position(), contact.world_position());
    assert!(contact.peer_constraint(&snapshot).is_some());
}

// ============================================================================
// Two mobile skeletons
// ============================================================================

#[test]
fn paddle_contact_gradients() {
    let mut world = ball_on_paddle(2.0).unwrap();
    let (_, contact) = first_clamping_contact(&mut world);
    assert_eq!(contact.contact_type_for("ball"), SkeletonContactType::Vertex);
    assert_eq!(contact.contact_type_for("paddle"), SkeletonContactType::Face);

    // The vertex rides on the ball's prismatic joints; the paddle only lifts its face.
    let analytic = contact.contact_position_jacobian(&world);
    let mut expected = DMatrix::zeros(3, 4);
    expected.view_mut((0, 1), (3, 3)).fill_with_identity();
    assert_relative_eq!(analytic, expected, epsilon = 1e-12);

    let brute = contact
        .brute_force_contact_position_jacobian(&mut world, EPS)
        .unwrap();
    assert_relative_eq!(brute, analytic, epsilon = 1e-6);

    let forces = contact.world_constraint_forces(&world);
    assert_relative_eq!(forces[0], -1.0, epsilon = 1e-12);
    assert_relative_eq!(forces[3], 1.0, epsilon = 1e-12);

    let brute = contact
        .brute_force_constraint_forces_jacobian(&mut world, EPS)
        .unwrap();
    assert_relative_eq!(brute, contact.constraint_forces_jacobian(&world), epsilon = 1e-6);
}

// ============================================================================
// Screw axes
// ============================================================================

#[test]
fn upstream_joint_rotates_downstream_axis() {
    let mut world = double_pendulum().unwrap();

    let analytic = ContactGradient::screw_axis_gradient(&world, 1, 0);
    let plus = ContactGradient::brute_force_perturbed_screw_axis(&mut world, 1, 0, EPS);
    let minus = ContactGradient::brute_force_perturbed_screw_axis(&mut world, 1, 0, -EPS);
    assert!(analytic.norm() > 0.1);
    assert_relative_eq!(analytic, (plus - minus) / (2.0 * EPS), epsilon = 1e-6);

    assert_relative_eq!(
        ContactGradient::screw_axis_gradient(&world, 0, 1),
        SpatialVector::zeros()
    );

    let estimate = ContactGradient::estimate_perturbed_screw_axis(&world, 1, 0, 0.1);
    let brute = ContactGradient::brute_force_perturbed_screw_axis(&mut world, 1, 0, 0.1);
    assert_relative_eq!(estimate, brute, epsilon = 1e-10);
}

#[test]
fn constraint_force_derivative_is_a_jacobian_entry() {
    let mut world = pendulum_on_ground().unwrap();
    let (_, contact) = first_clamping_contact(&mut world);
    let jacobian = contact.constraint_forces_jacobian(&world);
    for i in 0..jacobian.nrows() {
        for j in 0..jacobian.ncols() {
            assert_relative_eq!(
                contact.constraint_force_derivative(&world, i, j),
                jacobian[(i, j)],
                epsilon = 1e-12
            );
        }
    }
}

#[test]
fn normal_force_direction_estimate_tracks_the_normal() {
    let mut world = pendulum_on_ground().unwrap();
    let (_, contact) = first_clamping_contact(&mut world);
    let estimate = contact.estimate_perturbed_contact_force_direction(&world, 0, 1e-3);
    assert_relative_eq!(
        estimate,
        contact.estimate_perturbed_contact_normal(&world, 0, 1e-3),
        epsilon = 1e-12
    );
    // The ground owns the face, so turning the pendulum leaves the normal alone.
    assert_relative_eq!(estimate, contact.world_normal(), epsilon = 1e-12);
}
