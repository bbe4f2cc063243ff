//! Ready-made skeletons.

use nalgebra::{DVector, Isometry3, Vector3};

use crate::skeleton::{ChainSkeleton, Joint, Link, Shape};

/// Immobile ground plane `z = height` with its normal along `+z`.
#[must_use]
pub fn ground(name: &str, height: f64) -> ChainSkeleton {
    ChainSkeleton::new(name, Isometry3::translation(0.0, 0.0, height))
        .with_link(
            Link::new("floor", Joint::weld(Isometry3::identity())).with_shape(Shape::Plane {
                point: Vector3::zeros(),
                normal: Vector3::z_axis(),
            }),
        )
        .immobile()
}

/// Translating point mass (x, y, z prismatic joints) with one contact vertex
/// at its center.
#[must_use]
pub fn point_mass(name: &str, mass: f64, position: Vector3<f64>) -> ChainSkeleton {
    let mut skel = ChainSkeleton::new(name, Isometry3::identity())
        .with_link(Link::new("x", Joint::prismatic(Vector3::x(), Isometry3::identity())))
        .with_link(Link::new("y", Joint::prismatic(Vector3::y(), Isometry3::identity())))
        .with_link(
            Link::new("z", Joint::prismatic(Vector3::z(), Isometry3::identity()))
                .with_inertia(mass, Vector3::zeros(), Vector3::zeros())
                .with_shape(Shape::Vertices(vec![Vector3::zeros()])),
        );
    skel.set_positions(&DVector::from_column_slice(position.as_slice()));
    skel
}

/// Chain of point-mass bobs swinging about `y`, hung from the origin.
///
/// Link `i` has length `lengths[i]` with its bob (and a contact vertex) at
/// the far end.
///
/// # Panics
///
/// If `lengths` and `masses` differ in length.
#[must_use]
pub fn pendulum(name: &str, lengths: &[f64], masses: &[f64]) -> ChainSkeleton {
    assert_eq!(lengths.len(), masses.len(), "one mass per pendulum link");
    let mut skel = ChainSkeleton::new(name, Isometry3::identity());
    let mut offset = Isometry3::identity();
    for (i, (&length, &mass)) in lengths.iter().zip(masses).enumerate() {
        let tip = Vector3::new(0.0, 0.0, -length);
        skel = skel.with_link(
            Link::new(format!("link{i}"), Joint::revolute(Vector3::y(), offset))
                .with_inertia(mass, tip, Vector3::zeros())
                .with_shape(Shape::Vertices(vec![tip])),
        );
        offset = Isometry3::translation(0.0, 0.0, -length);
    }
    skel
}

/// Box moving in the `xz` plane (x, z prismatic, rotation about `y`) with a
/// contact vertex at each corner.
///
/// `pose` is `(x, z, angle)`.
#[must_use]
pub fn planar_box(name: &str, mass: f64, half_extents: Vector3<f64>, pose: Vector3<f64>) -> ChainSkeleton {
    let (hx, hy, hz) = (half_extents.x, half_extents.y, half_extents.z);
    let moi = Vector3::new(
        mass * (hy * hy + hz * hz) / 3.0,
        mass * (hx * hx + hz * hz) / 3.0,
        mass * (hx * hx + hy * hy) / 3.0,
    );
    let mut corners = Vec::with_capacity(8);
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                corners.push(Vector3::new(sx * hx, sy * hy, sz * hz));
            }
        }
    }
    let mut skel = ChainSkeleton::new(name, Isometry3::identity())
        .with_link(Link::new("x", Joint::prismatic(Vector3::x(), Isometry3::identity())))
        .with_link(Link::new("z", Joint::prismatic(Vector3::z(), Isometry3::identity())))
        .with_link(
            Link::new("body", Joint::revolute(Vector3::y(), Isometry3::identity()))
                .with_inertia(mass, Vector3::zeros(), moi)
                .with_shape(Shape::Vertices(corners)),
        );
    skel.set_positions(&DVector::from_column_slice(pose.as_slice()));
    skel
}
