//! Owned descriptions of the constraints an LCP solve resolved.
//!
//! These are plain values copied out of the solver at solve time. Nothing in
//! here points back into the live world, so a gradient built from them stays
//! valid after the simulation moves on.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::world::BodyIndex;

/// Collision-feature pairing reported by contact generation.
///
/// The first feature belongs to body A, the second to body B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContactType {
    /// Face of A touching a vertex of B.
    FaceVertex,
    /// Vertex of A touching a face of B.
    VertexFace,
    /// Edge of A crossing an edge of B.
    EdgeEdge,
    /// Any pairing the analytic model does not handle (spheres, meshes, ...).
    Unsupported,
}

/// How one skeleton participates in a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SkeletonContactType {
    /// Skeleton owns the contact point; its motion carries the point.
    Vertex,
    /// Skeleton owns the contact face; its motion rotates the normal.
    Face,
    /// Skeleton owns one of two crossing edges.
    Edge,
    /// Skeleton is in the contact through an unsupported feature.
    Unsupported,
    /// Skeleton is not part of the contact.
    None,
}

/// A body named by its skeleton and position in that skeleton's forest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyRef {
    /// Owning skeleton.
    pub skeleton: String,
    /// Body within the skeleton.
    pub body: BodyIndex,
}

impl BodyRef {
    /// Create a body reference.
    #[must_use]
    pub fn new(skeleton: impl Into<String>, body: BodyIndex) -> Self {
        Self {
            skeleton: skeleton.into(),
            body,
        }
    }
}

/// Contact geometry frozen at the moment of the LCP solve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactGeometry {
    /// World contact point.
    pub point: Vector3<f64>,
    /// Unit normal, pointing toward body A.
    pub normal: Vector3<f64>,
    /// Feature pairing.
    pub contact_type: ContactType,
    /// Body pushed along `+normal`.
    pub body_a: BodyRef,
    /// Body pushed along `-normal`.
    pub body_b: BodyRef,
    /// Seed direction for the friction basis.
    pub first_friction_direction: Vector3<f64>,
}

impl ContactGeometry {
    /// Contact between `body_a` and `body_b` with the default friction seed (+z).
    #[must_use]
    pub fn new(
        point: Vector3<f64>,
        normal: Vector3<f64>,
        contact_type: ContactType,
        body_a: BodyRef,
        body_b: BodyRef,
    ) -> Self {
        Self {
            point,
            normal,
            contact_type,
            body_a,
            body_b,
            first_friction_direction: Vector3::z(),
        }
    }
}

/// A one-sided joint position limit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointLimitGeometry {
    /// Skeleton owning the limited DOF.
    pub skeleton: String,
    /// Local DOF index.
    pub dof: usize,
    /// `+1` for a lower limit (pushes the DOF up), `-1` for an upper limit.
    pub sign: i8,
}

/// What kind of constraint a gradient dimension comes from.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintKind {
    /// Contact between two bodies.
    Contact(ContactGeometry),
    /// Joint position limit.
    JointLimit(JointLimitGeometry),
}

/// Column family a constraint dimension lands in after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintRole {
    /// Column of the clamping matrix.
    Clamping,
    /// Column of the upper-bound matrix.
    UpperBound,
}

/// Identifies a constraint column across snapshots: role plus world column offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintKey {
    /// Column family.
    pub role: ConstraintRole,
    /// Column within the world-assembled matrix of that family.
    pub offset: usize,
}

impl ConstraintKey {
    /// Clamping column `offset`.
    #[must_use]
    pub const fn clamping(offset: usize) -> Self {
        Self {
            role: ConstraintRole::Clamping,
            offset,
        }
    }

    /// Upper-bound column `offset`.
    #[must_use]
    pub const fn upper_bound(offset: usize) -> Self {
        Self {
            role: ConstraintRole::UpperBound,
            offset,
        }
    }
}
