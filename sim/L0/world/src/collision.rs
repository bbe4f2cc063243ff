//! Contact and joint-limit detection.
//!
//! Contacts come from link vertices approaching planes owned by a different
//! skeleton. The vertex's link is body A (the normal points toward it), the
//! plane's link is body B, so every contact is [`ContactType::VertexFace`].

use nalgebra::Vector3;
use sim_diff::{BodyIndex, BodyRef, ContactGeometry, ContactGradient, ContactType, Skeleton};

use crate::skeleton::{ChainSkeleton, Shape};

/// A vertex-plane contact found at the start of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// Frozen geometry.
    pub geometry: ContactGeometry,
    /// World index of the vertex skeleton (body A).
    pub skeleton_a: usize,
    /// World index of the plane skeleton (body B).
    pub skeleton_b: usize,
    /// Penetration depth (negative while still separated).
    pub depth: f64,
    /// Combined friction coefficient.
    pub friction: f64,
    /// Combined restitution coefficient.
    pub restitution: f64,
}

/// A joint sitting at or past one of its limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    /// World index of the skeleton.
    pub skeleton: usize,
    /// Local DOF.
    pub dof: usize,
    /// `+1` at the lower limit, `-1` at the upper.
    pub sign: i8,
    /// How far past the limit the DOF is.
    pub depth: f64,
}

/// Anything the LCP has to resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Body contact.
    Contact(Contact),
    /// Joint limit.
    Limit(Limit),
}

impl Constraint {
    /// World indices of the skeletons involved.
    #[must_use]
    pub fn skeletons(&self) -> Vec<usize> {
        match self {
            Self::Contact(c) => vec![c.skeleton_a, c.skeleton_b],
            Self::Limit(l) => vec![l.skeleton],
        }
    }

    /// Gradient descriptor of every LCP dimension: normal first, then friction.
    #[must_use]
    pub fn dimensions(&self, skeletons: &[ChainSkeleton]) -> Vec<ContactGradient> {
        match self {
            Self::Contact(c) => {
                let dims = if c.friction > 0.0 { 3 } else { 1 };
                (0..dims)
                    .map(|k| ContactGradient::contact(c.geometry.clone(), k))
                    .collect()
            }
            Self::Limit(l) => vec![ContactGradient::joint_limit(
                skeletons[l.skeleton].name(),
                l.dof,
                l.sign,
            )],
        }
    }
}

/// Find every vertex within `margin` of a plane on another skeleton.
#[must_use]
pub fn detect_contacts(skeletons: &[ChainSkeleton], margin: f64) -> Vec<Contact> {
    let transforms: Vec<_> = skeletons.iter().map(ChainSkeleton::link_transforms).collect();
    let mut contacts = Vec::new();

    for (b, plane_skel) in skeletons.iter().enumerate() {
        for (plane_link, link) in plane_skel.links().iter().enumerate() {
            for shape in &link.shapes {
                let Shape::Plane { point, normal } = shape else {
                    continue;
                };
                let plane_tf = &transforms[b][plane_link];
                let origin = plane_tf.transform_point(&(*point).into()).coords;
                let n: Vector3<f64> = plane_tf.rotation * normal.into_inner();

                for (a, vertex_skel) in skeletons.iter().enumerate() {
                    if a == b || (!vertex_skel.is_mobile() && !plane_skel.is_mobile()) {
                        continue;
                    }
                    for (vertex_link, vlink) in vertex_skel.links().iter().enumerate() {
                        for vshape in &vlink.shapes {
                            let Shape::Vertices(vertices) = vshape else {
                                continue;
                            };
                            let vertex_tf = &transforms[a][vertex_link];
                            for v in vertices {
                                let p = vertex_tf.transform_point(&(*v).into()).coords;
                                let distance = n.dot(&(p - origin));
                                if distance >= margin {
                                    continue;
                                }
                                let geometry = ContactGeometry::new(
                                    p,
                                    n,
                                    ContactType::VertexFace,
                                    BodyRef::new(vertex_skel.name(), BodyIndex::new(0, vertex_link)),
                                    BodyRef::new(plane_skel.name(), BodyIndex::new(0, plane_link)),
                                );
                                contacts.push(Contact {
                                    geometry,
                                    skeleton_a: a,
                                    skeleton_b: b,
                                    depth: -distance,
                                    friction: vertex_skel.friction().min(plane_skel.friction()),
                                    restitution: vertex_skel.restitution() * plane_skel.restitution(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    contacts
}

/// Find every mobile DOF within `margin` of a position limit.
#[must_use]
pub fn detect_limits(skeletons: &[ChainSkeleton], margin: f64) -> Vec<Limit> {
    let mut limits = Vec::new();
    for (s, skel) in skeletons.iter().enumerate() {
        if !skel.is_mobile() {
            continue;
        }
        let q = skel.positions();
        for dof in 0..skel.num_dofs() {
            let Some(range) = skel.dof_limits(dof) else {
                continue;
            };
            if q[dof] - range.lower < margin {
                limits.push(Limit {
                    skeleton: s,
                    dof,
                    sign: 1,
                    depth: range.lower - q[dof],
                });
            } else if range.upper - q[dof] < margin {
                limits.push(Limit {
                    skeleton: s,
                    dof,
                    sign: -1,
                    depth: q[dof] - range.upper,
                });
            }
        }
    }
    limits
}
