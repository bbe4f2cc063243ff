//! Spatial algebra for screw axes, contact wrenches and their derivatives.
//!
//! All 6-vectors follow Featherstone's ordering `[angular; linear]`:
//! - Motion vectors (twists, screw axes): `[ω; v]` where `v` is the velocity
//!   of the point currently at the world origin.
//! - Force vectors (wrenches): `[τ; f]` with the torque taken about the
//!   world origin.
//!
//! With that convention a screw axis `S` and a wrench `F` pair as `S · F`,
//! which is how contact forces become generalized joint forces.

use nalgebra::{Isometry3, Matrix3, Matrix3x2, Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};

/// 6D spatial vector: [angular (3), linear (3)].
pub type SpatialVector = Vector6<f64>;

/// Below this norm a tangent candidate is considered parallel to the normal.
const TANGENT_EPSILON: f64 = 1e-6;

/// Angular half of a spatial vector.
#[inline]
#[must_use]
pub fn angular(s: &SpatialVector) -> Vector3<f64> {
    Vector3::new(s[0], s[1], s[2])
}

/// Linear half of a spatial vector.
#[inline]
#[must_use]
pub fn linear(s: &SpatialVector) -> Vector3<f64> {
    Vector3::new(s[3], s[4], s[5])
}

/// Stack angular and linear parts.
#[inline]
#[must_use]
pub fn spatial(ang: &Vector3<f64>, lin: &Vector3<f64>) -> SpatialVector {
    SpatialVector::new(ang.x, ang.y, ang.z, lin.x, lin.y, lin.z)
}

/// Spatial cross product for motion vectors: v × s.
#[inline]
#[must_use]
pub fn spatial_cross_motion(v: &SpatialVector, s: &SpatialVector) -> SpatialVector {
    let w = angular(v);
    spatial(
        &w.cross(&angular(s)),
        &(w.cross(&linear(s)) + linear(v).cross(&angular(s))),
    )
}

/// Spatial cross product for force vectors: v ×* f.
#[inline]
#[must_use]
pub fn spatial_cross_force(v: &SpatialVector, f: &SpatialVector) -> SpatialVector {
    let w = angular(v);
    spatial(
        &(w.cross(&angular(f)) + linear(v).cross(&linear(f))),
        &w.cross(&linear(f)),
    )
}

/// Lie bracket `ad_V(S)`: rate of change of screw axis `S` while the world
/// moves along twist `V`.
#[inline]
#[must_use]
pub fn ad(v: &SpatialVector, s: &SpatialVector) -> SpatialVector {
    spatial_cross_motion(v, s)
}

/// Adjoint transform of a twist: express `s`, attached to a frame, after that
/// frame has been moved by `transform`.
#[must_use]
pub fn ad_t(transform: &Isometry3<f64>, s: &SpatialVector) -> SpatialVector {
    let w = transform.rotation * angular(s);
    let v = transform.rotation * linear(s);
    let p = transform.translation.vector;
    spatial(&w, &(p.cross(&w) + v))
}

/// Rigid transform produced by following twist `twist` for unit time.
#[must_use]
pub fn exp_map(twist: &SpatialVector) -> Isometry3<f64> {
    let w = angular(twist);
    let v = linear(twist);
    let theta = w.norm();
    if theta < 1e-12 {
        return Isometry3::from_parts(Translation3::from(v), UnitQuaternion::identity());
    }
    let rotation = UnitQuaternion::from_scaled_axis(w);
    let k = skew(&w);
    let k2 = k * k;
    let jac = Matrix3::identity()
        + k * ((1.0 - theta.cos()) / (theta * theta))
        + k2 * ((theta - theta.sin()) / (theta * theta * theta));
    Isometry3::from_parts(Translation3::from(jac * v), rotation)
}

/// Derivative of a world point carried by `exp(theta * twist)` with respect to `theta`.
#[must_use]
pub fn gradient_wrt_theta(twist: &SpatialVector, point: &Vector3<f64>, theta: f64) -> Vector3<f64> {
    let moved = if theta == 0.0 {
        *point
    } else {
        exp_map(&(twist * theta)).transform_point(&(*point).into()).coords
    };
    angular(twist).cross(&moved) + linear(twist)
}

/// Derivative of a direction rotated by `exp(theta * axis)` with respect to `theta`.
#[must_use]
pub fn gradient_wrt_theta_pure_rotation(
    axis: &Vector3<f64>,
    direction: &Vector3<f64>,
    theta: f64,
) -> Vector3<f64> {
    let rotated = if theta == 0.0 {
        *direction
    } else {
        UnitQuaternion::from_scaled_axis(axis * theta) * direction
    };
    axis.cross(&rotated)
}

/// Skew-symmetric cross-product matrix.
#[must_use]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

// ============================================================================
// Friction basis
// ============================================================================

fn tangent_seed(normal: &Vector3<f64>, first_direction: &Vector3<f64>) -> Vector3<f64> {
    if first_direction.cross(normal).norm() < TANGENT_EPSILON {
        Vector3::x()
    } else {
        *first_direction
    }
}

/// Two friction directions orthogonal to `normal`.
///
/// The first is `first_direction × n` normalized (falling back to the x axis
/// when that is degenerate), the second is `n` crossed with the first.
#[must_use]
pub fn tangent_basis(normal: &Vector3<f64>, first_direction: &Vector3<f64>) -> Matrix3x2<f64> {
    let seed = tangent_seed(normal, first_direction);
    let t0 = seed.cross(normal).normalize();
    let t1 = normal.cross(&t0);
    Matrix3x2::from_columns(&[t0, t1])
}

/// Derivative of [`tangent_basis`] when the normal changes at rate `normal_gradient`.
///
/// The seed direction is chosen at the unperturbed normal and held fixed.
#[must_use]
pub fn tangent_basis_gradient(
    normal: &Vector3<f64>,
    normal_gradient: &Vector3<f64>,
    first_direction: &Vector3<f64>,
) -> Matrix3x2<f64> {
    let seed = tangent_seed(normal, first_direction);
    let raw = seed.cross(normal);
    let raw_gradient = seed.cross(normal_gradient);
    let len = raw.norm();
    let t0 = raw / len;
    let t0_gradient = (raw_gradient - t0 * t0.dot(&raw_gradient)) / len;
    let t1_gradient = normal_gradient.cross(&t0) + normal.cross(&t0_gradient);
    Matrix3x2::from_columns(&[t0_gradient, t1_gradient])
}

// ============================================================================
// Inertia
// ============================================================================

/// Spatial inertia of a body about the world origin, in world frame.
///
/// - `mass`: body mass
/// - `inertia_diag`: principal moments in the body frame
/// - `rotation`: body-to-world rotation
/// - `h`: world position of the center of mass
///
/// ```text
/// I = [R·I_c·Rᵀ + m·[h]×ᵀ[h]×,  m·[h]× ]
///     [m·[h]×ᵀ,                 m·I_3  ]
/// ```
#[must_use]
pub fn compute_body_spatial_inertia(
    mass: f64,
    inertia_diag: &Vector3<f64>,
    rotation: &Matrix3<f64>,
    h: &Vector3<f64>,
) -> Matrix6<f64> {
    let i_rot = rotation * Matrix3::from_diagonal(inertia_diag) * rotation.transpose();
    let hx = skew(h);
    let mut out = Matrix6::zeros();
    out.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(i_rot + hx.transpose() * hx * mass));
    out.fixed_view_mut::<3, 3>(0, 3).copy_from(&(hx * mass));
    out.fixed_view_mut::<3, 3>(3, 0)
        .copy_from(&(hx.transpose() * mass));
    out.fixed_view_mut::<3, 3>(3, 3)
        .copy_from(&(Matrix3::identity() * mass));
    out
}
