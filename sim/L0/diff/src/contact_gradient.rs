//! Analytic sensitivity of one constraint dimension to skeleton configuration.
//!
//! A [`ContactGradient`] wraps one scalar dimension of one constraint: the
//! normal or one of two friction directions of a contact, or a joint limit.
//! It owns a copy of the contact geometry taken at solve time and answers
//! three kinds of questions:
//!
//! - **Forces**: the generalized force a unit impulse along this dimension
//!   applies to each DOF (`S · F` with the sign of the side the DOF moves).
//! - **Gradients**: how the contact point, normal, force direction and
//!   generalized force change as any one DOF moves.
//! - **Brute force**: the same quantities obtained by perturbing the DOF,
//!   re-running the forward pass, and finite-differencing the matching
//!   constraint in the new snapshot.
//!
//! # Skeleton contact types
//!
//! Moving the skeleton that owns the contact *vertex* drags the contact point
//! along the DOF's screw axis, leaving the normal fixed. Moving the skeleton
//! that owns the contact *face* rotates the normal, leaving the point fixed.
//! Edge-edge contacts would need both and are not modeled: they report zero
//! gradients, as do unsupported feature pairs.

use nalgebra::{DMatrix, DVector, Matrix3x2, Vector3};
use sim_types::{Result, SimError};

use crate::contact::{
    ConstraintKey, ConstraintKind, ContactGeometry, ContactType, JointLimitGeometry,
    SkeletonContactType,
};
use crate::restore::StateGuard;
use crate::snapshot::{StepGradientSnapshot, forward_pass_idempotent};
use crate::spatial::{
    SpatialVector, ad, ad_t, angular, exp_map, gradient_wrt_theta,
    gradient_wrt_theta_pure_rotation, spatial, tangent_basis, tangent_basis_gradient,
};
use crate::world::{DifferentiableWorld, Skeleton, locate_dof};

/// Normal-gradient magnitude below which the friction basis is treated as fixed.
const NORMAL_GRADIENT_EPSILON: f64 = 1e-12;

/// One scalar constraint dimension and its analytic derivatives.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactGradient {
    kind: ConstraintKind,
    index: usize,
    skeletons: Vec<String>,
    key: Option<ConstraintKey>,
}

impl ContactGradient {
    /// Dimension `index` of a contact: 0 is the normal, 1 and 2 the friction directions.
    #[must_use]
    pub fn contact(geometry: ContactGeometry, index: usize) -> Self {
        assert!(index < 3, "contact dimension {index} out of range");
        let mut skeletons = vec![geometry.body_a.skeleton.clone()];
        if geometry.body_b.skeleton != geometry.body_a.skeleton {
            skeletons.push(geometry.body_b.skeleton.clone());
        }
        Self {
            kind: ConstraintKind::Contact(geometry),
            index,
            skeletons,
            key: None,
        }
    }

    /// A joint limit on local DOF `dof` of `skeleton`; `sign` is `+1` for a lower limit.
    #[must_use]
    pub fn joint_limit(skeleton: impl Into<String>, dof: usize, sign: i8) -> Self {
        assert!(sign == 1 || sign == -1, "joint limit sign must be +1 or -1");
        let skeleton = skeleton.into();
        Self {
            kind: ConstraintKind::JointLimit(JointLimitGeometry {
                skeleton: skeleton.clone(),
                dof,
                sign,
            }),
            index: 0,
            skeletons: vec![skeleton],
            key: None,
        }
    }

    /// Constraint this dimension belongs to.
    #[must_use]
    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    /// Contact geometry, if this is a contact.
    #[must_use]
    pub fn geometry(&self) -> Option<&ContactGeometry> {
        match &self.kind {
            ConstraintKind::Contact(geometry) => Some(geometry),
            ConstraintKind::JointLimit(_) => None,
        }
    }

    /// Dimension within the owning constraint.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Names of the skeletons this constraint touches.
    #[must_use]
    pub fn skeletons(&self) -> &[String] {
        &self.skeletons
    }

    /// Whether the constraint touches skeleton `name`.
    #[must_use]
    pub fn touches(&self, name: &str) -> bool {
        self.skeletons.iter().any(|s| s == name)
    }

    /// Role and column assigned when the owning snapshot was assembled.
    #[must_use]
    pub fn key(&self) -> Option<ConstraintKey> {
        self.key
    }

    pub(crate) fn set_key(&mut self, key: ConstraintKey) {
        self.key = Some(key);
    }

    // ========================================================================
    // Geometry
    // ========================================================================

    /// World contact point (zero for joint limits).
    #[must_use]
    pub fn world_position(&self) -> Vector3<f64> {
        self.geometry().map_or_else(Vector3::zeros, |g| g.point)
    }

    /// World contact normal (zero for joint limits).
    #[must_use]
    pub fn world_normal(&self) -> Vector3<f64> {
        self.geometry().map_or_else(Vector3::zeros, |g| g.normal)
    }

    /// Friction directions for this contact's normal.
    #[must_use]
    pub fn tangent_basis(&self) -> Matrix3x2<f64> {
        self.geometry().map_or_else(Matrix3x2::zeros, |g| {
            tangent_basis(&g.normal, &g.first_friction_direction)
        })
    }

    /// Direction a positive impulse along this dimension pushes body A.
    #[must_use]
    pub fn force_direction(&self) -> Vector3<f64> {
        match self.geometry() {
            None => Vector3::zeros(),
            Some(g) if self.index == 0 => g.normal,
            Some(_) => self.tangent_basis().column(self.index - 1).into_owned(),
        }
    }

    /// Unit-impulse wrench `[p × d; d]` about the world origin.
    #[must_use]
    pub fn world_force(&self) -> SpatialVector {
        let p = self.world_position();
        let d = self.force_direction();
        spatial(&p.cross(&d), &d)
    }

    /// Role skeleton `name` plays in the contact.
    #[must_use]
    pub fn contact_type_for(&self, name: &str) -> SkeletonContactType {
        let Some(g) = self.geometry() else {
            return SkeletonContactType::None;
        };
        if g.body_a.skeleton == name {
            match g.contact_type {
                ContactType::FaceVertex => SkeletonContactType::Face,
                ContactType::VertexFace => SkeletonContactType::Vertex,
                ContactType::EdgeEdge => SkeletonContactType::Edge,
                ContactType::Unsupported => SkeletonContactType::Unsupported,
            }
        } else if g.body_b.skeleton == name {
            match g.contact_type {
                ContactType::FaceVertex => SkeletonContactType::Vertex,
                ContactType::VertexFace => SkeletonContactType::Face,
                ContactType::EdgeEdge => SkeletonContactType::Edge,
                ContactType::Unsupported => SkeletonContactType::Unsupported,
            }
        } else {
            SkeletonContactType::None
        }
    }

    // ========================================================================
    // Generalized forces
    // ========================================================================

    /// `+1` if `dof` moves body A, `-1` if it moves body B, `0` otherwise.
    ///
    /// Joint limits report `1` for every DOF.
    #[must_use]
    pub fn force_multiple<S: Skeleton + ?Sized>(&self, skeleton: &S, dof: usize) -> f64 {
        let Some(g) = self.geometry() else {
            return 1.0;
        };
        let body = skeleton.dof_child_body(dof);
        if g.body_a.skeleton == skeleton.name() && skeleton.is_ancestor_or_self(body, g.body_a.body)
        {
            1.0
        } else if g.body_b.skeleton == skeleton.name()
            && skeleton.is_ancestor_or_self(body, g.body_b.body)
        {
            -1.0
        } else {
            0.0
        }
    }

    fn moves_contact<S: Skeleton + ?Sized>(&self, skeleton: &S, dof: usize) -> bool {
        self.geometry().is_some() && self.force_multiple(skeleton, dof) != 0.0
    }

    /// Generalized force on every DOF of `skeleton` from a unit impulse.
    #[must_use]
    pub fn constraint_forces<S: Skeleton + ?Sized>(&self, skeleton: &S) -> DVector<f64> {
        let n = skeleton.num_dofs();
        match &self.kind {
            ConstraintKind::Contact(_) => {
                let wrench = self.world_force();
                DVector::from_fn(n, |dof, _| {
                    skeleton.world_screw_axis(dof).dot(&wrench)
                        * self.force_multiple(skeleton, dof)
                })
            }
            ConstraintKind::JointLimit(limit) => {
                let mut out = DVector::zeros(n);
                if limit.skeleton == skeleton.name() {
                    out[limit.dof] = f64::from(limit.sign);
                }
                out
            }
        }
    }

    /// Generalized force on one DOF from a unit impulse.
    #[must_use]
    pub fn constraint_force<S: Skeleton + ?Sized>(&self, skeleton: &S, dof: usize) -> f64 {
        match &self.kind {
            ConstraintKind::Contact(_) => {
                skeleton.world_screw_axis(dof).dot(&self.world_force())
                    * self.force_multiple(skeleton, dof)
            }
            ConstraintKind::JointLimit(limit) => {
                if limit.skeleton == skeleton.name() && limit.dof == dof {
                    f64::from(limit.sign)
                } else {
                    0.0
                }
            }
        }
    }

    /// Generalized force on every world DOF from a unit impulse.
    #[must_use]
    pub fn world_constraint_forces<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DVector<f64> {
        crate::world::concat_skeletons(world, |skel| self.constraint_forces(skel))
    }

    // ========================================================================
    // Per-DOF gradients
    // ========================================================================

    /// `dp/dθ` for local DOF `dof` of `skeleton`.
    #[must_use]
    pub fn contact_position_gradient<S: Skeleton + ?Sized>(
        &self,
        skeleton: &S,
        dof: usize,
    ) -> Vector3<f64> {
        if !self.moves_contact(skeleton, dof) {
            return Vector3::zeros();
        }
        match self.contact_type_for(skeleton.name()) {
            SkeletonContactType::Vertex => gradient_wrt_theta(
                &skeleton.world_screw_axis(dof),
                &self.world_position(),
                0.0,
            ),
            _ => Vector3::zeros(),
        }
    }

    /// `dn/dθ` for local DOF `dof` of `skeleton`.
    #[must_use]
    pub fn contact_normal_gradient<S: Skeleton + ?Sized>(
        &self,
        skeleton: &S,
        dof: usize,
    ) -> Vector3<f64> {
        if !self.moves_contact(skeleton, dof) {
            return Vector3::zeros();
        }
        match self.contact_type_for(skeleton.name()) {
            SkeletonContactType::Face => gradient_wrt_theta_pure_rotation(
                &angular(&skeleton.world_screw_axis(dof)),
                &self.world_normal(),
                0.0,
            ),
            _ => Vector3::zeros(),
        }
    }

    /// `dd/dθ` of the force direction for local DOF `dof` of `skeleton`.
    #[must_use]
    pub fn contact_force_direction_gradient<S: Skeleton + ?Sized>(
        &self,
        skeleton: &S,
        dof: usize,
    ) -> Vector3<f64> {
        let Some(g) = self.geometry() else {
            return Vector3::zeros();
        };
        if self.contact_type_for(skeleton.name()) != SkeletonContactType::Face {
            return Vector3::zeros();
        }
        let normal_gradient = self.contact_normal_gradient(skeleton, dof);
        if self.index == 0 || normal_gradient.norm_squared() <= NORMAL_GRADIENT_EPSILON {
            return normal_gradient;
        }
        tangent_basis_gradient(&g.normal, &normal_gradient, &g.first_friction_direction)
            .column(self.index - 1)
            .into_owned()
    }

    /// Derivative of [`Self::world_force`] for local DOF `dof` of `skeleton`.
    #[must_use]
    pub fn contact_world_force_gradient<S: Skeleton + ?Sized>(
        &self,
        skeleton: &S,
        dof: usize,
    ) -> SpatialVector {
        let p = self.world_position();
        let d = self.force_direction();
        let dp = self.contact_position_gradient(skeleton, dof);
        let dd = self.contact_force_direction_gradient(skeleton, dof);
        spatial(&(p.cross(&dd) + dp.cross(&d)), &dd)
    }

    /// Whether moving `rotate` moves the screw axis of `axis` (both local to `skeleton`).
    fn rotates_axis<S: Skeleton + ?Sized>(skeleton: &S, rotate: usize, axis: usize) -> bool {
        let rotate_body = skeleton.dof_child_body(rotate);
        let axis_body = skeleton.dof_child_body(axis);
        if rotate_body == axis_body {
            rotate < axis
        } else {
            skeleton.is_ancestor_or_self(rotate_body, axis_body)
        }
    }

    /// Rate of change of the world screw axis of `axis_dof` as `rotate_dof` moves.
    ///
    /// Zero across skeletons and when `rotate_dof` is not upstream of `axis_dof`.
    #[must_use]
    pub fn screw_axis_gradient<W: DifferentiableWorld + ?Sized>(
        world: &W,
        axis_dof: usize,
        rotate_dof: usize,
    ) -> SpatialVector {
        let (axis_skel, axis_local) = locate_dof(world, axis_dof);
        let (rotate_skel, rotate_local) = locate_dof(world, rotate_dof);
        if axis_skel != rotate_skel {
            return SpatialVector::zeros();
        }
        let skeleton = world.skeleton(axis_skel);
        if !Self::rotates_axis(skeleton, rotate_local, axis_local) {
            return SpatialVector::zeros();
        }
        ad(
            &skeleton.world_screw_axis(rotate_local),
            &skeleton.world_screw_axis(axis_local),
        )
    }

    /// `d(constraint force on dof)/d(q[wrt_dof])`, both world DOF indices.
    #[must_use]
    pub fn constraint_force_derivative<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &W,
        dof: usize,
        wrt_dof: usize,
    ) -> f64 {
        if self.geometry().is_none() {
            return 0.0;
        }
        let (skel, local) = locate_dof(world, dof);
        let skeleton = world.skeleton(skel);
        let multiple = self.force_multiple(skeleton, local);
        if multiple == 0.0 {
            return 0.0;
        }
        let (wrt_skel, wrt_local) = locate_dof(world, wrt_dof);
        let axis = skeleton.world_screw_axis(local);
        let axis_gradient = Self::screw_axis_gradient(world, dof, wrt_dof);
        let force_gradient = self.contact_world_force_gradient(world.skeleton(wrt_skel), wrt_local);
        multiple * (axis_gradient.dot(&self.world_force()) + axis.dot(&force_gradient))
    }

    // ========================================================================
    // World Jacobians
    // ========================================================================

    fn world_columns<W, const R: usize, F>(world: &W, column: F) -> DMatrix<f64>
    where
        W: DifferentiableWorld + ?Sized,
        F: Fn(&W::Skeleton, usize) -> nalgebra::SVector<f64, R>,
    {
        let mut out = DMatrix::zeros(R, world.num_dofs());
        let mut col = 0;
        for s in 0..world.num_skeletons() {
            let skeleton = world.skeleton(s);
            for dof in 0..skeleton.num_dofs() {
                out.column_mut(col).copy_from(&column(skeleton, dof));
                col += 1;
            }
        }
        out
    }

    /// `dp/dq` over every world DOF (3 × N).
    #[must_use]
    pub fn contact_position_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        Self::world_columns(world, |skel, dof| self.contact_position_gradient(skel, dof))
    }

    /// `dn/dq` over every world DOF (3 × N).
    #[must_use]
    pub fn contact_normal_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        Self::world_columns(world, |skel, dof| self.contact_normal_gradient(skel, dof))
    }

    /// `dd/dq` of the force direction over every world DOF (3 × N).
    #[must_use]
    pub fn contact_force_direction_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &W,
    ) -> DMatrix<f64> {
        Self::world_columns(world, |skel, dof| {
            self.contact_force_direction_gradient(skel, dof)
        })
    }

    /// `dF/dq` of the unit-impulse wrench over every world DOF (6 × N).
    #[must_use]
    pub fn contact_force_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        Self::world_columns(world, |skel, dof| {
            self.contact_world_force_gradient(skel, dof)
        })
    }

    /// `dτ/dq` where `τ` is [`Self::world_constraint_forces`] (N × N).
    ///
    /// Row `i` is the generalized force on DOF `i`, column `j` the DOF moved.
    #[must_use]
    pub fn constraint_forces_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        let n = world.num_dofs();
        let mut out = DMatrix::zeros(n, n);
        if self.geometry().is_none() {
            return out;
        }
        let wrench = self.world_force();
        let wrench_jacobian = self.contact_force_jacobian(world);
        let mut row = 0;
        for s in 0..world.num_skeletons() {
            let skeleton = world.skeleton(s);
            for dof in 0..skeleton.num_dofs() {
                let multiple = self.force_multiple(skeleton, dof);
                if multiple != 0.0 {
                    let axis = skeleton.world_screw_axis(dof);
                    for wrt in 0..n {
                        let axis_gradient = Self::screw_axis_gradient(world, row, wrt);
                        out[(row, wrt)] = multiple
                            * (axis_gradient.dot(&wrench)
                                + axis.dot(&wrench_jacobian.column(wrt)));
                    }
                }
                row += 1;
            }
        }
        out
    }

    // ========================================================================
    // First-order estimates
    // ========================================================================

    /// Contact point after moving world DOF `dof` by `eps`, predicted with the exponential map.
    #[must_use]
    pub fn estimate_perturbed_contact_position<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &W,
        dof: usize,
        eps: f64,
    ) -> Vector3<f64> {
        let p = self.world_position();
        let (skel, local) = locate_dof(world, dof);
        let skeleton = world.skeleton(skel);
        if !self.moves_contact(skeleton, local)
            || self.contact_type_for(skeleton.name()) != SkeletonContactType::Vertex
        {
            return p;
        }
        exp_map(&(skeleton.world_screw_axis(local) * eps))
            .transform_point(&p.into())
            .coords
    }

    /// Contact normal after moving world DOF `dof` by `eps`.
    #[must_use]
    pub fn estimate_perturbed_contact_normal<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &W,
        dof: usize,
        eps: f64,
    ) -> Vector3<f64> {
        let n = self.world_normal();
        let (skel, local) = locate_dof(world, dof);
        let skeleton = world.skeleton(skel);
        if !self.moves_contact(skeleton, local)
            || self.contact_type_for(skeleton.name()) != SkeletonContactType::Face
        {
            return n;
        }
        exp_map(&(skeleton.world_screw_axis(local) * eps)).rotation * n
    }

    /// Force direction after moving world DOF `dof` by `eps`.
    #[must_use]
    pub fn estimate_perturbed_contact_force_direction<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &W,
        dof: usize,
        eps: f64,
    ) -> Vector3<f64> {
        let Some(g) = self.geometry() else {
            return Vector3::zeros();
        };
        let n = self.estimate_perturbed_contact_normal(world, dof, eps);
        if self.index == 0 {
            n
        } else {
            tangent_basis(&n, &g.first_friction_direction)
                .column(self.index - 1)
                .into_owned()
        }
    }

    /// Screw axis of `axis_dof` after moving `rotate_dof` by `eps`.
    #[must_use]
    pub fn estimate_perturbed_screw_axis<W: DifferentiableWorld + ?Sized>(
        world: &W,
        axis_dof: usize,
        rotate_dof: usize,
        eps: f64,
    ) -> SpatialVector {
        let (axis_skel, axis_local) = locate_dof(world, axis_dof);
        let (rotate_skel, rotate_local) = locate_dof(world, rotate_dof);
        let skeleton = world.skeleton(axis_skel);
        let axis = skeleton.world_screw_axis(axis_local);
        if axis_skel != rotate_skel || !Self::rotates_axis(skeleton, rotate_local, axis_local) {
            return axis;
        }
        ad_t(&exp_map(&(skeleton.world_screw_axis(rotate_local) * eps)), &axis)
    }

    // ========================================================================
    // Brute force
    // ========================================================================

    /// The constraint occupying this constraint's role and column in another snapshot.
    #[must_use]
    pub fn peer_constraint<'s>(&self, snapshot: &'s StepGradientSnapshot) -> Option<&'s Self> {
        self.key.and_then(|key| snapshot.constraint(key))
    }

    /// Perturb world DOF `dof`, re-run the forward pass and read the peer constraint.
    ///
    /// `read` sees the world at the perturbed pre-step state.
    fn probe_peer<W, T, F>(&self, world: &mut W, dof: usize, eps: f64, read: F) -> Result<T>
    where
        W: DifferentiableWorld,
        F: Fn(&Self, &W) -> T,
    {
        let key = self.key.ok_or_else(|| {
            SimError::solver_failure("constraint was not assembled into a snapshot")
        })?;
        let mut guard = StateGuard::new(world);
        let mut q = guard.positions();
        q[dof] += eps;
        guard.set_positions(&q);
        let snapshot = forward_pass_idempotent(&mut *guard)?;
        let peer = snapshot.constraint(key).ok_or_else(|| {
            SimError::solver_failure(format!(
                "no {:?} constraint at column {} after perturbing dof {dof}",
                key.role, key.offset
            ))
        })?;
        Ok(read(peer, &guard))
    }

    /// Contact point of the peer constraint after perturbing world DOF `dof`.
    pub fn brute_force_perturbed_contact_position<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        dof: usize,
        eps: f64,
    ) -> Result<Vector3<f64>> {
        self.probe_peer(world, dof, eps, |peer, _| peer.world_position())
    }

    /// Contact normal of the peer constraint after perturbing world DOF `dof`.
    pub fn brute_force_perturbed_contact_normal<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        dof: usize,
        eps: f64,
    ) -> Result<Vector3<f64>> {
        self.probe_peer(world, dof, eps, |peer, _| peer.world_normal())
    }

    /// Force direction of the peer constraint after perturbing world DOF `dof`.
    pub fn brute_force_perturbed_contact_force_direction<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        dof: usize,
        eps: f64,
    ) -> Result<Vector3<f64>> {
        self.probe_peer(world, dof, eps, |peer, _| peer.force_direction())
    }

    /// Generalized constraint forces of the peer constraint after perturbing world DOF `dof`.
    pub fn brute_force_perturbed_constraint_forces<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        dof: usize,
        eps: f64,
    ) -> Result<DVector<f64>> {
        self.probe_peer(world, dof, eps, |peer, w| peer.world_constraint_forces(w))
    }

    /// Screw axis of `axis_dof` read back after moving `rotate_dof` by `eps`.
    #[must_use]
    pub fn brute_force_perturbed_screw_axis<W: DifferentiableWorld>(
        world: &mut W,
        axis_dof: usize,
        rotate_dof: usize,
        eps: f64,
    ) -> SpatialVector {
        let mut guard = StateGuard::new(world);
        let mut q = guard.positions();
        q[rotate_dof] += eps;
        guard.set_positions(&q);
        let (skel, local) = locate_dof(&*guard, axis_dof);
        guard.skeleton(skel).world_screw_axis(local)
    }

    fn central_difference<W, F>(&self, world: &mut W, rows: usize, eps: f64, probe: F) -> Result<DMatrix<f64>>
    where
        W: DifferentiableWorld,
        F: Fn(&Self, &mut W, usize, f64) -> Result<DVector<f64>>,
    {
        let n = world.num_dofs();
        let mut out = DMatrix::zeros(rows, n);
        for dof in 0..n {
            let plus = probe(self, world, dof, eps)?;
            let minus = probe(self, world, dof, -eps)?;
            out.column_mut(dof).copy_from(&((plus - minus) / (2.0 * eps)));
        }
        Ok(out)
    }

    /// Finite-difference counterpart of [`Self::contact_position_jacobian`].
    pub fn brute_force_contact_position_jacobian<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        eps: f64,
    ) -> Result<DMatrix<f64>> {
        self.central_difference(world, 3, eps, |c, w, dof, e| {
            c.brute_force_perturbed_contact_position(w, dof, e)
                .map(|p| DVector::from_column_slice(p.as_slice()))
        })
    }

    /// Finite-difference counterpart of [`Self::contact_normal_jacobian`].
    pub fn brute_force_contact_normal_jacobian<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        eps: f64,
    ) -> Result<DMatrix<f64>> {
        self.central_difference(world, 3, eps, |c, w, dof, e| {
            c.brute_force_perturbed_contact_normal(w, dof, e)
                .map(|n| DVector::from_column_slice(n.as_slice()))
        })
    }

    /// Finite-difference counterpart of [`Self::contact_force_direction_jacobian`].
    pub fn brute_force_contact_force_direction_jacobian<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        eps: f64,
    ) -> Result<DMatrix<f64>> {
        self.central_difference(world, 3, eps, |c, w, dof, e| {
            c.brute_force_perturbed_contact_force_direction(w, dof, e)
                .map(|d| DVector::from_column_slice(d.as_slice()))
        })
    }

    /// Finite-difference counterpart of [`Self::contact_force_jacobian`].
    pub fn brute_force_contact_force_jacobian<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        eps: f64,
    ) -> Result<DMatrix<f64>> {
        self.central_difference(world, 6, eps, |c, w, dof, e| {
            c.probe_peer(w, dof, e, |peer, _| {
                DVector::from_column_slice(peer.world_force().as_slice())
            })
        })
    }

    /// Finite-difference counterpart of [`Self::constraint_forces_jacobian`].
    pub fn brute_force_constraint_forces_jacobian<W: DifferentiableWorld>(
        &self,
        world: &mut W,
        eps: f64,
    ) -> Result<DMatrix<f64>> {
        let n = world.num_dofs();
        self.central_difference(world, n, eps, |c, w, dof, e| {
            c.brute_force_perturbed_constraint_forces(w, dof, e)
        })
    }
}
