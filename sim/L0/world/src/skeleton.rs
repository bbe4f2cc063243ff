//! Serial-chain skeletons.
//!
//! A [`ChainSkeleton`] is a single kinematic tree with no branching: link `i`
//! hangs off link `i - 1` (or the skeleton root for `i = 0`) through one joint.
//! Revolute and prismatic joints contribute one DOF each; weld joints rigidly
//! attach a link and contribute none.
//!
//! Dynamics are evaluated from scratch at every query:
//!
//! - Mass matrix: `M = Σ_b J_bᵀ · I_b · J_b` with world-frame spatial inertias
//! - Bias forces: recursive Newton-Euler at zero joint acceleration, gravity
//!   entered as an upward base acceleration
//! - `dC/dq`, `dC/dv`: central differences of the bias forces

use nalgebra::{
    Cholesky, DMatrix, DVector, Isometry3, Matrix6, Translation3, Unit, UnitQuaternion, Vector3,
};
use sim_diff::linalg::pseudo_inverse;
use sim_diff::spatial::{ad, ad_t, compute_body_spatial_inertia, spatial, spatial_cross_force};
use sim_diff::{BodyIndex, Skeleton, SpatialVector};
use sim_types::{Result, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Perturbation used for `dC/dq` and `dC/dv`.
const BIAS_JACOBIAN_EPS: f64 = 1e-6;

/// How a link moves relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointKind {
    /// Rotation about the joint axis.
    Revolute,
    /// Translation along the joint axis.
    Prismatic,
    /// Rigid attachment, no DOF.
    Weld,
}

/// Position limits of a one-DOF joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointLimits {
    /// Lowest allowed position.
    pub lower: f64,
    /// Highest allowed position.
    pub upper: f64,
}

/// Joint connecting a link to its parent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Joint {
    /// Joint type.
    pub kind: JointKind,
    /// Axis in the joint frame.
    pub axis: Unit<Vector3<f64>>,
    /// Joint frame relative to the parent link frame.
    pub parent_offset: Isometry3<f64>,
    /// Position limits, if any.
    pub limits: Option<JointLimits>,
}

impl Joint {
    /// Revolute joint about `axis` at `parent_offset`.
    #[must_use]
    pub fn revolute(axis: Vector3<f64>, parent_offset: Isometry3<f64>) -> Self {
        Self {
            kind: JointKind::Revolute,
            axis: Unit::new_normalize(axis),
            parent_offset,
            limits: None,
        }
    }

    /// Prismatic joint along `axis` at `parent_offset`.
    #[must_use]
    pub fn prismatic(axis: Vector3<f64>, parent_offset: Isometry3<f64>) -> Self {
        Self {
            kind: JointKind::Prismatic,
            axis: Unit::new_normalize(axis),
            parent_offset,
            limits: None,
        }
    }

    /// Rigid attachment at `parent_offset`.
    #[must_use]
    pub fn weld(parent_offset: Isometry3<f64>) -> Self {
        Self {
            kind: JointKind::Weld,
            axis: Vector3::z_axis(),
            parent_offset,
            limits: None,
        }
    }

    /// Add position limits.
    #[must_use]
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.limits = Some(JointLimits { lower, upper });
        self
    }

    /// Whether the joint contributes a DOF.
    #[must_use]
    pub fn has_dof(&self) -> bool {
        self.kind != JointKind::Weld
    }

    fn motion(&self, q: f64) -> Isometry3<f64> {
        match self.kind {
            JointKind::Revolute => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&self.axis, q),
            ),
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(self.axis.into_inner() * q),
                UnitQuaternion::identity(),
            ),
            JointKind::Weld => Isometry3::identity(),
        }
    }

    fn local_screw(&self) -> SpatialVector {
        let axis = self.axis.into_inner();
        match self.kind {
            JointKind::Revolute => spatial(&axis, &Vector3::zeros()),
            JointKind::Prismatic => spatial(&Vector3::zeros(), &axis),
            JointKind::Weld => SpatialVector::zeros(),
        }
    }
}

/// Collision geometry attached to a link, in the link frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// Points that can touch planes.
    Vertices(Vec<Vector3<f64>>),
    /// Half-space whose boundary passes through `point`, solid opposite `normal`.
    Plane {
        /// A point on the boundary.
        point: Vector3<f64>,
        /// Outward unit normal.
        normal: Unit<Vector3<f64>>,
    },
}

/// A rigid link and the joint that moves it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Link {
    /// Link name.
    pub name: String,
    /// Joint to the parent link.
    pub joint: Joint,
    /// Mass (kg).
    pub mass: f64,
    /// Center of mass in the link frame.
    pub com: Vector3<f64>,
    /// Principal moments of inertia about the center of mass, link axes.
    pub moi: Vector3<f64>,
    /// Collision shapes.
    pub shapes: Vec<Shape>,
}

impl Link {
    /// Massless link without shapes.
    #[must_use]
    pub fn new(name: impl Into<String>, joint: Joint) -> Self {
        Self {
            name: name.into(),
            joint,
            mass: 0.0,
            com: Vector3::zeros(),
            moi: Vector3::zeros(),
            shapes: Vec::new(),
        }
    }

    /// Set mass, center of mass and principal moments.
    #[must_use]
    pub fn with_inertia(mut self, mass: f64, com: Vector3<f64>, moi: Vector3<f64>) -> Self {
        self.mass = mass;
        self.com = com;
        self.moi = moi;
        self
    }

    /// Attach a collision shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shapes.push(shape);
        self
    }

    fn spatial_inertia(&self, transform: &Isometry3<f64>) -> Matrix6<f64> {
        let rotation = transform.rotation.to_rotation_matrix().into_inner();
        let h = transform.transform_point(&self.com.into()).coords;
        compute_body_spatial_inertia(self.mass, &self.moi, &rotation, &h)
    }
}

/// A serial kinematic chain with its own state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChainSkeleton {
    name: String,
    root: Isometry3<f64>,
    links: Vec<Link>,
    dof_links: Vec<usize>,
    mobile: bool,
    gravity: Vector3<f64>,
    friction: f64,
    restitution: f64,
    positions: DVector<f64>,
    velocities: DVector<f64>,
    forces: DVector<f64>,
}

impl ChainSkeleton {
    /// Empty mobile skeleton rooted at `root`.
    #[must_use]
    pub fn new(name: impl Into<String>, root: Isometry3<f64>) -> Self {
        Self {
            name: name.into(),
            root,
            links: Vec::new(),
            dof_links: Vec::new(),
            mobile: true,
            gravity: Vector3::zeros(),
            friction: 0.0,
            restitution: 0.0,
            positions: DVector::zeros(0),
            velocities: DVector::zeros(0),
            forces: DVector::zeros(0),
        }
    }

    /// Append a link at the end of the chain.
    #[must_use]
    pub fn with_link(mut self, link: Link) -> Self {
        if link.joint.has_dof() {
            self.dof_links.push(self.links.len());
        }
        self.links.push(link);
        let n = self.dof_links.len();
        self.positions = self.positions.clone().resize_vertically(n, 0.0);
        self.velocities = self.velocities.clone().resize_vertically(n, 0.0);
        self.forces = self.forces.clone().resize_vertically(n, 0.0);
        self
    }

    /// Mark the skeleton as immobile: the solver treats it as infinitely heavy
    /// and stepping leaves its state untouched.
    #[must_use]
    pub fn immobile(mut self) -> Self {
        self.mobile = false;
        self
    }

    /// Set the Coulomb friction coefficient.
    #[must_use]
    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    /// Set the restitution coefficient.
    #[must_use]
    pub fn with_restitution(mut self, restitution: f64) -> Self {
        self.restitution = restitution;
        self
    }

    /// Set the initial positions.
    ///
    /// # Errors
    ///
    /// Returns an error if `positions` does not have one entry per DOF.
    pub fn with_positions(mut self, positions: DVector<f64>) -> Result<Self> {
        self.check_len("positions", &positions)?;
        self.positions = positions;
        Ok(self)
    }

    /// Set the initial velocities.
    ///
    /// # Errors
    ///
    /// Returns an error if `velocities` does not have one entry per DOF.
    pub fn with_velocities(mut self, velocities: DVector<f64>) -> Result<Self> {
        self.check_len("velocities", &velocities)?;
        self.velocities = velocities;
        Ok(self)
    }

    fn check_len(&self, what: &str, v: &DVector<f64>) -> Result<()> {
        if v.len() == self.num_dofs() {
            Ok(())
        } else {
            Err(SimError::dimension_mismatch(
                format!("{what} of skeleton {}", self.name),
                self.num_dofs(),
                v.len(),
            ))
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Links in chain order.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Friction coefficient.
    #[must_use]
    pub fn friction(&self) -> f64 {
        self.friction
    }

    /// Restitution coefficient.
    #[must_use]
    pub fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Link that DOF `dof` moves.
    #[must_use]
    pub fn dof_link(&self, dof: usize) -> usize {
        self.dof_links[dof]
    }

    /// Position limits of DOF `dof`.
    #[must_use]
    pub fn dof_limits(&self, dof: usize) -> Option<JointLimits> {
        self.links[self.dof_links[dof]].joint.limits
    }

    pub(crate) fn set_gravity(&mut self, gravity: Vector3<f64>) {
        self.gravity = gravity;
    }

    pub(crate) fn set_positions(&mut self, positions: &DVector<f64>) {
        self.positions.copy_from(positions);
    }

    pub(crate) fn set_velocities(&mut self, velocities: &DVector<f64>) {
        self.velocities.copy_from(velocities);
    }

    pub(crate) fn set_forces(&mut self, forces: &DVector<f64>) {
        self.forces.copy_from(forces);
    }

    pub(crate) fn link_masses(&self) -> impl Iterator<Item = f64> + '_ {
        self.links.iter().map(|l| l.mass)
    }

    pub(crate) fn links_mut(&mut self) -> &mut [Link] {
        &mut self.links
    }

    // ========================================================================
    // Kinematics
    // ========================================================================

    /// World transform of every link at positions `q`.
    #[must_use]
    pub fn link_transforms_at(&self, q: &DVector<f64>) -> Vec<Isometry3<f64>> {
        let mut out = Vec::with_capacity(self.links.len());
        let mut parent = self.root;
        let mut dof = 0;
        for link in &self.links {
            let q_link = if link.joint.has_dof() {
                dof += 1;
                q[dof - 1]
            } else {
                0.0
            };
            let transform = parent * link.joint.parent_offset * link.joint.motion(q_link);
            out.push(transform);
            parent = transform;
        }
        out
    }

    /// World transform of every link at the current positions.
    #[must_use]
    pub fn link_transforms(&self) -> Vec<Isometry3<f64>> {
        self.link_transforms_at(&self.positions)
    }

    fn screws_at(&self, transforms: &[Isometry3<f64>]) -> Vec<SpatialVector> {
        self.dof_links
            .iter()
            .map(|&l| ad_t(&transforms[l], &self.links[l].joint.local_screw()))
            .collect()
    }

    /// DOFs whose joints move link `link`.
    fn dofs_moving(&self, link: usize) -> impl Iterator<Item = usize> + '_ {
        self.dof_links
            .iter()
            .enumerate()
            .take_while(move |&(_, &l)| l <= link)
            .map(|(dof, _)| dof)
    }

    // ========================================================================
    // Dynamics
    // ========================================================================

    /// Mass matrix at positions `q`.
    #[must_use]
    pub fn mass_matrix_at(&self, q: &DVector<f64>) -> DMatrix<f64> {
        let n = self.num_dofs();
        let transforms = self.link_transforms_at(q);
        let screws = self.screws_at(&transforms);
        let mut mass = DMatrix::zeros(n, n);
        for (b, link) in self.links.iter().enumerate() {
            if link.mass == 0.0 && link.moi == Vector3::zeros() {
                continue;
            }
            let inertia = link.spatial_inertia(&transforms[b]);
            for i in self.dofs_moving(b) {
                let fi = inertia * screws[i];
                for j in self.dofs_moving(b) {
                    mass[(j, i)] += screws[j].dot(&fi);
                }
            }
        }
        mass
    }

    /// Bias forces `C(q, v)` by recursive Newton-Euler with zero joint accelerations.
    #[must_use]
    pub fn bias_forces_at(&self, q: &DVector<f64>, v: &DVector<f64>) -> DVector<f64> {
        let n = self.num_dofs();
        let transforms = self.link_transforms_at(q);
        let screws = self.screws_at(&transforms);

        let mut twist = SpatialVector::zeros();
        let mut accel = spatial(&Vector3::zeros(), &(-self.gravity));
        let mut link_forces = Vec::with_capacity(self.links.len());
        let mut link_dof = vec![None; self.links.len()];
        for (dof, &l) in self.dof_links.iter().enumerate() {
            link_dof[l] = Some(dof);
        }

        for (b, link) in self.links.iter().enumerate() {
            if let Some(dof) = link_dof[b] {
                twist += screws[dof] * v[dof];
                accel += ad(&twist, &screws[dof]) * v[dof];
            }
            let inertia = link.spatial_inertia(&transforms[b]);
            link_forces.push(inertia * accel + spatial_cross_force(&twist, &(inertia * twist)));
        }

        let mut tau = DVector::zeros(n);
        let mut carried = SpatialVector::zeros();
        for b in (0..self.links.len()).rev() {
            carried += link_forces[b];
            if let Some(dof) = link_dof[b] {
                tau[dof] = screws[dof].dot(&carried);
            }
        }
        tau
    }

    /// Cholesky factor of the mass matrix.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SingularMassMatrix`] if `M` is not positive definite.
    pub fn factor_mass_matrix(&self) -> Result<Cholesky<f64, nalgebra::Dyn>> {
        Cholesky::new(self.mass_matrix()).ok_or_else(|| SimError::SingularMassMatrix {
            skeleton: self.name.clone(),
        })
    }

    /// Kinetic plus gravitational potential energy.
    #[must_use]
    pub fn energy(&self) -> f64 {
        let kinetic = 0.5 * self.velocities.dot(&(self.mass_matrix() * &self.velocities));
        let transforms = self.link_transforms();
        let potential: f64 = self
            .links
            .iter()
            .zip(&transforms)
            .map(|(link, t)| -link.mass * self.gravity.dot(&t.transform_point(&link.com.into()).coords))
            .sum();
        kinetic + potential
    }
}

impl Skeleton for ChainSkeleton {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_dofs(&self) -> usize {
        self.dof_links.len()
    }

    fn is_mobile(&self) -> bool {
        self.mobile
    }

    fn positions(&self) -> DVector<f64> {
        self.positions.clone()
    }

    fn velocities(&self) -> DVector<f64> {
        self.velocities.clone()
    }

    fn forces(&self) -> DVector<f64> {
        self.forces.clone()
    }

    fn mass_matrix(&self) -> DMatrix<f64> {
        self.mass_matrix_at(&self.positions)
    }

    fn inv_mass_matrix(&self) -> DMatrix<f64> {
        let n = self.num_dofs();
        if !self.mobile {
            return DMatrix::zeros(n, n);
        }
        let mass = self.mass_matrix();
        Cholesky::new(mass.clone()).map_or_else(|| pseudo_inverse(&mass), |c| c.inverse())
    }

    fn multiply_by_inv_mass(&self, x: &DVector<f64>) -> DVector<f64> {
        if !self.mobile {
            return DVector::zeros(x.len());
        }
        match self.factor_mass_matrix() {
            Ok(chol) => chol.solve(x),
            Err(_) => pseudo_inverse(&self.mass_matrix()) * x,
        }
    }

    fn coriolis_and_gravity_forces(&self) -> DVector<f64> {
        self.bias_forces_at(&self.positions, &self.velocities)
    }

    fn pos_c_jacobian(&self) -> DMatrix<f64> {
        let n = self.num_dofs();
        let mut out = DMatrix::zeros(n, n);
        for i in 0..n {
            let mut q = self.positions.clone();
            q[i] += BIAS_JACOBIAN_EPS;
            let plus = self.bias_forces_at(&q, &self.velocities);
            q[i] -= 2.0 * BIAS_JACOBIAN_EPS;
            let minus = self.bias_forces_at(&q, &self.velocities);
            out.set_column(i, &((plus - minus) / (2.0 * BIAS_JACOBIAN_EPS)));
        }
        out
    }

    fn vel_c_jacobian(&self) -> DMatrix<f64> {
        let n = self.num_dofs();
        let mut out = DMatrix::zeros(n, n);
        for i in 0..n {
            let mut v = self.velocities.clone();
            v[i] += BIAS_JACOBIAN_EPS;
            let plus = self.bias_forces_at(&self.positions, &v);
            v[i] -= 2.0 * BIAS_JACOBIAN_EPS;
            let minus = self.bias_forces_at(&self.positions, &v);
            out.set_column(i, &((plus - minus) / (2.0 * BIAS_JACOBIAN_EPS)));
        }
        out
    }

    fn world_screw_axis(&self, dof: usize) -> SpatialVector {
        let l = self.dof_links[dof];
        let transforms = self.link_transforms();
        ad_t(&transforms[l], &self.links[l].joint.local_screw())
    }

    fn dof_child_body(&self, dof: usize) -> BodyIndex {
        BodyIndex::new(0, self.dof_links[dof])
    }
}
