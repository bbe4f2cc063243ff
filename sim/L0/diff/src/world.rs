//! Interfaces the gradient core consumes from the physics engine.
//!
//! A world is an ordered list of skeletons. Each skeleton owns a contiguous
//! slice of the world's DOF vector, in skeleton order. The core never caches
//! kinematic or dynamic quantities: every matrix is re-queried from the world,
//! so perturbing positions through [`DifferentiableWorld::set_positions`] is
//! enough to evaluate any quantity at a perturbed state.

use nalgebra::{DMatrix, DVector};
use sim_types::{Result, SolverFlags, WithRespectTo};

use crate::group::ConstraintGroupMatrices;
use crate::spatial::SpatialVector;

/// Location of a body inside a skeleton's kinematic forest.
///
/// Bodies within one tree are indexed so that a parent always has a smaller
/// `index_in_tree` than its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyIndex {
    /// Tree within the skeleton.
    pub tree: usize,
    /// Index of the body within its tree.
    pub index_in_tree: usize,
}

impl BodyIndex {
    /// Create a body index.
    #[must_use]
    pub const fn new(tree: usize, index_in_tree: usize) -> Self {
        Self {
            tree,
            index_in_tree,
        }
    }
}

/// Per-skeleton dynamics queries, always evaluated at the skeleton's current state.
pub trait Skeleton {
    /// Unique name within the world.
    fn name(&self) -> &str;

    /// Number of generalized coordinates.
    fn num_dofs(&self) -> usize;

    /// Whether the skeleton responds to forces.
    fn is_mobile(&self) -> bool;

    /// Generalized positions.
    fn positions(&self) -> DVector<f64>;

    /// Generalized velocities.
    fn velocities(&self) -> DVector<f64>;

    /// Applied generalized forces.
    fn forces(&self) -> DVector<f64>;

    /// Joint-space mass matrix `M(q)`.
    fn mass_matrix(&self) -> DMatrix<f64>;

    /// Inverse mass matrix `M(q)^-1`.
    fn inv_mass_matrix(&self) -> DMatrix<f64>;

    /// `M(q)^-1 * x` without forming the inverse.
    fn multiply_by_inv_mass(&self, x: &DVector<f64>) -> DVector<f64> {
        self.inv_mass_matrix() * x
    }

    /// Coriolis, gravity and external generalized forces `C(q, v)`.
    fn coriolis_and_gravity_forces(&self) -> DVector<f64>;

    /// `dC/dq`.
    fn pos_c_jacobian(&self) -> DMatrix<f64>;

    /// `dC/dv`.
    fn vel_c_jacobian(&self) -> DMatrix<f64>;

    /// World-frame screw axis `[angular; linear]` of a DOF.
    fn world_screw_axis(&self, dof: usize) -> SpatialVector;

    /// Body moved directly by a DOF's joint.
    fn dof_child_body(&self, dof: usize) -> BodyIndex;

    /// Whether `body` moves when the joint of `ancestor` moves.
    fn is_ancestor_or_self(&self, ancestor: BodyIndex, body: BodyIndex) -> bool {
        ancestor.tree == body.tree && ancestor.index_in_tree <= body.index_in_tree
    }
}

/// A steppable multibody world that exposes what the gradient core needs.
pub trait DifferentiableWorld {
    /// Skeleton type stored in the world.
    type Skeleton: Skeleton;

    /// Number of skeletons.
    fn num_skeletons(&self) -> usize;

    /// Skeleton by index. Panics when out of range.
    fn skeleton(&self, index: usize) -> &Self::Skeleton;

    /// Index of a skeleton by name.
    fn skeleton_index(&self, name: &str) -> Option<usize> {
        (0..self.num_skeletons()).find(|&i| self.skeleton(i).name() == name)
    }

    /// Total number of DOFs.
    fn num_dofs(&self) -> usize {
        (0..self.num_skeletons())
            .map(|i| self.skeleton(i).num_dofs())
            .sum()
    }

    /// Concatenated positions.
    fn positions(&self) -> DVector<f64>;

    /// Overwrite all positions.
    fn set_positions(&mut self, positions: &DVector<f64>);

    /// Concatenated velocities.
    fn velocities(&self) -> DVector<f64>;

    /// Overwrite all velocities.
    fn set_velocities(&mut self, velocities: &DVector<f64>);

    /// Concatenated applied forces.
    fn forces(&self) -> DVector<f64>;

    /// Overwrite all applied forces.
    fn set_forces(&mut self, forces: &DVector<f64>);

    /// Step length in seconds.
    fn time_step(&self) -> f64;

    /// Change the step length.
    fn set_time_step(&mut self, time_step: f64);

    /// Concatenated Coriolis, gravity and external forces.
    fn coriolis_and_gravity_forces(&self) -> DVector<f64> {
        concat_skeletons(self, |s| s.coriolis_and_gravity_forces())
    }

    /// Advance one step, resolving constraints.
    fn step(&mut self) -> Result<()>;

    /// Constraint groups recorded by the last step while gradients were enabled.
    fn take_constraint_groups(&mut self) -> Vec<ConstraintGroupMatrices>;

    /// Current solver flags.
    fn solver_flags(&self) -> SolverFlags;

    /// Replace the solver flags.
    fn set_solver_flags(&mut self, flags: SolverFlags);

    /// Mass of every link, concatenated over skeletons.
    fn link_masses(&self) -> DVector<f64>;

    /// Overwrite every link mass.
    fn set_link_masses(&mut self, masses: &DVector<f64>);

    /// Link-frame center of mass of every link, 3 entries per link.
    fn link_coms(&self) -> DVector<f64>;

    /// Overwrite every link center of mass.
    fn set_link_coms(&mut self, coms: &DVector<f64>);

    /// Principal moments of inertia of every link, 3 entries per link.
    fn link_mois(&self) -> DVector<f64>;

    /// Overwrite every link moment of inertia.
    fn set_link_mois(&mut self, mois: &DVector<f64>);
}

// ============================================================================
// DOF bookkeeping
// ============================================================================

/// Starting DOF of every skeleton, in skeleton order.
#[must_use]
pub fn skeleton_offsets<W: DifferentiableWorld + ?Sized>(world: &W) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(world.num_skeletons());
    let mut cursor = 0;
    for i in 0..world.num_skeletons() {
        offsets.push(cursor);
        cursor += world.skeleton(i).num_dofs();
    }
    offsets
}

/// Map a world DOF to `(skeleton index, local dof)`. Panics when out of range.
#[must_use]
pub fn locate_dof<W: DifferentiableWorld + ?Sized>(world: &W, dof: usize) -> (usize, usize) {
    let mut cursor = 0;
    for i in 0..world.num_skeletons() {
        let n = world.skeleton(i).num_dofs();
        if dof < cursor + n {
            return (i, dof - cursor);
        }
        cursor += n;
    }
    panic!("dof {dof} out of range for a world with {cursor} dofs");
}

/// Concatenate a per-skeleton vector over the whole world.
pub fn concat_skeletons<W, F>(world: &W, f: F) -> DVector<f64>
where
    W: DifferentiableWorld + ?Sized,
    F: Fn(&W::Skeleton) -> DVector<f64>,
{
    let mut out = DVector::zeros(world.num_dofs());
    let mut cursor = 0;
    for i in 0..world.num_skeletons() {
        let v = f(world.skeleton(i));
        out.rows_mut(cursor, v.len()).copy_from(&v);
        cursor += v.len();
    }
    out
}

/// Block-diagonal concatenation of a per-skeleton square matrix.
pub fn block_diagonal_over_skeletons<W, F>(world: &W, f: F) -> DMatrix<f64>
where
    W: DifferentiableWorld + ?Sized,
    F: Fn(&W::Skeleton) -> DMatrix<f64>,
{
    let n = world.num_dofs();
    let mut out = DMatrix::zeros(n, n);
    let mut cursor = 0;
    for i in 0..world.num_skeletons() {
        let skel = world.skeleton(i);
        let k = skel.num_dofs();
        if k > 0 {
            out.view_mut((cursor, cursor), (k, k)).copy_from(&f(skel));
        }
        cursor += k;
    }
    out
}

/// `M^-1 * x` for the whole world, skeleton by skeleton.
#[must_use]
pub fn multiply_by_world_inv_mass<W: DifferentiableWorld + ?Sized>(
    world: &W,
    x: &DVector<f64>,
) -> DVector<f64> {
    assert_eq!(x.len(), world.num_dofs(), "expected one entry per world DOF");
    let mut out = DVector::zeros(x.len());
    let mut cursor = 0;
    for i in 0..world.num_skeletons() {
        let skel = world.skeleton(i);
        let k = skel.num_dofs();
        if k > 0 {
            let segment = x.rows(cursor, k).into_owned();
            out.rows_mut(cursor, k)
                .copy_from(&skel.multiply_by_inv_mass(&segment));
        }
        cursor += k;
    }
    out
}

// ============================================================================
// With-respect-to targets
// ============================================================================

/// Length of the differentiation vector for a target.
#[must_use]
pub fn wrt_dim<W: DifferentiableWorld + ?Sized>(world: &W, wrt: WithRespectTo) -> usize {
    match wrt {
        WithRespectTo::Position => world.num_dofs(),
        WithRespectTo::LinkMasses => world.link_masses().len(),
        WithRespectTo::LinkComs => world.link_coms().len(),
        WithRespectTo::LinkMois => world.link_mois().len(),
    }
}

/// Current value of a differentiation target.
#[must_use]
pub fn wrt_values<W: DifferentiableWorld + ?Sized>(world: &W, wrt: WithRespectTo) -> DVector<f64> {
    match wrt {
        WithRespectTo::Position => world.positions(),
        WithRespectTo::LinkMasses => world.link_masses(),
        WithRespectTo::LinkComs => world.link_coms(),
        WithRespectTo::LinkMois => world.link_mois(),
    }
}

/// Overwrite a differentiation target.
pub fn set_wrt_values<W: DifferentiableWorld + ?Sized>(
    world: &mut W,
    wrt: WithRespectTo,
    values: &DVector<f64>,
) {
    match wrt {
        WithRespectTo::Position => world.set_positions(values),
        WithRespectTo::LinkMasses => world.set_link_masses(values),
        WithRespectTo::LinkComs => world.set_link_coms(values),
        WithRespectTo::LinkMois => world.set_link_mois(values),
    }
}
