//! Constraint matrices for one group of skeletons coupled by active constraints.
//!
//! The constraint solver builds one [`ConstraintGroupMatrices`] per group in
//! two phases:
//!
//! 1. **Measurement** - for every constraint dimension, apply a unit impulse
//!    and record both the generalized impulse and the velocity change it
//!    produced ([`ConstraintGroupMatrices::measure_impulse`]).
//! 2. **Finalization** - hand over the LCP solution and its bounds. Every
//!    dimension is classified once, and the recorded tests are scattered into
//!    the clamping, upper-bound and bouncing matrices
//!    ([`ConstraintGroupMatrices::finalize`]).
//!
//! Calling the phases out of order is a contract violation and panics.

use nalgebra::{DMatrix, DVector};
use sim_types::{GradientStrategy, LossGradient};
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::contact::ConstraintKey;
use crate::contact_gradient::ContactGradient;
use crate::linalg::hstack;
use crate::projection::{ConstraintBlocks, pos_pos_from_bounces};
use crate::world::{DifferentiableWorld, Skeleton};

/// A member skeleton and the number of DOFs it contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupSkeleton {
    /// Skeleton name.
    pub name: String,
    /// DOF count.
    pub num_dofs: usize,
}

impl GroupSkeleton {
    /// Create a member entry.
    #[must_use]
    pub fn new(name: impl Into<String>, num_dofs: usize) -> Self {
        Self {
            name: name.into(),
            num_dofs,
        }
    }
}

/// Response of the group to a unit impulse along one constraint dimension.
///
/// Both vectors are concatenated over the group's skeletons in member order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseTest {
    /// Generalized impulse `Jᵀ` applied by the unit impulse.
    pub impulse: DVector<f64>,
    /// Resulting velocity change, `M^-1 · impulse`.
    pub velocity_change: DVector<f64>,
}

/// One constraint dimension as the solver saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDimension {
    /// Geometry and analytic derivatives.
    pub gradient: ContactGradient,
    /// Combined restitution coefficient.
    pub restitution: f64,
    /// Whether the solver targeted a rebound velocity for this dimension.
    pub bouncing: bool,
    /// Extra separating velocity requested to resolve penetration.
    pub penetration_correction_velocity: f64,
}

/// Classification of a constraint dimension after the LCP solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintMapping {
    /// Active with an impulse strictly inside its bounds.
    Clamping,
    /// Pinned to a bound that scales with the clamping dimension `friction_index`.
    UpperBound {
        /// Dimension whose impulse sets the bound.
        friction_index: usize,
    },
    /// Pinned to a bound that does not follow a clamping dimension.
    NotClamping,
    /// Carries no impulse.
    Irrelevant,
}

/// Constraint matrices for one constrained group.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintGroupMatrices {
    skeletons: Vec<GroupSkeleton>,
    skeleton_offsets: Vec<usize>,
    num_dofs: usize,
    time_step: f64,
    strategy: GradientStrategy,
    dimensions: Vec<Option<ConstraintDimension>>,
    impulse_tests: Vec<Option<ImpulseTest>>,
    finalized: bool,

    blocks: ConstraintBlocks,
    bouncing: DMatrix<f64>,
    restitution_diagonals: DVector<f64>,
    contact_impulses: DVector<f64>,
    mappings: Vec<ConstraintMapping>,
    penetration_correction_velocities: DVector<f64>,
    clamping_constraints: Vec<ContactGradient>,
    upper_bound_constraints: Vec<ContactGradient>,
}

impl ConstraintGroupMatrices {
    /// Start measuring a group of `skeletons` with `num_constraint_dims` dimensions.
    #[must_use]
    pub fn new(
        skeletons: Vec<GroupSkeleton>,
        num_constraint_dims: usize,
        time_step: f64,
        strategy: GradientStrategy,
    ) -> Self {
        assert!(!skeletons.is_empty(), "a constraint group needs at least one skeleton");
        let mut skeleton_offsets = Vec::with_capacity(skeletons.len());
        let mut num_dofs = 0;
        for skel in &skeletons {
            skeleton_offsets.push(num_dofs);
            num_dofs += skel.num_dofs;
        }
        Self {
            skeletons,
            skeleton_offsets,
            num_dofs,
            time_step,
            strategy,
            dimensions: vec![None; num_constraint_dims],
            impulse_tests: vec![None; num_constraint_dims],
            finalized: false,
            blocks: ConstraintBlocks::empty(num_dofs),
            bouncing: DMatrix::zeros(num_dofs, 0),
            restitution_diagonals: DVector::zeros(0),
            contact_impulses: DVector::zeros(0),
            mappings: Vec::new(),
            penetration_correction_velocities: DVector::zeros(0),
            clamping_constraints: Vec::new(),
            upper_bound_constraints: Vec::new(),
        }
    }

    // ========================================================================
    // Measurement and finalization
    // ========================================================================

    /// Record the unit-impulse response of dimension `index`.
    ///
    /// # Panics
    ///
    /// After [`Self::finalize`], when `index` was already measured, or when
    /// the test vectors do not have one entry per group DOF.
    pub fn measure_impulse(&mut self, index: usize, dimension: ConstraintDimension, test: ImpulseTest) {
        assert!(!self.finalized, "cannot measure impulses after finalization");
        assert!(
            index < self.impulse_tests.len(),
            "constraint dimension {index} out of range"
        );
        assert!(
            self.impulse_tests[index].is_none(),
            "constraint dimension {index} measured twice"
        );
        assert_eq!(test.impulse.len(), self.num_dofs, "impulse needs one entry per group DOF");
        assert_eq!(
            test.velocity_change.len(),
            self.num_dofs,
            "velocity change needs one entry per group DOF"
        );
        self.dimensions[index] = Some(dimension);
        self.impulse_tests[index] = Some(test);
    }

    /// Classify every dimension from the LCP solution and build the matrices.
    ///
    /// `hi` and `lo` are the solver's bounds. For a dimension with a friction
    /// index `f` they are coefficients scaled by `impulses[f]`. Impulses with
    /// magnitude below `clamping_threshold` are irrelevant, and so is "at a
    /// bound" within the same threshold.
    ///
    /// # Panics
    ///
    /// When called twice, when any dimension was not measured, or when the
    /// slices do not have one entry per dimension.
    pub fn finalize(
        &mut self,
        impulses: &DVector<f64>,
        hi: &DVector<f64>,
        lo: &DVector<f64>,
        friction_index: &[Option<usize>],
        clamping_threshold: f64,
    ) {
        assert!(!self.finalized, "constraint group finalized twice");
        let dims = self.num_constraint_dims();
        assert!(
            self.impulse_tests.iter().all(Option::is_some),
            "every constraint dimension must be measured before finalization"
        );
        assert_eq!(impulses.len(), dims, "one impulse per constraint dimension");
        assert_eq!(hi.len(), dims, "one upper bound per constraint dimension");
        assert_eq!(lo.len(), dims, "one lower bound per constraint dimension");
        assert_eq!(friction_index.len(), dims, "one friction index per constraint dimension");

        // First pass: interior impulses clamp, bounded ones are settled below.
        let mut mappings = vec![ConstraintMapping::Irrelevant; dims];
        let mut bound_scale = vec![0.0; dims];
        for j in 0..dims {
            let x = impulses[j];
            if x.abs() < clamping_threshold {
                continue;
            }
            let scale = friction_index[j].map_or(1.0, |f| impulses[f]);
            let (upper, lower) = (hi[j] * scale, lo[j] * scale);
            if (x - upper).abs() < clamping_threshold {
                mappings[j] = ConstraintMapping::NotClamping;
                bound_scale[j] = hi[j];
            } else if (x - lower).abs() < clamping_threshold {
                mappings[j] = ConstraintMapping::NotClamping;
                bound_scale[j] = lo[j];
            } else {
                mappings[j] = ConstraintMapping::Clamping;
            }
        }
        for j in 0..dims {
            if let (ConstraintMapping::NotClamping, Some(f)) = (mappings[j], friction_index[j]) {
                if mappings[f] == ConstraintMapping::Clamping {
                    mappings[j] = ConstraintMapping::UpperBound { friction_index: f };
                }
            }
            trace!(dimension = j, impulse = impulses[j], mapping = ?mappings[j], "classified constraint dimension");
        }

        let mut clamping_columns = Vec::new();
        let mut massed_clamping_columns = Vec::new();
        let mut upper_bound_columns = Vec::new();
        let mut massed_upper_bound_columns = Vec::new();
        let mut bouncing_columns = Vec::new();
        let mut clamp_column_of = vec![None; dims];
        let mut bounce = Vec::new();
        let mut restitution = Vec::new();
        let mut penetration = Vec::new();
        let mut clamping_constraints = Vec::new();
        let mut upper_bound_constraints = Vec::new();

        let measured = self.dimensions.iter().zip(&self.impulse_tests).enumerate();
        for (j, (dimension, test)) in measured {
            let (Some(dimension), Some(test)) = (dimension, test) else {
                continue;
            };
            match mappings[j] {
                ConstraintMapping::Clamping => {
                    clamp_column_of[j] = Some(clamping_columns.len());
                    clamping_columns.push(test.impulse.clone());
                    massed_clamping_columns.push(test.velocity_change.clone());
                    if dimension.bouncing {
                        bounce.push(1.0 + dimension.restitution);
                        restitution.push(dimension.restitution);
                        bouncing_columns.push(test.impulse.clone());
                    } else {
                        bounce.push(1.0);
                    }
                    penetration.push(dimension.penetration_correction_velocity);
                    clamping_constraints.push(dimension.gradient.clone());
                }
                ConstraintMapping::UpperBound { .. } => {
                    upper_bound_columns.push(test.impulse.clone());
                    massed_upper_bound_columns.push(test.velocity_change.clone());
                    upper_bound_constraints.push(dimension.gradient.clone());
                }
                ConstraintMapping::NotClamping | ConstraintMapping::Irrelevant => {}
            }
        }

        let mut mapping = DMatrix::zeros(upper_bound_columns.len(), clamping_columns.len());
        let mut ub_row = 0;
        for j in 0..dims {
            if let ConstraintMapping::UpperBound { friction_index: f } = mappings[j] {
                if let Some(col) = clamp_column_of[f] {
                    mapping[(ub_row, col)] = bound_scale[j];
                }
                ub_row += 1;
            }
        }

        let n = self.num_dofs;
        self.blocks = ConstraintBlocks {
            clamping: column_matrix(n, &clamping_columns),
            upper_bound: column_matrix(n, &upper_bound_columns),
            mapping,
            massed_clamping: column_matrix(n, &massed_clamping_columns),
            massed_upper_bound: column_matrix(n, &massed_upper_bound_columns),
            bounce_diagonals: DVector::from_vec(bounce),
        };
        self.bouncing = column_matrix(n, &bouncing_columns);
        self.restitution_diagonals = DVector::from_vec(restitution);
        self.penetration_correction_velocities = DVector::from_vec(penetration);
        self.contact_impulses = impulses.clone();
        self.mappings = mappings;
        self.clamping_constraints = clamping_constraints;
        self.upper_bound_constraints = upper_bound_constraints;
        self.finalized = true;
    }

    /// Give every clamping and upper-bound constraint its world column key.
    pub(crate) fn assign_keys(&mut self, clamping_offset: usize, upper_bound_offset: usize) {
        for (k, c) in self.clamping_constraints.iter_mut().enumerate() {
            c.set_key(ConstraintKey::clamping(clamping_offset + k));
        }
        for (k, c) in self.upper_bound_constraints.iter_mut().enumerate() {
            c.set_key(ConstraintKey::upper_bound(upper_bound_offset + k));
        }
    }

    fn assert_finalized(&self) {
        assert!(self.finalized, "constraint group used before finalization");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Whether [`Self::finalize`] has run.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Member skeletons in group order.
    #[must_use]
    pub fn skeletons(&self) -> &[GroupSkeleton] {
        &self.skeletons
    }

    /// Offset of a member skeleton within the group's DOF vector.
    #[must_use]
    pub fn skeleton_offset(&self, name: &str) -> Option<usize> {
        self.skeletons
            .iter()
            .position(|s| s.name == name)
            .map(|i| self.skeleton_offsets[i])
    }

    /// Whether `name` is a member.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.skeletons.iter().any(|s| s.name == name)
    }

    /// Total DOFs over the members.
    #[must_use]
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    /// Constraint dimensions, classified or not.
    #[must_use]
    pub fn num_constraint_dims(&self) -> usize {
        self.impulse_tests.len()
    }

    /// Clamping columns.
    #[must_use]
    pub fn num_clamping(&self) -> usize {
        self.blocks.num_clamping()
    }

    /// Upper-bound columns.
    #[must_use]
    pub fn num_upper_bound(&self) -> usize {
        self.blocks.num_upper_bound()
    }

    /// Bouncing columns.
    #[must_use]
    pub fn num_bouncing(&self) -> usize {
        self.bouncing.ncols()
    }

    /// Step length the group was solved with.
    #[must_use]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Formulas used for this group's Jacobians.
    #[must_use]
    pub fn strategy(&self) -> GradientStrategy {
        self.strategy
    }

    /// All matrices bundled for the projection formulas.
    #[must_use]
    pub fn blocks(&self) -> &ConstraintBlocks {
        self.assert_finalized();
        &self.blocks
    }

    /// `A_c`.
    #[must_use]
    pub fn clamping_matrix(&self) -> &DMatrix<f64> {
        &self.blocks().clamping
    }

    /// `V_c = M^-1 · A_c`.
    #[must_use]
    pub fn massed_clamping_matrix(&self) -> &DMatrix<f64> {
        &self.blocks().massed_clamping
    }

    /// `A_ub`.
    #[must_use]
    pub fn upper_bound_matrix(&self) -> &DMatrix<f64> {
        &self.blocks().upper_bound
    }

    /// `V_ub = M^-1 · A_ub`.
    #[must_use]
    pub fn massed_upper_bound_matrix(&self) -> &DMatrix<f64> {
        &self.blocks().massed_upper_bound
    }

    /// `E`, one row per upper-bound column and one column per clamping column.
    #[must_use]
    pub fn upper_bound_mapping_matrix(&self) -> &DMatrix<f64> {
        &self.blocks().mapping
    }

    /// Clamping columns of bouncing dimensions.
    #[must_use]
    pub fn bouncing_matrix(&self) -> &DMatrix<f64> {
        self.assert_finalized();
        &self.bouncing
    }

    /// One entry per clamping column: `1 + e` when bouncing, else `1`.
    #[must_use]
    pub fn bounce_diagonals(&self) -> &DVector<f64> {
        &self.blocks().bounce_diagonals
    }

    /// Restitution of each bouncing column.
    #[must_use]
    pub fn restitution_diagonals(&self) -> &DVector<f64> {
        self.assert_finalized();
        &self.restitution_diagonals
    }

    /// The LCP solution the group was finalized with.
    #[must_use]
    pub fn contact_impulses(&self) -> &DVector<f64> {
        self.assert_finalized();
        &self.contact_impulses
    }

    /// Classification of every dimension.
    #[must_use]
    pub fn mappings(&self) -> &[ConstraintMapping] {
        self.assert_finalized();
        &self.mappings
    }

    /// Penetration-correction velocity of each clamping column.
    #[must_use]
    pub fn penetration_correction_velocities(&self) -> &DVector<f64> {
        self.assert_finalized();
        &self.penetration_correction_velocities
    }

    /// Gradients of the clamping columns, in column order.
    #[must_use]
    pub fn clamping_constraints(&self) -> &[ContactGradient] {
        self.assert_finalized();
        &self.clamping_constraints
    }

    /// Gradients of the upper-bound columns, in column order.
    #[must_use]
    pub fn upper_bound_constraints(&self) -> &[ContactGradient] {
        self.assert_finalized();
        &self.upper_bound_constraints
    }

    // ========================================================================
    // Group Jacobians (evaluated at the world's current state)
    // ========================================================================

    fn block_diagonal<W, F>(&self, world: &W, f: F) -> DMatrix<f64>
    where
        W: DifferentiableWorld + ?Sized,
        F: Fn(&W::Skeleton) -> DMatrix<f64>,
    {
        let mut out = DMatrix::zeros(self.num_dofs, self.num_dofs);
        for (member, &offset) in self.skeletons.iter().zip(&self.skeleton_offsets) {
            let index = world
                .skeleton_index(&member.name)
                .unwrap_or_else(|| panic!("group skeleton {} is not in the world", member.name));
            let k = member.num_dofs;
            if k > 0 {
                out.view_mut((offset, offset), (k, k))
                    .copy_from(&f(world.skeleton(index)));
            }
        }
        out
    }

    /// Block-diagonal mass matrix of the members.
    #[must_use]
    pub fn mass_matrix<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        self.block_diagonal(world, |s| s.mass_matrix())
    }

    /// Block-diagonal inverse mass matrix of the members.
    #[must_use]
    pub fn inv_mass_matrix<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        self.block_diagonal(world, |s| s.inv_mass_matrix())
    }

    /// Block-diagonal `dC/dq` of the members.
    #[must_use]
    pub fn pos_c_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        self.block_diagonal(world, |s| s.pos_c_jacobian())
    }

    /// Block-diagonal `dC/dv` of the members.
    #[must_use]
    pub fn vel_c_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        self.block_diagonal(world, |s| s.vel_c_jacobian())
    }

    /// `P_c` from the measured mass-weighted columns.
    #[must_use]
    pub fn projection_into_clamps_matrix(&self) -> DMatrix<f64> {
        self.blocks().projection_into_clamps(self.time_step, None)
    }

    /// `dv⁺/dτ` over the group's DOFs.
    #[must_use]
    pub fn force_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        let minv = self.inv_mass_matrix(world);
        self.blocks()
            .force_vel_jacobian(self.strategy, self.time_step, &minv)
    }

    /// `dv⁺/dv` over the group's DOFs.
    #[must_use]
    pub fn vel_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        let mass = self.mass_matrix(world);
        let minv = self.inv_mass_matrix(world);
        let vel_c = self.vel_c_jacobian(world);
        self.blocks()
            .vel_vel_jacobian(self.strategy, self.time_step, &mass, &minv, &vel_c)
    }

    /// `dv⁺/dq ≈ -forceVel · dC/dq`, holding the constraint matrices fixed.
    #[must_use]
    pub fn pos_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> DMatrix<f64> {
        -(self.force_vel_jacobian(world) * self.pos_c_jacobian(world))
    }

    /// `dq⁺/dq` from the bouncing columns.
    #[must_use]
    pub fn pos_pos_jacobian(&self) -> DMatrix<f64> {
        pos_pos_from_bounces(self.num_dofs, self.bouncing_matrix(), self.restitution_diagonals())
    }

    /// `dq⁺/dv = dt · posPos`.
    #[must_use]
    pub fn vel_pos_jacobian(&self) -> DMatrix<f64> {
        self.pos_pos_jacobian() * self.time_step
    }

    /// Pull a next-step loss gradient back through this group's step.
    ///
    /// The world must hold the pre-step state. Vectors are group-local.
    #[must_use]
    pub fn backprop<W: DifferentiableWorld + ?Sized>(&self, world: &W, next: &LossGradient) -> LossGradient {
        assert_eq!(next.dofs(), self.num_dofs, "loss gradient needs one entry per group DOF");
        let force_vel = self.force_vel_jacobian(world);
        let vel_vel = self.vel_vel_jacobian(world);
        let pos_vel = -(&force_vel * self.pos_c_jacobian(world));
        let pos_pos = self.pos_pos_jacobian();

        let lv = &next.loss_wrt_velocity;
        let lp = &next.loss_wrt_position;
        let torque = force_vel.tr_mul(lv);
        let position = pos_pos.tr_mul(lp) + pos_vel.tr_mul(lv);
        let velocity = vel_vel.tr_mul(lv) + &position * self.time_step;
        LossGradient {
            loss_wrt_position: position,
            loss_wrt_velocity: velocity,
            loss_wrt_torque: torque,
        }
    }
}

fn column_matrix(rows: usize, columns: &[DVector<f64>]) -> DMatrix<f64> {
    let blocks: Vec<DMatrix<f64>> = columns
        .iter()
        .map(|c| DMatrix::from_column_slice(rows, 1, c.as_slice()))
        .collect();
    hstack(rows, &blocks)
}
