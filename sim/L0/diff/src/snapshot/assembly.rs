//! World-sized matrices and vectors stitched together from the groups.
//!
//! Constraint matrices place each group's rows at its members' world DOF
//! offsets and concatenate columns group by group. Dynamics matrices are
//! block-diagonal over skeletons.

use nalgebra::{DMatrix, DVector};

use super::{Evaluation, StepGradientSnapshot};
use crate::contact::{ConstraintKey, ConstraintRole};
use crate::contact_gradient::ContactGradient;
use crate::group::{ConstraintGroupMatrices, ConstraintMapping};
use crate::linalg::{block_diagonal, vstack};
use crate::projection::ConstraintBlocks;
use crate::world::{DifferentiableWorld, Skeleton, block_diagonal_over_skeletons};

impl StepGradientSnapshot {
    fn assemble_matrix<F>(&self, num_cols: usize, pick: F) -> DMatrix<f64>
    where
        F: Fn(&ConstraintGroupMatrices) -> &DMatrix<f64>,
    {
        let mut matrix = DMatrix::zeros(self.num_dofs, num_cols);
        let mut column = 0;
        for group in &self.groups {
            let block = pick(group);
            let cols = block.ncols();
            if cols > 0 {
                for member in group.skeletons() {
                    let (Some(world_row), Some(group_row)) = (
                        self.skeleton_offset(&member.name),
                        group.skeleton_offset(&member.name),
                    ) else {
                        continue;
                    };
                    matrix
                        .view_mut((world_row, column), (member.num_dofs, cols))
                        .copy_from(&block.view((group_row, 0), (member.num_dofs, cols)));
                }
            }
            column += cols;
        }
        matrix
    }

    /// `A_c` over the world (DOFs × clamping columns).
    #[must_use]
    pub fn clamping_matrix(&self) -> DMatrix<f64> {
        self.assemble_matrix(self.num_clamping, ConstraintGroupMatrices::clamping_matrix)
    }

    /// `V_c` over the world.
    #[must_use]
    pub fn massed_clamping_matrix(&self) -> DMatrix<f64> {
        self.assemble_matrix(self.num_clamping, ConstraintGroupMatrices::massed_clamping_matrix)
    }

    /// `A_ub` over the world (DOFs × upper-bound columns).
    #[must_use]
    pub fn upper_bound_matrix(&self) -> DMatrix<f64> {
        self.assemble_matrix(self.num_upper_bound, ConstraintGroupMatrices::upper_bound_matrix)
    }

    /// `V_ub` over the world.
    #[must_use]
    pub fn massed_upper_bound_matrix(&self) -> DMatrix<f64> {
        self.assemble_matrix(
            self.num_upper_bound,
            ConstraintGroupMatrices::massed_upper_bound_matrix,
        )
    }

    /// Bouncing columns over the world.
    #[must_use]
    pub fn bouncing_matrix(&self) -> DMatrix<f64> {
        self.assemble_matrix(self.num_bouncing, ConstraintGroupMatrices::bouncing_matrix)
    }

    /// `E` over the world: block-diagonal over groups.
    #[must_use]
    pub fn upper_bound_mapping_matrix(&self) -> DMatrix<f64> {
        let blocks: Vec<DMatrix<f64>> = self
            .groups
            .iter()
            .map(|g| g.upper_bound_mapping_matrix().clone())
            .collect();
        let mapping = block_diagonal(&blocks);
        debug_assert_eq!(mapping.shape(), (self.num_upper_bound, self.num_clamping));
        mapping
    }

    /// Every world-level constraint matrix, bundled for the projection formulas.
    #[must_use]
    pub fn constraint_blocks(&self) -> ConstraintBlocks {
        ConstraintBlocks {
            clamping: self.clamping_matrix(),
            upper_bound: self.upper_bound_matrix(),
            mapping: self.upper_bound_mapping_matrix(),
            massed_clamping: self.massed_clamping_matrix(),
            massed_upper_bound: self.massed_upper_bound_matrix(),
            bounce_diagonals: self.bounce_diagonals(),
        }
    }

    // ========================================================================
    // Dynamics, block-diagonal over skeletons
    // ========================================================================

    fn block_diagonal_at<W, F>(&self, world: &mut W, eval: Evaluation, f: F) -> DMatrix<f64>
    where
        W: DifferentiableWorld + ?Sized,
        F: Fn(&W::Skeleton) -> DMatrix<f64>,
    {
        match eval {
            Evaluation::PreStep => {
                self.at_pre_step(world, |w| block_diagonal_over_skeletons(&*w, &f))
            }
            Evaluation::Current => block_diagonal_over_skeletons(&*world, f),
        }
    }

    /// World mass matrix.
    #[must_use]
    pub fn mass_matrix<W: DifferentiableWorld + ?Sized>(&self, world: &mut W, eval: Evaluation) -> DMatrix<f64> {
        self.block_diagonal_at(world, eval, |s| s.mass_matrix())
    }

    /// World inverse mass matrix.
    #[must_use]
    pub fn inv_mass_matrix<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        eval: Evaluation,
    ) -> DMatrix<f64> {
        self.block_diagonal_at(world, eval, |s| s.inv_mass_matrix())
    }

    /// World `dC/dq`.
    #[must_use]
    pub fn pos_c_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        eval: Evaluation,
    ) -> DMatrix<f64> {
        self.block_diagonal_at(world, eval, |s| s.pos_c_jacobian())
    }

    /// World `dC/dv`.
    #[must_use]
    pub fn vel_c_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        eval: Evaluation,
    ) -> DMatrix<f64> {
        self.block_diagonal_at(world, eval, |s| s.vel_c_jacobian())
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    fn assemble_vector<F>(&self, pick: F) -> DVector<f64>
    where
        F: Fn(&ConstraintGroupMatrices) -> &DVector<f64>,
    {
        let parts: Vec<DVector<f64>> = self.groups.iter().map(|g| pick(g).clone()).collect();
        vstack(&parts)
    }

    /// LCP solution of every constraint dimension, group by group.
    #[must_use]
    pub fn contact_impulses(&self) -> DVector<f64> {
        self.assemble_vector(ConstraintGroupMatrices::contact_impulses)
    }

    /// Classification of every constraint dimension, group by group.
    ///
    /// Friction indices refer to the assembled dimension order.
    #[must_use]
    pub fn contact_mappings(&self) -> Vec<ConstraintMapping> {
        let mut out = Vec::with_capacity(self.num_constraint_dims);
        let mut offset = 0;
        for group in &self.groups {
            out.extend(group.mappings().iter().map(|m| match *m {
                ConstraintMapping::UpperBound { friction_index } => ConstraintMapping::UpperBound {
                    friction_index: friction_index + offset,
                },
                other => other,
            }));
            offset += group.num_constraint_dims();
        }
        out
    }

    /// Bounce diagonal of every clamping column.
    #[must_use]
    pub fn bounce_diagonals(&self) -> DVector<f64> {
        self.assemble_vector(ConstraintGroupMatrices::bounce_diagonals)
    }

    /// Restitution of every bouncing column.
    #[must_use]
    pub fn restitution_diagonals(&self) -> DVector<f64> {
        self.assemble_vector(ConstraintGroupMatrices::restitution_diagonals)
    }

    /// Penetration-correction velocity of every clamping column.
    #[must_use]
    pub fn penetration_correction_velocities(&self) -> DVector<f64> {
        self.assemble_vector(ConstraintGroupMatrices::penetration_correction_velocities)
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Gradients of every clamping column, in world column order.
    #[must_use]
    pub fn clamping_constraints(&self) -> Vec<&ContactGradient> {
        self.groups
            .iter()
            .flat_map(|g| g.clamping_constraints().iter())
            .collect()
    }

    /// Gradients of every upper-bound column, in world column order.
    #[must_use]
    pub fn upper_bound_constraints(&self) -> Vec<&ContactGradient> {
        self.groups
            .iter()
            .flat_map(|g| g.upper_bound_constraints().iter())
            .collect()
    }

    /// The constraint occupying a world column.
    #[must_use]
    pub fn constraint(&self, key: ConstraintKey) -> Option<&ContactGradient> {
        let mut offset = key.offset;
        for group in &self.groups {
            let columns = match key.role {
                ConstraintRole::Clamping => group.clamping_constraints(),
                ConstraintRole::UpperBound => group.upper_bound_constraints(),
            };
            if offset < columns.len() {
                return Some(&columns[offset]);
            }
            offset -= columns.len();
        }
        None
    }
}
