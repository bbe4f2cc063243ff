//! The analytic step Jacobians.

use nalgebra::{DMatrix, DVector};
use sim_types::{GradientStrategy, WithRespectTo};

use super::{Evaluation, StepGradientSnapshot};
use crate::projection::pos_pos_from_bounces;
use crate::world::DifferentiableWorld;

impl StepGradientSnapshot {
    /// `P_c` over the world (clamping columns × DOFs).
    ///
    /// [`Evaluation::PreStep`] uses the measured mass-weighted columns.
    /// [`Evaluation::Current`] recomputes them from the inverse mass matrix at
    /// the world's current state, holding `A_c` fixed.
    #[must_use]
    pub fn projection_into_clamps_matrix<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        eval: Evaluation,
    ) -> DMatrix<f64> {
        if self.num_clamping == 0 {
            return DMatrix::zeros(0, self.num_dofs);
        }
        let blocks = self.constraint_blocks();
        match eval {
            Evaluation::PreStep => blocks.projection_into_clamps(self.time_step, None),
            Evaluation::Current => {
                let minv = self.inv_mass_matrix(world, Evaluation::Current);
                blocks.projection_into_clamps(self.time_step, Some(&minv))
            }
        }
    }

    fn force_vel_with<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        strategy: GradientStrategy,
    ) -> DMatrix<f64> {
        let minv = self.inv_mass_matrix(world, Evaluation::PreStep);
        self.constraint_blocks()
            .force_vel_jacobian(strategy, self.time_step, &minv)
    }

    fn vel_vel_with<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        strategy: GradientStrategy,
    ) -> DMatrix<f64> {
        let mass = self.mass_matrix(world, Evaluation::PreStep);
        let minv = self.inv_mass_matrix(world, Evaluation::PreStep);
        let vel_c = self.vel_c_jacobian(world, Evaluation::PreStep);
        self.constraint_blocks()
            .vel_vel_jacobian(strategy, self.time_step, &mass, &minv, &vel_c)
    }

    /// `dv⁺/dτ`: `dt·M^-1` without clamping constraints, otherwise
    /// `dt·M^-1·(I - dt·(A_c + A_ub·E)·P_c·M^-1)` under the configured strategy.
    #[must_use]
    pub fn force_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) -> DMatrix<f64> {
        self.force_vel_with(world, self.config.strategy)
    }

    /// `dv⁺/dv`: `I - dt·M^-1·(A_c + A_ub·E)·P_c - forceVel·dC/dv` under the
    /// configured strategy.
    #[must_use]
    pub fn vel_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) -> DMatrix<f64> {
        self.vel_vel_with(world, self.config.strategy)
    }

    /// Force-velocity Jacobian through the mass-weighted projection `X_c`.
    #[must_use]
    pub fn massed_force_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) -> DMatrix<f64> {
        self.force_vel_with(world, GradientStrategy::Massed)
    }

    /// Velocity-velocity Jacobian through the mass-weighted projection `X_c`.
    #[must_use]
    pub fn massed_vel_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) -> DMatrix<f64> {
        self.vel_vel_with(world, GradientStrategy::Massed)
    }

    /// `dv⁺/dq`.
    #[must_use]
    pub fn pos_vel_jacobian<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) -> DMatrix<f64> {
        self.vel_jacobian_wrt(world, WithRespectTo::Position)
    }

    /// `dq⁺/dq`: identity without bounces, otherwise the closest matrix to the
    /// identity that reflects every bouncing direction by its restitution.
    #[must_use]
    pub fn pos_pos_jacobian(&self) -> DMatrix<f64> {
        pos_pos_from_bounces(
            self.num_dofs,
            &self.bouncing_matrix(),
            &self.restitution_diagonals(),
        )
    }

    /// `dq⁺/dv = dt · posPos`.
    #[must_use]
    pub fn vel_pos_jacobian(&self) -> DMatrix<f64> {
        self.pos_pos_jacobian() * self.time_step
    }

    /// Next velocity predicted by the linearized step at the world's current state:
    /// `v + dt·M^-1·(τ - C - (A_c + A_ub·E)·P_c·v*)` with `v* = v + dt·M^-1·(τ - C)`.
    #[must_use]
    pub fn analytical_next_velocity<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) -> DVector<f64> {
        let dt = self.time_step;
        let minv = self.inv_mass_matrix(world, Evaluation::Current);
        let projection = self.projection_into_clamps_matrix(world, Evaluation::Current);
        let v = world.velocities();
        let free_force = world.forces() - world.coriolis_and_gravity_forces();
        let inner_v = &v + &minv * &free_force * dt;
        let constraint_force = self.constraint_blocks().effective_clamping() * (projection * inner_v);
        v + minv * (free_force - constraint_force) * dt
    }
}
