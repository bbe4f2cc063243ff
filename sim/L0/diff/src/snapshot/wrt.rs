//! Derivatives of the step with respect to positions or link inertial parameters.
//!
//! `dM^-1/dwrt` and `dC/dwrt` come from finite differences over the
//! differentiation target. The derivative of the clamp projection is analytic
//! given `dM^-1/dwrt`, holding the constraint matrices fixed.

use nalgebra::{DMatrix, DVector};
use sim_types::WithRespectTo;

use super::{Evaluation, StepGradientSnapshot};
use crate::linalg::pseudo_inverse;
use crate::restore::StateGuard;
use crate::world::{
    DifferentiableWorld, multiply_by_world_inv_mass, set_wrt_values, wrt_dim, wrt_values,
};

impl StepGradientSnapshot {
    /// `d(M^-1 · tau)/dwrt` at the world's current state, by central differences.
    #[must_use]
    pub fn jacobian_of_minv<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        tau: &DVector<f64>,
        wrt: WithRespectTo,
    ) -> DMatrix<f64> {
        let eps = self.config.finite_difference.wrt_eps;
        let dim = wrt_dim(&*world, wrt);
        let mut guard = StateGuard::new(world);
        let before = wrt_values(&*guard, wrt);
        let mut result = DMatrix::zeros(tau.len(), dim);
        for i in 0..dim {
            let mut perturbed = before.clone();
            perturbed[i] += eps;
            set_wrt_values(&mut *guard, wrt, &perturbed);
            let plus = multiply_by_world_inv_mass(&*guard, tau);
            perturbed[i] = before[i] - eps;
            set_wrt_values(&mut *guard, wrt, &perturbed);
            let minus = multiply_by_world_inv_mass(&*guard, tau);
            result.set_column(i, &((plus - minus) / (2.0 * eps)));
        }
        result
    }

    /// `dC/dwrt` at the world's current state, by forward differences.
    #[must_use]
    pub fn jacobian_of_c<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        wrt: WithRespectTo,
    ) -> DMatrix<f64> {
        let eps = self.config.finite_difference.coriolis_eps;
        let dim = wrt_dim(&*world, wrt);
        let mut guard = StateGuard::new(world);
        let before = wrt_values(&*guard, wrt);
        let baseline = guard.coriolis_and_gravity_forces();
        let mut result = DMatrix::zeros(baseline.len(), dim);
        for i in 0..dim {
            let mut perturbed = before.clone();
            perturbed[i] += eps;
            set_wrt_values(&mut *guard, wrt, &perturbed);
            let diff = guard.coriolis_and_gravity_forces() - &baseline;
            result.set_column(i, &(diff / eps));
        }
        result
    }

    /// `d(P_c · v)/dwrt`, analytic in `dM^-1/dwrt`.
    ///
    /// With `Q = A_cᵀ·(V_c + V_ub·E)` and
    /// `tau = (A_c + A_ub·E)·pinv(Q)·diag(B)·A_cᵀ·v`, this is
    /// `-(1/dt)·pinv(Q)·A_cᵀ·d(M^-1·tau)/dwrt`.
    #[must_use]
    pub fn jacobian_of_projection_into_clamps<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        v: &DVector<f64>,
        wrt: WithRespectTo,
    ) -> DMatrix<f64> {
        let dim = wrt_dim(&*world, wrt);
        if self.num_clamping == 0 {
            return DMatrix::zeros(0, dim);
        }
        let blocks = self.constraint_blocks();
        let q_inv = pseudo_inverse(&blocks.force_to_velocity(None));
        let a_c_t = blocks.clamping.transpose();
        let bounced = (&a_c_t * v).component_mul(&blocks.bounce_diagonals);
        let tau = blocks.effective_clamping() * (&q_inv * bounced);
        let minv_jacobian = self.jacobian_of_minv(world, &tau, wrt);
        -(q_inv * a_c_t * minv_jacobian) / self.time_step
    }

    /// [`Self::jacobian_of_projection_into_clamps`] by central differences of
    /// the [`Evaluation::Current`] projection.
    #[must_use]
    pub fn fd_jacobian_of_projection_into_clamps<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        v: &DVector<f64>,
        wrt: WithRespectTo,
    ) -> DMatrix<f64> {
        let eps = self.config.finite_difference.projection_eps;
        let dim = wrt_dim(&*world, wrt);
        let mut guard = StateGuard::new(world);
        let before = wrt_values(&*guard, wrt);
        let mut result = DMatrix::zeros(self.num_clamping, dim);
        for i in 0..dim {
            let mut perturbed = before.clone();
            perturbed[i] += eps;
            set_wrt_values(&mut *guard, wrt, &perturbed);
            let plus = self.projection_into_clamps_matrix(&mut *guard, Evaluation::Current) * v;
            perturbed[i] = before[i] - eps;
            set_wrt_values(&mut *guard, wrt, &perturbed);
            let minus = self.projection_into_clamps_matrix(&mut *guard, Evaluation::Current) * v;
            result.set_column(i, &((plus - minus) / (2.0 * eps)));
        }
        result
    }

    /// `dv⁺/dwrt` evaluated at the pre-step state.
    ///
    /// `dt·(dM^-1/dwrt·τ_out + M^-1·(-dC/dwrt - (A_c + A_ub·E)·(dP_c/dwrt
    /// + P_c·dt·(dM^-1/dwrt·(τ - C) - M^-1·dC/dwrt))))`, where `v*` is the
    /// unconstrained predicted velocity and `τ_out = τ - C - (A_c + A_ub·E)·P_c·v*`.
    #[must_use]
    pub fn vel_jacobian_wrt<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        wrt: WithRespectTo,
    ) -> DMatrix<f64> {
        let dt = self.time_step;
        self.at_pre_step(world, |w| {
            let free_force = w.forces() - w.coriolis_and_gravity_forces();
            let d_minv = self.jacobian_of_minv(w, &free_force, wrt);
            let minv = self.inv_mass_matrix(w, Evaluation::Current);
            let d_c = self.jacobian_of_c(w, wrt);
            let inner_v = w.velocities() + &minv * &free_force * dt;

            let d_projection = self.jacobian_of_projection_into_clamps(w, &inner_v, wrt);
            let projection = self.projection_into_clamps_matrix(w, Evaluation::PreStep);
            let effective = self.constraint_blocks().effective_clamping();

            let outer_tau = &free_force - &effective * (&projection * &inner_v);
            let d_outer_minv = self.jacobian_of_minv(w, &outer_tau, wrt);

            let minv_d_c = &minv * &d_c;
            let inner = d_projection + projection * (d_minv - &minv_d_c) * dt;
            (d_outer_minv + &minv * (-d_c - effective * inner)) * dt
        })
    }
}
