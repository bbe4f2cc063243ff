//! Step Jacobians by re-running the world.
//!
//! Every routine rewinds the world to the pre-step state, perturbs one input,
//! steps with the solver's gradient and penetration-correction features off,
//! and central-differences the output. Position-output Jacobians split the
//! step into `subdivisions` shorter steps so that the perturbation stays large
//! compared with the motion of one sub-step.
//!
//! World state, timestep and solver flags are restored on every exit path.

use nalgebra::{DMatrix, DVector};
use sim_types::{Result, SolverFlags, WithRespectTo};
use tracing::warn;

use super::{StepGradientSnapshot, StepState};
use crate::restore::{ScopedSolverFlags, StateGuard};
use crate::world::{DifferentiableWorld, set_wrt_values, wrt_dim, wrt_values};

#[derive(Debug, Clone, Copy)]
struct Probe {
    eps: f64,
    steps: usize,
    time_step: f64,
}

impl StepGradientSnapshot {
    fn rollout<W, P>(&self, world: &mut W, steps: usize, perturb: P) -> Result<StepState>
    where
        W: DifferentiableWorld + ?Sized,
        P: FnOnce(&mut StepState),
    {
        let mut state = self.pre_step.clone();
        perturb(&mut state);
        state.apply(world);
        for _ in 0..steps {
            world.step()?;
        }
        Ok(StepState::capture(world))
    }

    fn central_difference<W, P, R>(&self, world: &mut W, probe: Probe, perturb: P, read: R) -> Result<DMatrix<f64>>
    where
        W: DifferentiableWorld + ?Sized,
        P: Fn(&mut StepState, usize, f64),
        R: Fn(StepState) -> DVector<f64>,
    {
        let mut guard = StateGuard::new(world);
        let mut scoped = ScopedSolverFlags::new(&mut *guard, SolverFlags::finite_differencing());
        scoped.set_time_step(probe.time_step);

        let n = self.num_dofs;
        let mut jacobian = DMatrix::zeros(n, n);
        for i in 0..n {
            let plus = read(self.rollout(&mut *scoped, probe.steps, |s| perturb(s, i, probe.eps))?);
            let minus = read(self.rollout(&mut *scoped, probe.steps, |s| perturb(s, i, -probe.eps))?);
            jacobian.set_column(i, &((plus - minus) / (2.0 * probe.eps)));
        }
        Ok(jacobian)
    }

    fn single_step(&self, eps: f64) -> Probe {
        Probe {
            eps,
            steps: 1,
            time_step: self.time_step,
        }
    }

    fn subdivided(&self, eps: f64) -> Probe {
        let steps = self.config.finite_difference.subdivisions;
        Probe {
            eps,
            steps,
            time_step: self.time_step / steps as f64,
        }
    }

    /// `dv⁺/dv` by finite differences.
    ///
    /// # Errors
    ///
    /// Propagates errors from stepping the world.
    pub fn finite_difference_vel_vel_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
    ) -> Result<DMatrix<f64>> {
        let probe = self.single_step(self.config.finite_difference.velocity_eps);
        self.central_difference(world, probe, |s, i, e| s.velocity[i] += e, |s| s.velocity)
    }

    /// `dv⁺/dτ` by finite differences.
    ///
    /// # Errors
    ///
    /// Propagates errors from stepping the world.
    pub fn finite_difference_force_vel_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
    ) -> Result<DMatrix<f64>> {
        let probe = self.single_step(self.config.finite_difference.force_eps);
        self.central_difference(world, probe, |s, i, e| s.torque[i] += e, |s| s.velocity)
    }

    /// `dq⁺/dq` by finite differences over subdivided steps.
    ///
    /// # Errors
    ///
    /// Propagates errors from stepping the world.
    pub fn finite_difference_pos_pos_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
    ) -> Result<DMatrix<f64>> {
        let probe = self.subdivided(self.config.finite_difference.pos_pos_eps());
        self.central_difference(world, probe, |s, i, e| s.position[i] += e, |s| s.position)
    }

    /// `dq⁺/dv` by finite differences over subdivided steps.
    ///
    /// # Errors
    ///
    /// Propagates errors from stepping the world.
    pub fn finite_difference_vel_pos_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
    ) -> Result<DMatrix<f64>> {
        let probe = self.subdivided(self.config.finite_difference.vel_pos_eps());
        self.central_difference(world, probe, |s, i, e| s.velocity[i] += e, |s| s.position)
    }

    /// `dv⁺/dq` by finite differences.
    ///
    /// Also checks the linearized step: before every probe step, the
    /// [analytical next velocity](Self::analytical_next_velocity) is compared
    /// with the stepped one, and disagreements beyond the diagnostic tolerance
    /// are logged as warnings.
    ///
    /// # Errors
    ///
    /// Propagates errors from stepping the world.
    pub fn finite_difference_pos_vel_jacobian<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
    ) -> Result<DMatrix<f64>> {
        let eps = self.config.finite_difference.position_eps;
        let tolerance = self.config.diagnostics.for_bounces(self.has_bounces());

        let mut guard = StateGuard::new(world);
        let mut scoped = ScopedSolverFlags::new(&mut *guard, SolverFlags::finite_differencing());
        scoped.set_time_step(self.time_step);

        self.checked_step(&mut *scoped, None, 0.0, tolerance)?;

        let n = self.num_dofs;
        let mut jacobian = DMatrix::zeros(n, n);
        for i in 0..n {
            let plus = self.checked_step(&mut *scoped, Some(i), eps, tolerance)?;
            let minus = self.checked_step(&mut *scoped, Some(i), -eps, tolerance)?;
            jacobian.set_column(i, &((plus - minus) / (2.0 * eps)));
        }
        Ok(jacobian)
    }

    /// Step from the pre-step state with `dof` moved by `eps`, warning when
    /// the linearized prediction disagrees with the result.
    fn checked_step<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        dof: Option<usize>,
        eps: f64,
        tolerance: f64,
    ) -> Result<DVector<f64>> {
        let mut state = self.pre_step.clone();
        if let Some(i) = dof {
            state.position[i] += eps;
        }
        state.apply(world);
        let predicted = self.analytical_next_velocity(world);
        world.step()?;
        let actual = world.velocities();

        let accel_error = ((&actual - &predicted) / self.time_step).norm_squared();
        if accel_error > tolerance {
            warn!(
                dof = ?dof,
                accel_error,
                tolerance,
                "analytical next velocity disagrees with the stepped world"
            );
        }
        Ok(actual)
    }

    /// `dv⁺/dwrt` by finite differences, for comparison with
    /// [`Self::vel_jacobian_wrt`].
    ///
    /// # Errors
    ///
    /// Propagates errors from stepping the world.
    pub fn finite_difference_vel_jacobian_wrt<W: DifferentiableWorld + ?Sized>(
        &self,
        world: &mut W,
        wrt: WithRespectTo,
    ) -> Result<DMatrix<f64>> {
        let eps = self.config.finite_difference.wrt_eps;
        let mut guard = StateGuard::new(world);
        let mut scoped = ScopedSolverFlags::new(&mut *guard, SolverFlags::finite_differencing());
        scoped.set_time_step(self.time_step);

        let dim = wrt_dim(&*scoped, wrt);
        let before = {
            self.pre_step.apply(&mut *scoped);
            wrt_values(&*scoped, wrt)
        };
        let mut jacobian = DMatrix::zeros(self.num_dofs, dim);
        for i in 0..dim {
            let mut column = DVector::zeros(self.num_dofs);
            for sign in [1.0, -1.0] {
                self.pre_step.apply(&mut *scoped);
                let mut perturbed = before.clone();
                perturbed[i] += sign * eps;
                set_wrt_values(&mut *scoped, wrt, &perturbed);
                scoped.step()?;
                column += scoped.velocities() * sign;
                set_wrt_values(&mut *scoped, wrt, &before);
            }
            jacobian.set_column(i, &(column / (2.0 * eps)));
        }
        Ok(jacobian)
    }
}
