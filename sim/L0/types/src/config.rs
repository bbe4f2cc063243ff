//! Configuration types for gradient computation.
//!
//! These control how step Jacobians are formed (which group-matrix strategy),
//! how finite-difference verification perturbs the world, and how loose the
//! analytic-versus-numeric diagnostics are allowed to be.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Formula family used to turn clamping constraints into step Jacobians.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GradientStrategy {
    /// Clamp projection built from the LCP solution (`P_c`), handles
    /// upper-bound friction and bounces.
    #[default]
    Lcp,
    /// Mass-only projection onto the span of the clamping velocity changes.
    /// Ignores bounces and Coriolis velocity terms.
    Massed,
}

impl GradientStrategy {
    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Lcp => "lcp",
            Self::Massed => "massed",
        }
    }
}

/// Constraint solver toggles that finite differencing needs to flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverFlags {
    /// Record constraint group matrices while solving.
    pub gradient_enabled: bool,
    /// Add position-error correction velocities to penetrating contacts.
    pub penetration_correction_enabled: bool,
}

impl Default for SolverFlags {
    fn default() -> Self {
        Self {
            gradient_enabled: true,
            penetration_correction_enabled: true,
        }
    }
}

impl SolverFlags {
    /// Flags used while probing the world with finite differences.
    #[must_use]
    pub fn finite_differencing() -> Self {
        Self {
            gradient_enabled: false,
            penetration_correction_enabled: false,
        }
    }

    /// Set whether gradient bookkeeping runs during the solve.
    #[must_use]
    pub const fn with_gradient(mut self, enabled: bool) -> Self {
        self.gradient_enabled = enabled;
        self
    }

    /// Set whether penetration correction runs during the solve.
    #[must_use]
    pub const fn with_penetration_correction(mut self, enabled: bool) -> Self {
        self.penetration_correction_enabled = enabled;
        self
    }
}

/// Tolerances for analytic-versus-numeric verification diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiagnosticTolerance {
    /// Allowed mismatch when bouncing constraints are present.
    pub with_bounces: f64,
    /// Allowed mismatch otherwise.
    pub without_bounces: f64,
}

impl Default for DiagnosticTolerance {
    fn default() -> Self {
        Self {
            with_bounces: 1e-4,
            without_bounces: 1e-8,
        }
    }
}

impl DiagnosticTolerance {
    /// Pick the tolerance tier for a snapshot.
    #[must_use]
    pub fn for_bounces(&self, has_bounces: bool) -> f64 {
        if has_bounces {
            self.with_bounces
        } else {
            self.without_bounces
        }
    }
}

/// Perturbation sizes for every finite difference the core performs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FiniteDifferenceConfig {
    /// Pre-step velocity perturbation for the velocity-velocity Jacobian.
    pub velocity_eps: f64,
    /// Pre-step torque perturbation for the force-velocity Jacobian.
    pub force_eps: f64,
    /// Pre-step position perturbation for the position-velocity Jacobian.
    pub position_eps: f64,
    /// Central difference step for `d(M^-1 tau)/d(wrt)`.
    pub wrt_eps: f64,
    /// Forward difference step for `dC/d(wrt)`.
    pub coriolis_eps: f64,
    /// Central difference step when checking `d(P_c v)/d(wrt)`.
    pub projection_eps: f64,
    /// Position perturbation for contact-geometry brute force.
    pub contact_eps: f64,
    /// Position perturbation for constraint-force brute force.
    pub constraint_force_eps: f64,
    /// Number of sub-steps used by the position-output differences.
    pub subdivisions: usize,
    /// Position perturbation for position-position, divided by `subdivisions`.
    pub pos_pos_scale: f64,
    /// Velocity perturbation for velocity-position, divided by `subdivisions`.
    pub vel_pos_scale: f64,
}

impl Default for FiniteDifferenceConfig {
    fn default() -> Self {
        Self {
            velocity_eps: 1e-7,
            force_eps: 1e-7,
            position_eps: 1e-7,
            wrt_eps: 1e-6,
            coriolis_eps: 1e-6,
            projection_eps: 1e-5,
            contact_eps: 1e-6,
            constraint_force_eps: 1e-7,
            subdivisions: 20,
            pos_pos_scale: 1e-1,
            vel_pos_scale: 1e-3,
        }
    }
}

impl FiniteDifferenceConfig {
    /// Position perturbation for the subdivided position-position difference.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // subdivision counts are small
    pub fn pos_pos_eps(&self) -> f64 {
        self.pos_pos_scale / self.subdivisions as f64
    }

    /// Velocity perturbation for the subdivided velocity-position difference.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // subdivision counts are small
    pub fn vel_pos_eps(&self) -> f64 {
        self.vel_pos_scale / self.subdivisions as f64
    }

    /// Set the number of position sub-steps.
    #[must_use]
    pub const fn with_subdivisions(mut self, subdivisions: usize) -> Self {
        self.subdivisions = subdivisions;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        let eps = [
            ("velocity_eps", self.velocity_eps),
            ("force_eps", self.force_eps),
            ("position_eps", self.position_eps),
            ("wrt_eps", self.wrt_eps),
            ("coriolis_eps", self.coriolis_eps),
            ("projection_eps", self.projection_eps),
            ("contact_eps", self.contact_eps),
            ("constraint_force_eps", self.constraint_force_eps),
            ("pos_pos_scale", self.pos_pos_scale),
            ("vel_pos_scale", self.vel_pos_scale),
        ];
        for (name, value) in eps {
            if !value.is_finite() || value <= 0.0 {
                return Err(crate::SimError::invalid_config(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if self.subdivisions == 0 {
            return Err(crate::SimError::invalid_config(
                "subdivisions must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for step gradient snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GradientConfig {
    /// Group-matrix formula family.
    pub strategy: GradientStrategy,
    /// Finite-difference perturbation sizes.
    pub finite_difference: FiniteDifferenceConfig,
    /// Verification tolerances.
    pub diagnostics: DiagnosticTolerance,
}

impl GradientConfig {
    /// Set the strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: GradientStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the finite-difference configuration.
    #[must_use]
    pub const fn with_finite_difference(mut self, fd: FiniteDifferenceConfig) -> Self {
        self.finite_difference = fd;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.finite_difference.validate()?;
        let tol = self.diagnostics;
        if !(tol.with_bounces > 0.0 && tol.without_bounces > 0.0) {
            return Err(crate::SimError::invalid_config(
                "diagnostic tolerances must be positive",
            ));
        }
        Ok(())
    }
}
