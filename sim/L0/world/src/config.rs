//! World and constraint solver configuration.

use nalgebra::Vector3;
use sim_types::{GradientStrategy, Result, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings for the projected Gauss-Seidel LCP solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LcpSolverConfig {
    /// Maximum number of sweeps.
    pub max_iterations: usize,
    /// Stop once no impulse changes by more than this in a sweep.
    pub tolerance: f64,
}

impl Default for LcpSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-13,
        }
    }
}

impl LcpSolverConfig {
    /// Cheap solve for interactive use.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }

    /// Set the iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Validate the solver settings.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero iteration cap or a non-positive tolerance.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(SimError::invalid_config("LCP max_iterations must be at least 1"));
        }
        if self.tolerance <= 0.0 || self.tolerance.is_nan() {
            return Err(SimError::invalid_config("LCP tolerance must be positive"));
        }
        Ok(())
    }
}

/// Baumgarte-style velocity added to penetrating contacts.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PenetrationCorrection {
    /// Penetration depth tolerated without correction.
    pub allowance: f64,
    /// Fraction of the excess depth removed per step.
    pub error_reduction: f64,
    /// Cap on the correction velocity.
    pub max_velocity: f64,
}

impl Default for PenetrationCorrection {
    fn default() -> Self {
        Self {
            allowance: 1e-3,
            error_reduction: 0.2,
            max_velocity: 0.1,
        }
    }
}

impl PenetrationCorrection {
    /// Separating velocity requested for a contact `depth` deep.
    #[must_use]
    pub fn velocity(&self, depth: f64, time_step: f64) -> f64 {
        let excess = depth - self.allowance;
        if excess <= 0.0 {
            0.0
        } else {
            (excess * self.error_reduction / time_step).min(self.max_velocity)
        }
    }
}

/// Configuration of a [`World`](crate::World).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConfig {
    /// Step length in seconds.
    pub time_step: f64,
    /// Gravity acceleration (m/s²).
    pub gravity: Vector3<f64>,
    /// Vertices closer than this to a plane generate a contact.
    pub contact_margin: f64,
    /// Approach speed above which restitution applies.
    pub bounce_velocity_threshold: f64,
    /// Penetration correction settings.
    pub penetration_correction: PenetrationCorrection,
    /// Constraint solver settings.
    pub lcp: LcpSolverConfig,
    /// Impulses smaller than this are treated as zero when classifying.
    pub clamping_threshold: f64,
    /// Formula family recorded into constraint groups.
    pub gradient_strategy: GradientStrategy,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            time_step: 1e-3,
            gravity: Vector3::new(0.0, 0.0, -9.81),
            contact_margin: 1e-4,
            bounce_velocity_threshold: 1e-2,
            penetration_correction: PenetrationCorrection::default(),
            lcp: LcpSolverConfig::default(),
            clamping_threshold: 1e-9,
            gradient_strategy: GradientStrategy::Lcp,
        }
    }
}

impl WorldConfig {
    /// Zero-gravity world, useful for isolating contact effects.
    #[must_use]
    pub fn zero_gravity() -> Self {
        Self {
            gravity: Vector3::zeros(),
            ..Self::default()
        }
    }

    /// Larger steps and a cheap solver.
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            time_step: 1.0 / 240.0,
            lcp: LcpSolverConfig::fast(),
            ..Self::default()
        }
    }

    /// Set the step length.
    #[must_use]
    pub const fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    /// Set gravity.
    #[must_use]
    pub const fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the gradient strategy recorded into constraint groups.
    #[must_use]
    pub const fn with_gradient_strategy(mut self, strategy: GradientStrategy) -> Self {
        self.gradient_strategy = strategy;
        self
    }

    /// Set the constraint solver settings.
    #[must_use]
    pub const fn with_lcp(mut self, lcp: LcpSolverConfig) -> Self {
        self.lcp = lcp;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive timestep, non-finite gravity or a
    /// negative margin, threshold or solver setting.
    pub fn validate(&self) -> Result<()> {
        if self.time_step <= 0.0 || !self.time_step.is_finite() {
            return Err(SimError::InvalidTimestep(self.time_step));
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(SimError::invalid_config("gravity must be finite"));
        }
        if self.contact_margin < 0.0 {
            return Err(SimError::invalid_config("contact_margin must be non-negative"));
        }
        if self.bounce_velocity_threshold < 0.0 {
            return Err(SimError::invalid_config(
                "bounce_velocity_threshold must be non-negative",
            ));
        }
        if self.clamping_threshold <= 0.0 || self.clamping_threshold.is_nan() {
            return Err(SimError::invalid_config("clamping_threshold must be positive"));
        }
        self.lcp.validate()
    }
}
