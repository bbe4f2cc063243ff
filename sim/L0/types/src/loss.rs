//! Loss gradients and differentiation targets.

use nalgebra::DVector;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gradient of a scalar loss with respect to the state at one timestep.
///
/// All three vectors have one entry per world DOF.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LossGradient {
    /// `dL/dq`.
    pub loss_wrt_position: DVector<f64>,
    /// `dL/dv`.
    pub loss_wrt_velocity: DVector<f64>,
    /// `dL/dtau`.
    pub loss_wrt_torque: DVector<f64>,
}

impl LossGradient {
    /// All-zero gradient over `dofs` degrees of freedom.
    #[must_use]
    pub fn zeros(dofs: usize) -> Self {
        Self {
            loss_wrt_position: DVector::zeros(dofs),
            loss_wrt_velocity: DVector::zeros(dofs),
            loss_wrt_torque: DVector::zeros(dofs),
        }
    }

    /// Gradient with only position and velocity terms (the shape of a
    /// next-timestep loss).
    #[must_use]
    pub fn from_state(loss_wrt_position: DVector<f64>, loss_wrt_velocity: DVector<f64>) -> Self {
        assert_eq!(
            loss_wrt_position.len(),
            loss_wrt_velocity.len(),
            "position and velocity loss must have one entry per DOF"
        );
        let dofs = loss_wrt_position.len();
        Self {
            loss_wrt_position,
            loss_wrt_velocity,
            loss_wrt_torque: DVector::zeros(dofs),
        }
    }

    /// Number of DOFs this gradient covers.
    #[must_use]
    pub fn dofs(&self) -> usize {
        self.loss_wrt_position.len()
    }
}

/// Differentiation target for position-velocity Jacobians.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WithRespectTo {
    /// Generalized positions.
    Position,
    /// Mass of every link.
    LinkMasses,
    /// Center of mass of every link (3 per link, link frame).
    LinkComs,
    /// Principal moments of inertia of every link (3 per link).
    LinkMois,
}

impl WithRespectTo {
    /// All targets, in a stable order.
    pub const ALL: [Self; 4] = [
        Self::Position,
        Self::LinkMasses,
        Self::LinkComs,
        Self::LinkMois,
    ];
}
