//! Clamp projection and the velocity Jacobians built on it.
//!
//! The same formulas run at two scales: on one constraint group's local
//! matrices, and on the world-assembled matrices of a snapshot. Both hand
//! their matrices over as a [`ConstraintBlocks`] and pick the formulas with a
//! [`GradientStrategy`].
//!
//! Notation, with `n` DOFs, `c` clamping and `u` upper-bound columns:
//!
//! | Symbol | Shape | Meaning |
//! |--------|-------|---------|
//! | `A_c` | n × c | Generalized impulse of each clamping dimension |
//! | `A_ub` | n × u | Generalized impulse of each upper-bound dimension |
//! | `E` | u × c | Upper-bound impulse per unit of the clamping impulse it follows |
//! | `V_c`, `V_ub` | | `M^-1 · A_c`, `M^-1 · A_ub` at the pre-step state |
//! | `B` | c | Bounce diagonal, `1 + e` for bouncing dimensions, else `1` |

use nalgebra::{DMatrix, DVector};
use sim_types::GradientStrategy;

use crate::linalg::pseudo_inverse;

/// The constraint matrices of a group or a whole world.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintBlocks {
    /// `A_c`.
    pub clamping: DMatrix<f64>,
    /// `A_ub`.
    pub upper_bound: DMatrix<f64>,
    /// `E`.
    pub mapping: DMatrix<f64>,
    /// `V_c`.
    pub massed_clamping: DMatrix<f64>,
    /// `V_ub`.
    pub massed_upper_bound: DMatrix<f64>,
    /// `B`.
    pub bounce_diagonals: DVector<f64>,
}

impl ConstraintBlocks {
    /// Blocks for `num_dofs` DOFs with no active constraints.
    #[must_use]
    pub fn empty(num_dofs: usize) -> Self {
        Self {
            clamping: DMatrix::zeros(num_dofs, 0),
            upper_bound: DMatrix::zeros(num_dofs, 0),
            mapping: DMatrix::zeros(0, 0),
            massed_clamping: DMatrix::zeros(num_dofs, 0),
            massed_upper_bound: DMatrix::zeros(num_dofs, 0),
            bounce_diagonals: DVector::zeros(0),
        }
    }

    /// Number of DOFs (rows).
    #[must_use]
    pub fn num_dofs(&self) -> usize {
        self.clamping.nrows()
    }

    /// Number of clamping columns.
    #[must_use]
    pub fn num_clamping(&self) -> usize {
        self.clamping.ncols()
    }

    /// Number of upper-bound columns.
    #[must_use]
    pub fn num_upper_bound(&self) -> usize {
        self.upper_bound.ncols()
    }

    /// `A_c + A_ub · E`: generalized impulse per unit clamping impulse, friction included.
    #[must_use]
    pub fn effective_clamping(&self) -> DMatrix<f64> {
        if self.num_upper_bound() == 0 {
            self.clamping.clone()
        } else {
            &self.clamping + &self.upper_bound * &self.mapping
        }
    }

    /// `V_c + V_ub · E`.
    #[must_use]
    pub fn effective_massed_clamping(&self) -> DMatrix<f64> {
        if self.num_upper_bound() == 0 {
            self.massed_clamping.clone()
        } else {
            &self.massed_clamping + &self.massed_upper_bound * &self.mapping
        }
    }

    /// `Q = A_cᵀ · X` where `X` is the velocity change per unit clamping impulse.
    ///
    /// `X` is `V_c + V_ub · E` when `inv_mass` is `None`, otherwise it is
    /// recomputed as `inv_mass · (A_c + A_ub · E)`.
    #[must_use]
    pub fn force_to_velocity(&self, inv_mass: Option<&DMatrix<f64>>) -> DMatrix<f64> {
        let implied = match inv_mass {
            None => self.effective_massed_clamping(),
            Some(minv) => minv * self.effective_clamping(),
        };
        self.clamping.transpose() * implied
    }

    /// `P_c = (1/dt) · pinv(Q) · diag(B) · A_cᵀ`, a `c × n` matrix.
    ///
    /// Maps a predicted velocity to the clamping impulses that cancel (or
    /// reflect, for bouncing dimensions) its approach along every clamping
    /// dimension. Returns a `0 × n` matrix when nothing clamps.
    #[must_use]
    pub fn projection_into_clamps(&self, dt: f64, inv_mass: Option<&DMatrix<f64>>) -> DMatrix<f64> {
        let n = self.num_dofs();
        if self.num_clamping() == 0 {
            return DMatrix::zeros(0, n);
        }
        let q = self.force_to_velocity(inv_mass);
        let rhs = DMatrix::from_diagonal(&self.bounce_diagonals) * self.clamping.transpose();
        pseudo_inverse(&q) * rhs / dt
    }

    /// `X_c = (V_c + V_ub·E) · pinv(V_c) · M^-1 · pinv(V_c)ᵀ · V_cᵀ`.
    #[must_use]
    pub fn massed_projection(&self, inv_mass: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.num_dofs();
        if self.num_clamping() == 0 {
            return DMatrix::zeros(n, n);
        }
        let v_c_inv = pseudo_inverse(&self.massed_clamping);
        self.effective_massed_clamping()
            * &v_c_inv
            * inv_mass
            * v_c_inv.transpose()
            * self.massed_clamping.transpose()
    }

    /// `dv⁺/dτ` under `strategy`.
    #[must_use]
    pub fn force_vel_jacobian(
        &self,
        strategy: GradientStrategy,
        dt: f64,
        inv_mass: &DMatrix<f64>,
    ) -> DMatrix<f64> {
        let n = self.num_dofs();
        if self.num_clamping() == 0 {
            return inv_mass * dt;
        }
        match strategy {
            GradientStrategy::Lcp => {
                let projection = self.projection_into_clamps(dt, None);
                let identity = DMatrix::<f64>::identity(n, n);
                inv_mass * (identity - self.effective_clamping() * projection * inv_mass * dt) * dt
            }
            GradientStrategy::Massed => (inv_mass - self.massed_projection(inv_mass)) * dt,
        }
    }

    /// `dv⁺/dv` under `strategy`.
    ///
    /// The massed formulas carry no Coriolis term, so `vel_c` only enters the
    /// LCP strategy and the unconstrained case.
    #[must_use]
    pub fn vel_vel_jacobian(
        &self,
        strategy: GradientStrategy,
        dt: f64,
        mass: &DMatrix<f64>,
        inv_mass: &DMatrix<f64>,
        vel_c: &DMatrix<f64>,
    ) -> DMatrix<f64> {
        let n = self.num_dofs();
        let identity = DMatrix::<f64>::identity(n, n);
        let force_vel = self.force_vel_jacobian(strategy, dt, inv_mass);
        if self.num_clamping() == 0 {
            return identity - force_vel * vel_c;
        }
        match strategy {
            GradientStrategy::Lcp => {
                let projection = self.projection_into_clamps(dt, None);
                identity - inv_mass * self.effective_clamping() * projection * dt - force_vel * vel_c
            }
            GradientStrategy::Massed => identity - self.massed_projection(inv_mass) * mass,
        }
    }
}

/// Position-position Jacobian implied by bouncing constraints.
///
/// Finds the `n × n` matrix `X` closest to the identity in Frobenius norm
/// with `a_iᵀ · X · a_i = -e_i` for every bouncing column `a_i` and
/// restitution `e_i`. Identity when nothing bounces.
#[must_use]
pub fn pos_pos_from_bounces(
    num_dofs: usize,
    bouncing: &DMatrix<f64>,
    restitution: &DVector<f64>,
) -> DMatrix<f64> {
    let n = num_dofs;
    if bouncing.ncols() == 0 {
        return DMatrix::identity(n, n);
    }
    assert_eq!(bouncing.nrows(), n, "bouncing matrix must have one row per DOF");
    assert_eq!(
        bouncing.ncols(),
        restitution.len(),
        "one restitution coefficient per bouncing column"
    );

    // Column i of W is vec(a_i a_iᵀ) in column-major order, so Wᵀ vec(X) = diag(Aᵀ X A).
    let mut w = DMatrix::zeros(n * n, bouncing.ncols());
    for (i, a) in bouncing.column_iter().enumerate() {
        for j in 0..n {
            w.view_mut((j * n, i), (n, 1)).copy_from(&(a * a[j]));
        }
    }

    let mut center = DVector::zeros(n * n);
    for i in 0..n {
        center[i * n + i] = 1.0;
    }

    let w_t = w.transpose();
    let rhs = restitution + &w_t * &center;
    let q = &center - pseudo_inverse(&w_t) * rhs;
    DMatrix::from_column_slice(n, n, q.as_slice())
}
