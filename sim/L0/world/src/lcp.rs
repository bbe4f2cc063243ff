//! Boxed LCP solver and constraint island grouping.
//!
//! The solver finds impulses `x` with `w = A·x + b` such that each dimension
//! satisfies one of:
//!
//! - `lo_i < x_i < hi_i` and `w_i = 0`
//! - `x_i = lo_i` and `w_i >= 0`
//! - `x_i = hi_i` and `w_i <= 0`
//!
//! Dimensions with a friction index `f` use `hi_i · x_f` and `lo_i · x_f` as
//! their bounds, re-evaluated every sweep.

use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::config::LcpSolverConfig;

/// Below this a Delassus diagonal is treated as zero.
const MIN_DIAGONAL: f64 = 1e-15;

/// A boxed LCP with friction coupling.
#[derive(Debug, Clone)]
pub struct BoxedLcp {
    /// Delassus matrix `J · M^-1 · Jᵀ`.
    pub a: DMatrix<f64>,
    /// Offset, relative velocity minus target.
    pub b: DVector<f64>,
    /// Upper bounds (coefficients when a friction index is set).
    pub hi: DVector<f64>,
    /// Lower bounds (coefficients when a friction index is set).
    pub lo: DVector<f64>,
    /// Dimension whose impulse scales the bounds.
    pub friction_index: Vec<Option<usize>>,
}

/// Result of [`BoxedLcp::solve_pgs`].
#[derive(Debug, Clone, PartialEq)]
pub struct LcpSolution {
    /// Impulses.
    pub x: DVector<f64>,
    /// Sweeps performed.
    pub iterations: usize,
    /// Whether the tolerance was reached before the cap.
    pub converged: bool,
}

impl BoxedLcp {
    fn bounds(&self, i: usize, x: &DVector<f64>) -> (f64, f64) {
        match self.friction_index[i] {
            Some(f) => {
                let scale = x[f].max(0.0);
                (self.lo[i] * scale, self.hi[i] * scale)
            }
            None => (self.lo[i], self.hi[i]),
        }
    }

    /// Projected Gauss-Seidel from a zero start.
    #[must_use]
    pub fn solve_pgs(&self, config: &LcpSolverConfig) -> LcpSolution {
        let n = self.b.len();
        let mut x = DVector::zeros(n);
        if n == 0 {
            return LcpSolution {
                x,
                iterations: 0,
                converged: true,
            };
        }

        let diag_inv: Vec<f64> = (0..n)
            .map(|i| {
                let d = self.a[(i, i)];
                if d.abs() < MIN_DIAGONAL { 0.0 } else { 1.0 / d }
            })
            .collect();

        for iteration in 0..config.max_iterations {
            let mut max_change: f64 = 0.0;
            for i in 0..n {
                let residual = self.b[i] + self.a.row(i).dot(&x.transpose());
                let (lo, hi) = self.bounds(i, &x);
                let updated = (x[i] - residual * diag_inv[i]).clamp(lo, hi);
                max_change = max_change.max((updated - x[i]).abs());
                x[i] = updated;
            }
            if max_change < config.tolerance {
                return LcpSolution {
                    x,
                    iterations: iteration + 1,
                    converged: true,
                };
            }
        }

        warn!(
            dims = n,
            max_iterations = config.max_iterations,
            "PGS hit its iteration cap before converging"
        );
        LcpSolution {
            x,
            iterations: config.max_iterations,
            converged: false,
        }
    }
}

// ============================================================================
// Union-Find
// ============================================================================

/// Disjoint sets with path compression and union by rank.
#[derive(Debug, Clone)]
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub(crate) fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}
