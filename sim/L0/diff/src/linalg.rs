//! Dense linear algebra helpers shared by the group and snapshot code.
//!
//! Constraint sets are often rank-deficient (two contacts on the same face),
//! so inversion goes through an SVD pseudo-inverse.

use nalgebra::{DMatrix, DVector};

/// Moore-Penrose pseudo-inverse with a relative singular-value cutoff.
///
/// Singular values below `max(rows, cols) · ε · σ_max` are treated as zero,
/// the same rank threshold a complete orthogonal decomposition would use.
#[must_use]
pub fn pseudo_inverse(m: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = m.shape();
    if rows == 0 || cols == 0 {
        return DMatrix::zeros(cols, rows);
    }
    let svd = m.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let cutoff = (rows.max(cols) as f64) * f64::EPSILON * sigma_max;
    match svd.pseudo_inverse(cutoff) {
        Ok(inverse) => inverse,
        Err(_) => DMatrix::zeros(cols, rows),
    }
}

/// Place square or rectangular blocks along the diagonal.
#[must_use]
pub fn block_diagonal(blocks: &[DMatrix<f64>]) -> DMatrix<f64> {
    let rows = blocks.iter().map(|b| b.nrows()).sum();
    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::zeros(rows, cols);
    let (mut r, mut c) = (0, 0);
    for block in blocks {
        if !block.is_empty() {
            out.view_mut((r, c), block.shape()).copy_from(block);
        }
        r += block.nrows();
        c += block.ncols();
    }
    out
}

/// Concatenate matrices with equal row counts side by side.
#[must_use]
pub fn hstack(rows: usize, blocks: &[DMatrix<f64>]) -> DMatrix<f64> {
    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::zeros(rows, cols);
    let mut c = 0;
    for block in blocks {
        assert_eq!(block.nrows(), rows, "hstack blocks must share a row count");
        if block.ncols() > 0 {
            out.view_mut((0, c), block.shape()).copy_from(block);
        }
        c += block.ncols();
    }
    out
}

/// Concatenate vectors end to end.
#[must_use]
pub fn vstack(parts: &[DVector<f64>]) -> DVector<f64> {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut out = DVector::zeros(len);
    let mut cursor = 0;
    for part in parts {
        out.rows_mut(cursor, part.len()).copy_from(part);
        cursor += part.len();
    }
    out
}
