//! Matrix-vector multiply on the accelerator
//!
//! Computes `out[i] = sum_j mat[i, j] * vec[j]` entirely on device copies.
//! The work is split at two granularities:
//!
//! ```text
//! rows ──► gang 0: rows [0, b)        each row:
//!          gang 1: rows [b, 2b)         lane l sums columns j ≡ l (mod V)
//!          ...                          lanes combined pairwise
//!          gang G-1: rows [.., rows)    out[i] written once
//! ```
//!
//! Gangs (`G`) never share state: each owns a contiguous block of output rows
//! and a private set of lane accumulators. The vector length (`V`) only
//! changes the order in which a row's products are summed, so results agree
//! across launch configurations up to floating-point rounding.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::LaunchConfig;
use crate::error::{AceleraError, Result};
use crate::matrix::Matrix;
use crate::vector::Vector;

/// Multiply `mat` by `vec` into `out` with the accelerator's default launch
///
/// Requires `mat.cols() == vec.len()` and `mat.rows() == out.len()`. All
/// three operands must already hold their data on the device; nothing is
/// synchronized to the host.
///
/// # Examples
///
/// ```
/// use acelera::{fill, multiply, Accelerator, Matrix, Vector};
///
/// let acc = Accelerator::host().unwrap();
/// let mut mat = Matrix::new(&acc, 128, 256).unwrap();
/// let mut vec = Vector::new(&acc, 256).unwrap();
/// let mut out = Vector::new(&acc, 128).unwrap();
/// fill(&mut mat, 1.0).unwrap();
/// fill(&mut vec, 2.0).unwrap();
///
/// multiply(&mat, &vec, &mut out).unwrap();
/// out.pull_to_host().unwrap();
/// assert!(out.as_slice().iter().all(|&y| y == 512.0));
/// ```
///
/// # Errors
///
/// Returns `DimensionMismatch` if the shapes are incompatible; `out` is left
/// untouched on both host and device. Returns `NotPresent` if an operand is
/// resident on a different accelerator.
pub fn multiply(mat: &Matrix, vec: &Vector, out: &mut Vector) -> Result<()> {
    let launch = out.accelerator().launch_config();
    multiply_with(mat, vec, out, launch)
}

/// Multiply with an explicit gang/vector launch configuration
///
/// # Errors
///
/// As [`multiply`], plus `InvalidArgument` for a zero-sized launch.
pub fn multiply_with(
    mat: &Matrix,
    vec: &Vector,
    out: &mut Vector,
    launch: LaunchConfig,
) -> Result<()> {
    check_dimensions(mat, vec, out)?;
    launch.validate()?;

    let accelerator = out.accelerator().clone();
    mat.buffer().ensure_resident_on(&accelerator, "matrix")?;
    vec.buffer().ensure_resident_on(&accelerator, "vector")?;
    out.buffer().ensure_resident_on(&accelerator, "output")?;

    let rows = mat.rows();
    let cols = mat.cols();
    let block = launch.items_per_gang(rows);
    let lanes = launch.vector_length;
    debug!(
        rows,
        cols,
        gangs = launch.gangs,
        vector_length = lanes,
        block,
        "launching matvec"
    );

    let a = mat.buffer().device();
    let x = vec.buffer().device();
    let y = out.buffer_mut().device_mut();

    accelerator.dispatch(|| {
        y.par_chunks_mut(block)
            .enumerate()
            .for_each(|(gang, out_rows)| {
                let first_row = gang * block;
                let mut partial = vec![0.0f32; lanes];
                for (offset, slot) in out_rows.iter_mut().enumerate() {
                    let start = (first_row + offset) * cols;
                    *slot = row_reduce(&a[start..start + cols], x, &mut partial);
                }
            });
    });
    Ok(())
}

fn check_dimensions(mat: &Matrix, vec: &Vector, out: &Vector) -> Result<()> {
    if mat.cols() == vec.len() && mat.rows() == out.len() {
        return Ok(());
    }
    warn!(
        rows = mat.rows(),
        cols = mat.cols(),
        vec_len = vec.len(),
        out_len = out.len(),
        "matrix/vector dimensions incompatible"
    );
    Err(AceleraError::DimensionMismatch {
        rows: mat.rows(),
        cols: mat.cols(),
        vec_len: vec.len(),
        out_len: out.len(),
    })
}

/// Reduce one row against `x` using `partial.len()` lane accumulators
///
/// Lane `l` accumulates columns `j ≡ l (mod lanes)`; the lanes are then
/// combined pairwise. `partial` is scratch owned by the calling gang.
#[inline]
fn row_reduce(row: &[f32], x: &[f32], partial: &mut [f32]) -> f32 {
    debug_assert_eq!(row.len(), x.len());
    let lanes = partial.len();
    partial.fill(0.0);

    let mut a_chunks = row.chunks_exact(lanes);
    let mut x_chunks = x.chunks_exact(lanes);
    for (a, b) in a_chunks.by_ref().zip(x_chunks.by_ref()) {
        for ((acc, &ai), &bi) in partial.iter_mut().zip(a).zip(b) {
            *acc += ai * bi;
        }
    }
    for ((acc, &ai), &bi) in partial
        .iter_mut()
        .zip(a_chunks.remainder())
        .zip(x_chunks.remainder())
    {
        *acc += ai * bi;
    }

    tree_combine(partial)
}

/// Pairwise sum of lane partials, in place
fn tree_combine(partial: &mut [f32]) -> f32 {
    let mut width = partial.len();
    while width > 1 {
        let upper = width.div_ceil(2);
        for lane in 0..width / 2 {
            partial[lane] += partial[lane + upper];
        }
        width = upper;
    }
    partial.first().copied().unwrap_or(0.0)
}
