//! Host-side result verification
//!
//! The verifier sits outside the offload path: it pulls a buffer back to the
//! host, then compares it against a reference computed on the host. The
//! pull is part of every `check_*` call so the comparison always sees the
//! latest device state.

use serde::Serialize;
use trueno::Vector as SimdVector;

use crate::error::{AceleraError, Result};
use crate::matrix::Matrix;
use crate::vector::Vector;

/// Default relative tolerance for `f32` comparisons
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// First element found outside tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mismatch {
    /// Flat element index
    pub index: usize,
    /// Value pulled from the device
    pub actual: f32,
    /// Reference value
    pub expected: f32,
}

/// Outcome of comparing one buffer against its reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    /// Label of the checked buffer
    pub name: String,
    /// Elements compared
    pub checked: usize,
    /// Elements outside tolerance
    pub mismatches: usize,
    /// Largest absolute error among finite comparisons
    pub max_abs_error: f32,
    /// First offending element, if any
    pub first_mismatch: Option<Mismatch>,
}

impl VerifyReport {
    /// Whether every element was within tolerance
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }

    /// Turn a failing report into `VerificationFailed`
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailed` if any element was out of tolerance.
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(AceleraError::VerificationFailed {
                name: self.name,
                mismatches: self.mismatches,
                checked: self.checked,
                max_abs_error: self.max_abs_error,
            })
        }
    }
}

/// Compares pulled device data against host references
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verifier {
    tolerance: f32,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Verifier {
    /// Create a verifier with relative tolerance `tolerance`
    ///
    /// An element passes when `|actual - expected| <= tolerance * max(1, |expected|)`.
    #[must_use]
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    /// Relative tolerance
    #[must_use]
    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Compare two host slices
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the lengths differ.
    pub fn compare(&self, name: &str, actual: &[f32], expected: &[f32]) -> Result<VerifyReport> {
        if actual.len() != expected.len() {
            return Err(AceleraError::invalid_argument(format!(
                "'{name}': {} elements to check against a reference of {}",
                actual.len(),
                expected.len()
            )));
        }

        let mut report = VerifyReport {
            name: name.to_string(),
            checked: actual.len(),
            mismatches: 0,
            max_abs_error: 0.0,
            first_mismatch: None,
        };
        for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
            if self.within_tolerance(a, e) {
                if a.is_finite() {
                    report.max_abs_error = report.max_abs_error.max((a - e).abs());
                }
                continue;
            }
            report.mismatches += 1;
            let err = (a - e).abs();
            if err.is_finite() {
                report.max_abs_error = report.max_abs_error.max(err);
            }
            report.first_mismatch.get_or_insert(Mismatch {
                index,
                actual: a,
                expected: e,
            });
        }
        Ok(report)
    }

    /// Pull `mat` to the host and compare it with `expected`
    ///
    /// # Errors
    ///
    /// Returns transfer errors or `InvalidArgument` for a length mismatch.
    pub fn check_matrix(
        &self,
        mat: &mut Matrix,
        name: &str,
        expected: &[f32],
    ) -> Result<VerifyReport> {
        mat.pull_to_host()?;
        self.compare(name, mat.host(), expected)
    }

    /// Pull `vec` to the host and compare it with `expected`
    ///
    /// # Errors
    ///
    /// Returns transfer errors or `InvalidArgument` for a length mismatch.
    pub fn check_vector(
        &self,
        vec: &mut Vector,
        name: &str,
        expected: &[f32],
    ) -> Result<VerifyReport> {
        vec.pull_to_host()?;
        self.compare(name, vec.as_slice(), expected)
    }

    fn within_tolerance(&self, actual: f32, expected: f32) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        if actual == expected {
            return true;
        }
        (actual - expected).abs() <= self.tolerance * expected.abs().max(1.0)
    }
}

/// Host reference for `mat * x`, using trueno SIMD dot products
///
/// # Errors
///
/// Returns `InvalidArgument` if the slice lengths do not match `rows`/`cols`.
pub fn reference_matvec(mat: &[f32], x: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
    if rows.checked_mul(cols) != Some(mat.len()) || x.len() != cols {
        return Err(AceleraError::invalid_argument(format!(
            "reference matvec: {} matrix elements and {} vector elements for {rows}x{cols}",
            mat.len(),
            x.len()
        )));
    }
    if cols == 0 {
        return Ok(vec![0.0; rows]);
    }

    let x_vec = SimdVector::from_slice(x);
    mat.chunks_exact(cols)
        .map(|row| {
            SimdVector::from_slice(row).dot(&x_vec).map_err(|e| {
                AceleraError::invalid_argument(format!("reference dot product failed: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcceleratorConfig;
    use crate::device::Accelerator;
    use crate::init::fill;
    use crate::matvec::multiply;

    #[test]
    fn test_compare_passes_within_tolerance() {
        let verifier = Verifier::new(1e-3);
        let report = verifier
            .compare("out", &[1.0, 1000.5, -3.0], &[1.0005, 1000.0, -3.0])
            .unwrap();
        assert!(report.passed());
        assert_eq!(report.checked, 3);
        assert!((report.max_abs_error - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_compare_reports_first_mismatch() {
        let verifier = Verifier::default();
        let report = verifier
            .compare("out", &[1.0, 2.5, 3.0, 9.0], &[1.0, 2.0, 3.0, 4.0])
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.mismatches, 2);
        assert_eq!(
            report.first_mismatch,
            Some(Mismatch {
                index: 1,
                actual: 2.5,
                expected: 2.0
            })
        );
        assert_eq!(report.max_abs_error, 5.0);
        assert!(matches!(
            report.into_result(),
            Err(AceleraError::VerificationFailed { mismatches: 2, .. })
        ));
    }

    #[test]
    fn test_compare_nan_handling() {
        let verifier = Verifier::default();
        assert!(verifier.compare("nan", &[f32::NAN], &[f32::NAN]).unwrap().passed());
        assert!(!verifier.compare("nan", &[f32::NAN], &[1.0]).unwrap().passed());
        assert!(!verifier.compare("nan", &[1.0], &[f32::NAN]).unwrap().passed());
    }

    #[test]
    fn test_compare_length_mismatch() {
        let verifier = Verifier::default();
        assert!(verifier.compare("x", &[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_reference_matvec() {
        let mat = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = reference_matvec(&mat, &[1.0, 1.0], 3, 2).unwrap();
        assert_eq!(out, vec![3.0, 7.0, 11.0]);
        assert_eq!(reference_matvec(&[], &[], 2, 0).unwrap(), vec![0.0, 0.0]);
        assert!(reference_matvec(&mat, &[1.0], 3, 2).is_err());
    }

    #[test]
    fn test_check_pulls_before_comparing() {
        let acc = Accelerator::new(AcceleratorConfig::default().with_gangs(2)).unwrap();
        let mut mat = Matrix::new(&acc, 8, 16).unwrap();
        let mut vec = Vector::new(&acc, 16).unwrap();
        let mut out = Vector::new(&acc, 8).unwrap();
        fill(&mut mat, 1.0).unwrap();
        fill(&mut vec, 2.0).unwrap();
        multiply(&mat, &vec, &mut out).unwrap();

        let verifier = Verifier::default();
        let mat_report = verifier.check_matrix(&mut mat, "mat", &[1.0; 128]).unwrap();
        let vec_report = verifier.check_vector(&mut vec, "vec", &[2.0; 16]).unwrap();
        let expected = reference_matvec(mat.host(), vec.as_slice(), 8, 16).unwrap();
        let out_report = verifier.check_vector(&mut out, "out", &expected).unwrap();

        assert!(mat_report.passed());
        assert!(vec_report.passed());
        assert!(out_report.passed());
        assert!(out.as_slice().iter().all(|&y| y == 32.0));
    }

    #[test]
    fn test_report_serializes() {
        let report = Verifier::default().compare("v", &[1.0], &[1.0]).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"name\":\"v\""));
        assert!(json.contains("\"mismatches\":0"));
    }
}
