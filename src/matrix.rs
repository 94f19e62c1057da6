//! Dense row-major matrix with an accelerator mirror
//!
//! Element `(i, j)` lives at flat offset `i * cols + j` in both the host array
//! and the device mirror.

use crate::buffer::DeviceBuffer;
use crate::device::{Accelerator, BufferId, BufferShape};
use crate::error::{AceleraError, Result};

/// 2D `f32` matrix stored row-major in a [`DeviceBuffer`]
///
/// # Examples
///
/// ```
/// use acelera::{Accelerator, Matrix};
///
/// let acc = Accelerator::host().unwrap();
/// let mut mat = Matrix::new(&acc, 2, 3).unwrap();
/// *mat.at(1, 2) = 4.0;
/// assert_eq!(mat.offset(1, 2), 5);
/// assert_eq!(mat.host()[5], 4.0);
/// ```
#[derive(Debug)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    buffer: DeviceBuffer<f32>,
}

impl Matrix {
    /// Allocate a `rows x cols` matrix on host and device
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `rows * cols` overflows, or
    /// `ResourceExhaustion` if an allocation fails.
    pub fn new(accelerator: &Accelerator, rows: usize, cols: usize) -> Result<Self> {
        let buffer = DeviceBuffer::with_shape(accelerator, BufferShape::Grid { rows, cols })?;
        Ok(Self { rows, cols, buffer })
    }

    /// Build a matrix from row-major host data and push it to the device
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `data.len() != rows * cols`, plus the
    /// errors of [`Matrix::new`].
    pub fn from_rows(
        accelerator: &Accelerator,
        rows: usize,
        cols: usize,
        data: &[f32],
    ) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(AceleraError::invalid_argument(format!(
                "matrix data has {} elements, expected {rows}x{cols}",
                data.len()
            )));
        }
        let mut mat = Self::new(accelerator, rows, cols)?;
        mat.host_mut().copy_from_slice(data);
        mat.push_to_device()?;
        Ok(mat)
    }

    /// Number of rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total element count
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the matrix has no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Flat row-major offset of `(row, col)`
    #[inline]
    #[must_use]
    pub fn offset(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Mutable reference to host element `(row, col)`
    ///
    /// Touches the host array only; call [`Matrix::pull_to_host`] first to see
    /// device-side writes.
    ///
    /// # Panics
    ///
    /// Panics if the flat offset is past the end of the matrix. A column index
    /// past `cols` that still lands inside the array is only caught in debug
    /// builds.
    #[inline]
    pub fn at(&mut self, row: usize, col: usize) -> &mut f32 {
        debug_assert!(col < self.cols, "column {col} out of range for {} columns", self.cols);
        let idx = self.offset(row, col);
        &mut self.buffer.host_mut()[idx]
    }

    /// Checked read of host element `(row, col)`
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.buffer.host()[self.offset(row, col)])
        } else {
            None
        }
    }

    /// Checked mutable access to host element `(row, col)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either index is out of range.
    pub fn try_at(&mut self, row: usize, col: usize) -> Result<&mut f32> {
        if row >= self.rows || col >= self.cols {
            return Err(AceleraError::invalid_argument(format!(
                "index ({row}, {col}) out of range for {}x{} matrix",
                self.rows, self.cols
            )));
        }
        Ok(self.at(row, col))
    }

    /// Host row `row` (not synchronized)
    ///
    /// # Panics
    ///
    /// Panics if `row >= rows`.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.cols;
        &self.buffer.host()[start..start + self.cols]
    }

    /// Host data in row-major order (not synchronized)
    #[must_use]
    pub fn host(&self) -> &[f32] {
        self.buffer.host()
    }

    /// Mutable host data in row-major order (not synchronized)
    pub fn host_mut(&mut self) -> &mut [f32] {
        self.buffer.host_mut()
    }

    /// Copy device contents to the host array
    ///
    /// # Errors
    ///
    /// See [`DeviceBuffer::pull_to_host`].
    pub fn pull_to_host(&mut self) -> Result<()> {
        self.buffer.pull_to_host()
    }

    /// Copy host contents to the device mirror
    ///
    /// # Errors
    ///
    /// See [`DeviceBuffer::push_to_device`].
    pub fn push_to_device(&mut self) -> Result<()> {
        self.buffer.push_to_device()
    }

    /// Buffer identifier
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Accelerator holding the device mirror
    #[must_use]
    pub fn accelerator(&self) -> &Accelerator {
        self.buffer.accelerator()
    }

    pub(crate) fn buffer(&self) -> &DeviceBuffer<f32> {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut DeviceBuffer<f32> {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcceleratorConfig;

    fn acc() -> Accelerator {
        Accelerator::new(AcceleratorConfig::default().with_gangs(2)).unwrap()
    }

    #[test]
    fn test_shape_and_registration() {
        let acc = acc();
        let mat = Matrix::new(&acc, 128, 256).unwrap();
        assert_eq!(mat.rows(), 128);
        assert_eq!(mat.cols(), 256);
        assert_eq!(mat.len(), 128 * 256);
        assert_eq!(acc.bytes_in_use(), 128 * 256 * 4);
        let desc = acc.descriptor(mat.id()).unwrap();
        assert_eq!(desc.shape, BufferShape::Grid { rows: 128, cols: 256 });
        assert_eq!(desc.element_size, 4);
    }

    #[test]
    fn test_row_major_addressing() {
        let acc = acc();
        let mut mat = Matrix::new(&acc, 3, 4).unwrap();
        for i in 0..3 {
            for j in 0..4 {
                *mat.at(i, j) = (i * 10 + j) as f32;
            }
        }
        assert_eq!(mat.offset(2, 3), 11);
        assert_eq!(mat.host()[mat.offset(1, 2)], 12.0);
        assert_eq!(mat.row(2), &[20.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn test_get_and_try_at_bounds() {
        let acc = acc();
        let mut mat = Matrix::new(&acc, 2, 2).unwrap();
        assert_eq!(mat.get(1, 1), Some(0.0));
        assert_eq!(mat.get(2, 0), None);
        assert_eq!(mat.get(0, 2), None);
        assert!(mat.try_at(1, 1).is_ok());
        assert!(matches!(
            mat.try_at(0, 2),
            Err(AceleraError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_from_rows_pushes_to_device() {
        let acc = acc();
        let mut mat = Matrix::from_rows(&acc, 3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(mat.buffer().device(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        mat.host_mut().fill(0.0);
        mat.pull_to_host().unwrap();
        assert_eq!(mat.row(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_from_rows_rejects_wrong_length() {
        let acc = acc();
        let err = Matrix::from_rows(&acc, 2, 2, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, AceleraError::InvalidArgument { .. }));
        assert_eq!(acc.live_allocations(), 0);
    }

    #[test]
    fn test_empty_matrix() {
        let acc = acc();
        let mat = Matrix::new(&acc, 0, 5).unwrap();
        assert!(mat.is_empty());
        assert_eq!(mat.rows(), 0);
        assert_eq!(mat.cols(), 5);
    }

    #[test]
    fn test_overflowing_extent() {
        let acc = acc();
        let err = Matrix::new(&acc, usize::MAX / 2, 3).unwrap_err();
        assert!(matches!(err, AceleraError::InvalidArgument { .. }));
    }

    #[test]
    fn test_drop_order_releases_everything() {
        let acc = acc();
        let id = Matrix::new(&acc, 4, 4).unwrap().id();
        assert!(!acc.is_present(id));
        assert_eq!(acc.live_allocations(), 0);
        assert_eq!(acc.live_descriptors(), 0);
    }
}
