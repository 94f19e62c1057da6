//! Dense vector with an accelerator mirror

use crate::buffer::DeviceBuffer;
use crate::device::{Accelerator, BufferId};
use crate::error::{AceleraError, Result};

/// 1D `f32` vector stored in a [`DeviceBuffer`]
///
/// # Examples
///
/// ```
/// use acelera::{Accelerator, Vector};
///
/// let acc = Accelerator::host().unwrap();
/// let mut v = Vector::from_slice(&acc, &[1.0, 2.0]).unwrap();
/// v.host_mut().fill(0.0);
/// v.pull_to_host().unwrap();
/// assert_eq!(v.as_slice(), &[1.0, 2.0]);
/// ```
#[derive(Debug)]
pub struct Vector {
    buffer: DeviceBuffer<f32>,
}

impl Vector {
    /// Allocate a vector of `len` elements on host and device
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhaustion` if an allocation fails.
    pub fn new(accelerator: &Accelerator, len: usize) -> Result<Self> {
        Ok(Self {
            buffer: DeviceBuffer::new(accelerator, len)?,
        })
    }

    /// Build a vector from host data and push it to the device
    ///
    /// # Errors
    ///
    /// See [`Vector::new`].
    pub fn from_slice(accelerator: &Accelerator, data: &[f32]) -> Result<Self> {
        let mut vec = Self::new(accelerator, data.len())?;
        vec.host_mut().copy_from_slice(data);
        vec.push_to_device()?;
        Ok(vec)
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the vector is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Mutable reference to host element `i`
    ///
    /// # Panics
    ///
    /// Panics if `i >= len`.
    #[inline]
    pub fn at(&mut self, i: usize) -> &mut f32 {
        &mut self.buffer.host_mut()[i]
    }

    /// Checked read of host element `i`
    #[must_use]
    pub fn get(&self, i: usize) -> Option<f32> {
        self.buffer.host().get(i).copied()
    }

    /// Checked mutable access to host element `i`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `i` is out of range.
    pub fn try_at(&mut self, i: usize) -> Result<&mut f32> {
        let len = self.len();
        self.buffer.host_mut().get_mut(i).ok_or_else(|| {
            AceleraError::invalid_argument(format!("index {i} out of range for length {len}"))
        })
    }

    /// Host data (not synchronized)
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        self.buffer.host()
    }

    /// Mutable host data (not synchronized)
    pub fn host_mut(&mut self) -> &mut [f32] {
        self.buffer.host_mut()
    }

    /// Copy of the host data (not synchronized)
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.buffer.host().to_vec()
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
