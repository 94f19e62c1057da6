//! Paired host/device buffer
//!
//! A [`DeviceBuffer`] owns a host array and a same-sized mirror in accelerator
//! memory. The two copies are only made consistent by explicit calls:
//!
//! - [`DeviceBuffer::push_to_device`] copies host → device
//! - [`DeviceBuffer::pull_to_host`] copies device → host
//!
//! Nothing tracks which side is newer. Reading [`DeviceBuffer::host`] after a
//! kernel wrote the device copy, without a `pull_to_host` in between, returns
//! stale data.

use std::fmt::Debug;

use num_traits::Zero;
use tracing::debug;

use crate::device::{
    Accelerator, BufferDescriptor, BufferId, BufferShape, DescriptorRegistration,
    DeviceAllocation,
};
use crate::error::{AceleraError, MemorySpace, Result};

/// Element types that can live in a [`DeviceBuffer`]
pub trait Element: Copy + Send + Sync + Zero + Debug + 'static {}

impl<T> Element for T where T: Copy + Send + Sync + Zero + Debug + 'static {}

/// Host array with an accelerator-resident mirror
///
/// The device mirror and the descriptor are created right after the host
/// array and torn down before it, on every exit path.
pub struct DeviceBuffer<T: Element> {
    // Field order is drop order: mirror, then descriptor, then host memory.
    device: DeviceAllocation<T>,
    registration: DescriptorRegistration,
    host: Vec<T>,
    shape: BufferShape,
    accelerator: Accelerator,
}

impl<T: Element> DeviceBuffer<T> {
    /// Allocate a linear buffer of `len` elements
    ///
    /// Host contents start zeroed; the device mirror is allocated but not
    /// written from the host.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhaustion` if either allocation fails, or
    /// `InvalidArgument` if the byte size overflows.
    pub fn new(accelerator: &Accelerator, len: usize) -> Result<Self> {
        Self::with_shape(accelerator, BufferShape::Linear(len))
    }

    pub(crate) fn with_shape(accelerator: &Accelerator, shape: BufferShape) -> Result<Self> {
        let extent = match shape {
            BufferShape::Linear(len) => len,
            BufferShape::Grid { rows, cols } => rows.checked_mul(cols).ok_or_else(|| {
                AceleraError::invalid_argument(format!("extent {rows}x{cols} overflows"))
            })?,
        };
        let bytes = extent
            .checked_mul(std::mem::size_of::<T>())
            .filter(|&b| isize::try_from(b).is_ok())
            .ok_or_else(|| {
                AceleraError::invalid_argument(format!("extent {extent} exceeds addressable memory"))
            })?;

        let mut host = Vec::new();
        host.try_reserve_exact(extent)
            .map_err(|_| AceleraError::ResourceExhaustion {
                space: MemorySpace::Host,
                requested_bytes: bytes,
                available_bytes: usize::MAX,
            })?;
        host.resize(extent, T::zero());

        let device = accelerator.allocate::<T>(extent)?;
        let id = BufferId::next();
        let registration = accelerator.register(BufferDescriptor {
            id,
            shape,
            element_size: std::mem::size_of::<T>(),
        });

        debug!(buffer = %id, extent, bytes, "created device buffer");
        Ok(Self {
            device,
            registration,
            host,
            shape,
            accelerator: accelerator.clone(),
        })
    }

    /// Logical element count
    #[must_use]
    pub fn len(&self) -> usize {
        self.host.len()
    }

    /// Whether the buffer holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Buffer identifier
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.registration.id()
    }

    /// Logical shape
    #[must_use]
    pub fn shape(&self) -> BufferShape {
        self.shape
    }

    /// Accelerator owning the device mirror
    #[must_use]
    pub fn accelerator(&self) -> &Accelerator {
        &self.accelerator
    }

    /// Host copy (not synchronized)
    #[must_use]
    pub fn host(&self) -> &[T] {
        &self.host
    }

    /// Mutable host copy (not synchronized)
    pub fn host_mut(&mut self) -> &mut [T] {
        &mut self.host
    }

    /// Copy the device mirror into the host array
    ///
    /// Blocks until the copy completes.
    ///
    /// # Errors
    ///
    /// Returns `TransferSizeMismatch` if the extents diverged, which indicates
    /// a corrupted buffer.
    pub fn pull_to_host(&mut self) -> Result<()> {
        self.accelerator.copy_to_host(&self.device, &mut self.host)
    }

    /// Copy the host array into the device mirror
    ///
    /// Blocks until the copy completes.
    ///
    /// # Errors
    ///
    /// Returns `TransferSizeMismatch` if the extents diverged.
    pub fn push_to_device(&mut self) -> Result<()> {
        self.accelerator.copy_to_device(&self.host, &mut self.device)
    }

    /// Device copy, for kernels
    pub(crate) fn device(&self) -> &[T] {
        self.device.as_slice()
    }

    /// Mutable device copy, for kernels
    pub(crate) fn device_mut(&mut self) -> &mut [T] {
        self.device.as_mut_slice()
    }

    /// Fail unless this buffer is resident on `accelerator`
    pub(crate) fn ensure_resident_on(&self, accelerator: &Accelerator, role: &str) -> Result<()> {
        if !self.accelerator.same_device(accelerator) {
            return Err(AceleraError::NotPresent {
                buffer: self.id().get(),
                reason: format!("{role} operand belongs to a different accelerator"),
            });
        }
        accelerator.ensure_present(self.registration.id(), role)
    }
}

impl<T: Element> Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id())
            .field("shape", &self.shape)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
