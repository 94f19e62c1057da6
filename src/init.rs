//! Device-side initialization
//!
//! [`fill`] writes a constant into every element of a buffer's device copy.
//! The host array is not touched and stays stale until the next
//! `pull_to_host`.
//!
//! Every element is independent, so the index space is simply split into one
//! contiguous block per gang. For a [`Matrix`] the two loops are collapsed into
//! the flat `rows * cols` space before splitting.

use rayon::prelude::*;
use tracing::debug;

use crate::buffer::{DeviceBuffer, Element};
use crate::config::LaunchConfig;
use crate::error::Result;
use crate::matrix::Matrix;
use crate::vector::Vector;

/// Buffers whose device copy can be filled in place
pub trait DeviceFill {
    /// Element type written by the fill
    type Elem: Element;

    /// Fill the device copy using the accelerator's default launch config
    ///
    /// # Errors
    ///
    /// Returns `NotPresent` if the buffer is no longer resident on its
    /// accelerator.
    fn fill_device(&mut self, value: Self::Elem) -> Result<()> {
        let launch = self.target().accelerator().launch_config();
        self.fill_device_with(value, launch)
    }

    /// Fill the device copy with an explicit launch config
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad launch config or `NotPresent` if
    /// the buffer is not resident.
    fn fill_device_with(&mut self, value: Self::Elem, launch: LaunchConfig) -> Result<()> {
        fill_kernel(self.target(), value, launch)
    }

    /// Underlying paired buffer
    fn target(&mut self) -> &mut DeviceBuffer<Self::Elem>;
}

impl DeviceFill for Matrix {
    type Elem = f32;

    fn target(&mut self) -> &mut DeviceBuffer<f32> {
        self.buffer_mut()
    }
}

impl DeviceFill for Vector {
    type Elem = f32;

    fn target(&mut self) -> &mut DeviceBuffer<f32> {
        self.buffer_mut()
    }
}

impl<T: Element> DeviceFill for DeviceBuffer<T> {
    type Elem = T;

    fn target(&mut self) -> &mut DeviceBuffer<T> {
        self
    }
}

/// Fill every device element of `buffer` with `value`
///
/// # Examples
///
/// ```
/// use acelera::{fill, Accelerator, Matrix};
///
/// let acc = Accelerator::host().unwrap();
/// let mut mat = Matrix::new(&acc, 4, 8).unwrap();
/// fill(&mut mat, 1.5).unwrap();
/// assert!(mat.host().iter().all(|&x| x == 0.0)); // host is stale
/// mat.pull_to_host().unwrap();
/// assert!(mat.host().iter().all(|&x| x == 1.5));
/// ```
///
/// # Errors
///
/// Returns `NotPresent` if the buffer is not resident on its accelerator.
pub fn fill<B: DeviceFill + ?Sized>(buffer: &mut B, value: B::Elem) -> Result<()> {
    buffer.fill_device(value)
}

fn fill_kernel<T: Element>(
    buffer: &mut DeviceBuffer<T>,
    value: T,
    launch: LaunchConfig,
) -> Result<()> {
    launch.validate()?;
    let accelerator = buffer.accelerator().clone();
    buffer.ensure_resident_on(&accelerator, "fill")?;

    let extent = buffer.len();
    let block = launch.items_per_gang(extent);
    debug!(
        buffer = %buffer.id(),
        extent,
        gangs = launch.gangs,
        block,
        "launching fill"
    );

    let device = buffer.device_mut();
    accelerator.dispatch(|| {
        device
            .par_chunks_mut(block)
            .for_each(|gang| gang.fill(value));
    });
    Ok(())
}
