//! Accelerator handle: executor, device memory and descriptor table
//!
//! The accelerator is treated as an opaque parallel executor with its own
//! memory space. On this backend the executor is a dedicated rayon pool (one
//! worker per gang) and device memory is a set of heap allocations that are
//! never aliased with host storage. Data only moves between the two spaces
//! through explicit transfers, which are counted in [`TransferStats`].
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------+
//! |  Matrix / Vector      |  <- host array + device mirror + descriptor
//! +-----------------------+
//! |  Accelerator          |  <- dispatch(), allocate(), register()
//! +-----------------------+
//! |  MemoryLedger         |  <- capacity accounting (ResourceExhaustion)
//! |  descriptor table     |  <- `present` checks for kernel operands
//! +-----------------------+
//! |  rayon::ThreadPool    |  <- gangs
//! +-----------------------+
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffer::Element;
use crate::config::{AcceleratorConfig, LaunchConfig};
use crate::error::{AceleraError, MemorySpace, Result};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique buffer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical shape of a registered buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferShape {
    /// One-dimensional, `len` elements
    Linear(usize),
    /// Two-dimensional row-major grid
    Grid {
        /// Row count
        rows: usize,
        /// Column count
        cols: usize,
    },
}

impl BufferShape {
    /// Total element count
    #[must_use]
    pub fn extent(&self) -> usize {
        match *self {
            Self::Linear(len) => len,
            Self::Grid { rows, cols } => rows * cols,
        }
    }
}

/// Device-visible metadata of a buffer
///
/// Kernels receive extents through their arguments; the descriptor is what the
/// accelerator knows about a buffer independently of its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Buffer identifier
    pub id: BufferId,
    /// Logical shape
    pub shape: BufferShape,
    /// Size of one element in bytes
    pub element_size: usize,
}

/// Direction of a host/device copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Host to device (`push_to_device`)
    HostToDevice,
    /// Device to host (`pull_to_host`)
    DeviceToHost,
}

/// Snapshot of transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Host-to-device copies issued
    pub host_to_device_count: u64,
    /// Bytes copied host to device
    pub host_to_device_bytes: u64,
    /// Device-to-host copies issued
    pub device_to_host_count: u64,
    /// Bytes copied device to host
    pub device_to_host_bytes: u64,
    /// Kernels dispatched
    pub kernel_launches: u64,
}

#[derive(Debug, Default)]
struct TransferCounters {
    h2d_count: AtomicU64,
    h2d_bytes: AtomicU64,
    d2h_count: AtomicU64,
    d2h_bytes: AtomicU64,
    launches: AtomicU64,
}

/// Device memory capacity accounting
#[derive(Debug)]
pub(crate) struct MemoryLedger {
    /// 0 = unlimited
    capacity: usize,
    in_use: AtomicUsize,
    live: AtomicUsize,
}

impl MemoryLedger {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(bytes) {
                Some(next) if self.capacity == 0 || next <= self.capacity => next,
                _ => {
                    return Err(AceleraError::ResourceExhaustion {
                        space: MemorySpace::Device,
                        requested_bytes: bytes,
                        available_bytes: self.available_from(current),
                    })
                },
            };
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.live.fetch_add(1, Ordering::AcqRel);
                    return Ok(());
                },
                Err(observed) => current = observed,
            }
        }
    }

    /// Undo a reservation that never became a live allocation
    fn unreserve(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    fn release(&self, bytes: usize) {
        self.unreserve(bytes);
    }

    fn available_from(&self, in_use: usize) -> usize {
        if self.capacity == 0 {
            usize::MAX
        } else {
            self.capacity.saturating_sub(in_use)
        }
    }
}

/// Accelerator-resident storage for one buffer
///
/// Releases its ledger reservation when dropped.
pub(crate) struct DeviceAllocation<T: Element> {
    data: Box<[T]>,
    bytes: usize,
    ledger: Arc<MemoryLedger>,
}

impl<T: Element> DeviceAllocation<T> {
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Element> Drop for DeviceAllocation<T> {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
        trace!(bytes = self.bytes, "released device mirror");
    }
}

impl<T: Element> fmt::Debug for DeviceAllocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("len", &self.data.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Registration of a buffer descriptor in the accelerator's table
///
/// Deregisters on drop.
#[derive(Debug)]
pub(crate) struct DescriptorRegistration {
    accelerator: Accelerator,
    id: BufferId,
}

impl DescriptorRegistration {
    pub(crate) fn id(&self) -> BufferId {
        self.id
    }
}

impl Drop for DescriptorRegistration {
    fn drop(&mut self) {
        self.accelerator.inner.descriptors().remove(&self.id);
        trace!(buffer = %self.id, "released device descriptor");
    }
}

struct Inner {
    config: AcceleratorConfig,
    launch: LaunchConfig,
    pool: rayon::ThreadPool,
    ledger: Arc<MemoryLedger>,
    descriptors: Mutex<HashMap<BufferId, BufferDescriptor>>,
    transfers: TransferCounters,
}

impl Inner {
    fn descriptors(&self) -> MutexGuard<'_, HashMap<BufferId, BufferDescriptor>> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a parallel accelerator
///
/// Cloning is cheap; all clones refer to the same executor and memory space.
///
/// # Examples
///
/// ```
/// use acelera::{Accelerator, AcceleratorConfig};
///
/// let acc = Accelerator::new(AcceleratorConfig::default().with_gangs(2)).unwrap();
/// assert_eq!(acc.launch_config().gangs, 2);
/// assert_eq!(acc.bytes_in_use(), 0);
/// ```
#[derive(Clone)]
pub struct Accelerator {
    inner: Arc<Inner>,
}

impl Accelerator {
    /// Bring up an accelerator
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is invalid, or
    /// `DeviceUnavailable` if the executor cannot be started.
    pub fn new(config: AcceleratorConfig) -> Result<Self> {
        config.validate()?;
        let launch = config.launch_config();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(launch.gangs)
            .thread_name(|i| format!("acelera-gang-{i}"))
            .build()
            .map_err(|e| AceleraError::DeviceUnavailable {
                reason: e.to_string(),
            })?;

        debug!(
            gangs = launch.gangs,
            vector_length = launch.vector_length,
            device_memory_bytes = config.device_memory_bytes,
            "accelerator initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                ledger: Arc::new(MemoryLedger::new(config.device_memory_bytes)),
                config,
                launch,
                pool,
                descriptors: Mutex::new(HashMap::new()),
                transfers: TransferCounters::default(),
            }),
        })
    }

    /// Accelerator with the default configuration
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the executor cannot be started.
    pub fn host() -> Result<Self> {
        Self::new(AcceleratorConfig::default())
    }

    /// Accelerator configured from `ACELERA_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for malformed variables, or `DeviceUnavailable`.
    pub fn from_env() -> Result<Self> {
        Self::new(AcceleratorConfig::from_env()?)
    }

    /// Configuration this accelerator was created with
    #[must_use]
    pub fn config(&self) -> &AcceleratorConfig {
        &self.inner.config
    }

    /// Default launch configuration for kernels
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        self.inner.launch
    }

    /// Whether two handles refer to the same accelerator
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run a parallel region on the accelerator
    ///
    /// Blocks the calling thread until every unit of work in `op` has
    /// completed. There is no asynchronous variant.
    pub fn dispatch<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.inner.transfers.launches.fetch_add(1, Ordering::Relaxed);
        self.inner.pool.install(op)
    }

    /// Bytes of device memory currently allocated
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.inner.ledger.in_use.load(Ordering::Acquire)
    }

    /// Number of live device mirrors
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.inner.ledger.live.load(Ordering::Acquire)
    }

    /// Device memory capacity in bytes (`None` = unlimited)
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match self.inner.ledger.capacity {
            0 => None,
            bytes => Some(bytes),
        }
    }

    /// Number of registered buffer descriptors
    #[must_use]
    pub fn live_descriptors(&self) -> usize {
        self.inner.descriptors().len()
    }

    /// Whether a buffer is resident on this accelerator
    #[must_use]
    pub fn is_present(&self, id: BufferId) -> bool {
        self.inner.descriptors().contains_key(&id)
    }

    /// Descriptor of a resident buffer
    #[must_use]
    pub fn descriptor(&self, id: BufferId) -> Option<BufferDescriptor> {
        self.inner.descriptors().get(&id).copied()
    }

    /// Snapshot of the transfer counters
    #[must_use]
    pub fn transfer_stats(&self) -> TransferStats {
        let t = &self.inner.transfers;
        TransferStats {
            host_to_device_count: t.h2d_count.load(Ordering::Relaxed),
            host_to_device_bytes: t.h2d_bytes.load(Ordering::Relaxed),
            device_to_host_count: t.d2h_count.load(Ordering::Relaxed),
            device_to_host_bytes: t.d2h_bytes.load(Ordering::Relaxed),
            kernel_launches: t.launches.load(Ordering::Relaxed),
        }
    }

    /// Fail unless `id` is registered with this accelerator
    pub(crate) fn ensure_present(&self, id: BufferId, role: &str) -> Result<()> {
        if self.is_present(id) {
            Ok(())
        } else {
            Err(AceleraError::NotPresent {
                buffer: id.get(),
                reason: format!("{role} operand is not resident on this accelerator"),
            })
        }
    }

    /// Allocate a zeroed device mirror of `len` elements
    pub(crate) fn allocate<T: Element>(&self, len: usize) -> Result<DeviceAllocation<T>> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| {
                AceleraError::invalid_argument(format!("device extent {len} overflows"))
            })?;
        let ledger = Arc::clone(&self.inner.ledger);
        ledger.reserve(bytes)?;

        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            ledger.unreserve(bytes);
            return Err(AceleraError::ResourceExhaustion {
                space: MemorySpace::Device,
                requested_bytes: bytes,
                available_bytes: ledger.available_from(self.bytes_in_use()),
            });
        }
        data.resize(len, T::zero());

        debug!(len, bytes, "allocated device mirror");
        Ok(DeviceAllocation {
            data: data.into_boxed_slice(),
            bytes,
            ledger,
        })
    }

    /// Register a buffer descriptor; it stays resident until the guard drops
    pub(crate) fn register(&self, descriptor: BufferDescriptor) -> DescriptorRegistration {
        self.inner.descriptors().insert(descriptor.id, descriptor);
        debug!(buffer = %descriptor.id, extent = descriptor.shape.extent(), "registered device descriptor");
        DescriptorRegistration {
            accelerator: self.clone(),
            id: descriptor.id,
        }
    }

    /// Copy `host` into the device mirror
    pub(crate) fn copy_to_device<T: Element>(
        &self,
        host: &[T],
        device: &mut DeviceAllocation<T>,
    ) -> Result<()> {
        check_transfer(host.len(), device.len())?;
        device.as_mut_slice().copy_from_slice(host);
        self.record(TransferDirection::HostToDevice, std::mem::size_of_val(host));
        Ok(())
    }

    /// Copy the device mirror into `host`
    pub(crate) fn copy_to_host<T: Element>(
        &self,
        device: &DeviceAllocation<T>,
        host: &mut [T],
    ) -> Result<()> {
        check_transfer(host.len(), device.len())?;
        host.copy_from_slice(device.as_slice());
        self.record(TransferDirection::DeviceToHost, std::mem::size_of_val(host));
        Ok(())
    }

    fn record(&self, direction: TransferDirection, bytes: usize) {
        let t = &self.inner.transfers;
        let bytes = bytes as u64;
        match direction {
            TransferDirection::HostToDevice => {
                t.h2d_count.fetch_add(1, Ordering::Relaxed);
                t.h2d_bytes.fetch_add(bytes, Ordering::Relaxed);
            },
            TransferDirection::DeviceToHost => {
                t.d2h_count.fetch_add(1, Ordering::Relaxed);
                t.d2h_bytes.fetch_add(bytes, Ordering::Relaxed);
            },
        }
        debug!(?direction, bytes, "transfer complete");
    }
}

fn check_transfer(host_len: usize, device_len: usize) -> Result<()> {
    if host_len == device_len {
        Ok(())
    } else {
        Err(AceleraError::TransferSizeMismatch {
            host_len,
            device_len,
        })
    }
}

impl fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accelerator")
            .field("launch", &self.inner.launch)
            .field("bytes_in_use", &self.bytes_in_use())
            .field("live_allocations", &self.live_allocations())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accelerator(capacity: usize) -> Accelerator {
        Accelerator::new(
            AcceleratorConfig::default()
                .with_gangs(2)
                .with_device_memory_bytes(capacity),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = Accelerator::new(AcceleratorConfig::default().with_vector_length(0));
        assert!(matches!(result, Err(AceleraError::InvalidConfig { .. })));
    }

    #[test]
    fn test_dispatch_runs_on_pool() {
        let acc = accelerator(0);
        let threads = acc.dispatch(rayon::current_num_threads);
        assert_eq!(threads, 2);
        assert_eq!(acc.transfer_stats().kernel_launches, 1);
    }

    #[test]
    fn test_allocation_accounting() {
        let acc = accelerator(0);
        let alloc = acc.allocate::<f32>(16).unwrap();
        assert_eq!(alloc.len(), 16);
        assert!(alloc.as_slice().iter().all(|&x| x == 0.0));
        assert_eq!(acc.bytes_in_use(), 64);
        assert_eq!(acc.live_allocations(), 1);
        drop(alloc);
        assert_eq!(acc.bytes_in_use(), 0);
        assert_eq!(acc.live_allocations(), 0);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let acc = accelerator(64);
        let first = acc.allocate::<f32>(12).unwrap();
        let err = acc.allocate::<f32>(8).unwrap_err();
        match err {
            AceleraError::ResourceExhaustion {
                space,
                requested_bytes,
                available_bytes,
            } => {
                assert_eq!(space, MemorySpace::Device);
                assert_eq!(requested_bytes, 32);
                assert_eq!(available_bytes, 16);
            },
            other => panic!("unexpected error: {other}"),
        }
        // Failed reservation leaves the ledger untouched
        assert_eq!(acc.bytes_in_use(), 48);
        assert_eq!(acc.live_allocations(), 1);
        drop(first);
        assert!(acc.allocate::<f32>(16).is_ok());
    }

    #[test]
    fn test_allocation_overflow_is_invalid_argument() {
        let acc = accelerator(0);
        let err = acc.allocate::<f32>(usize::MAX).unwrap_err();
        assert!(matches!(err, AceleraError::InvalidArgument { .. }));
        assert_eq!(acc.bytes_in_use(), 0);
    }

    #[test]
    fn test_descriptor_registration_lifecycle() {
        let acc = accelerator(0);
        let id = BufferId::next();
        let guard = acc.register(BufferDescriptor {
            id,
            shape: BufferShape::Grid { rows: 2, cols: 3 },
            element_size: 4,
        });
        assert!(acc.is_present(id));
        assert_eq!(acc.descriptor(id).map(|d| d.shape.extent()), Some(6));
        assert!(acc.ensure_present(id, "input").is_ok());
        drop(guard);
        assert!(!acc.is_present(id));
        assert!(matches!(
            acc.ensure_present(id, "input"),
            Err(AceleraError::NotPresent { .. })
        ));
    }

    #[test]
    fn test_transfers_are_counted() {
        let acc = accelerator(0);
        let mut alloc = acc.allocate::<f32>(4).unwrap();
        acc.copy_to_device(&[1.0, 2.0, 3.0, 4.0], &mut alloc).unwrap();
        let mut host = [0.0f32; 4];
        acc.copy_to_host(&alloc, &mut host).unwrap();
        assert_eq!(host, [1.0, 2.0, 3.0, 4.0]);

        let stats = acc.transfer_stats();
        assert_eq!(stats.host_to_device_count, 1);
        assert_eq!(stats.host_to_device_bytes, 16);
        assert_eq!(stats.device_to_host_count, 1);
        assert_eq!(stats.device_to_host_bytes, 16);
    }

    #[test]
    fn test_transfer_size_mismatch() {
        let acc = accelerator(0);
        let mut alloc = acc.allocate::<f32>(4).unwrap();
        let err = acc.copy_to_device(&[1.0, 2.0], &mut alloc).unwrap_err();
        assert!(matches!(
            err,
            AceleraError::TransferSizeMismatch {
                host_len: 2,
                device_len: 4
            }
        ));
    }

    #[test]
    fn test_same_device() {
        let a = accelerator(0);
        let b = a.clone();
        let c = accelerator(0);
        assert!(a.same_device(&b));
        assert!(!a.same_device(&c));
    }

    #[test]
    fn test_buffer_ids_are_unique() {
        let a = BufferId::next();
        let b = BufferId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
