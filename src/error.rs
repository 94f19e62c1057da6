//! Error types for acelera
//!
//! A single error enum covers buffer lifecycle, kernel dispatch, configuration
//! and verification failures. Only [`AceleraError::DimensionMismatch`] and
//! [`AceleraError::VerificationFailed`] are recoverable: every other variant
//! leaves the affected buffer or accelerator unusable.

use std::fmt;

use thiserror::Error;

/// Result type alias for acelera operations
pub type Result<T> = std::result::Result<T, AceleraError>;

/// Memory space an allocation was requested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Host (CPU) memory
    Host,
    /// Accelerator-resident memory
    Device,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// Error type for all acelera operations
#[derive(Debug, Error)]
pub enum AceleraError {
    /// Host or device allocation could not be satisfied
    #[error(
        "Out of {space} memory: requested {requested_bytes} bytes, {available_bytes} available"
    )]
    ResourceExhaustion {
        /// Memory space that was exhausted
        space: MemorySpace,
        /// Bytes requested by the failing allocation
        requested_bytes: usize,
        /// Bytes still available in that space (`usize::MAX` when untracked)
        available_bytes: usize,
    },

    /// Matrix/vector shapes are incompatible for a multiply
    #[error(
        "Matrix/vector dimensions incompatible: matrix is {rows}x{cols}, input vector has {vec_len} elements, output vector has {out_len}"
    )]
    DimensionMismatch {
        /// Matrix rows
        rows: usize,
        /// Matrix columns
        cols: usize,
        /// Input vector length
        vec_len: usize,
        /// Output vector length
        out_len: usize,
    },

    /// Invalid argument (extent overflow, bad launch config, index out of range)
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the problem
        reason: String,
    },

    /// Buffer is not resident on the accelerator running the kernel
    #[error("Buffer {buffer} not present on accelerator: {reason}")]
    NotPresent {
        /// Buffer identifier
        buffer: u64,
        /// Description of the problem
        reason: String,
    },

    /// Accelerator could not be brought up
    #[error("Accelerator unavailable: {reason}")]
    DeviceUnavailable {
        /// Description of the problem
        reason: String,
    },

    /// Host and device copies disagree in extent
    #[error("Transfer size mismatch: host has {host_len} elements, device has {device_len}")]
    TransferSizeMismatch {
        /// Host element count
        host_len: usize,
        /// Device element count
        device_len: usize,
    },

    /// Configuration value rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem
        reason: String,
    },

    /// Configuration file could not be read
    #[error("Configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Pulled host data disagrees with the host reference
    #[error(
        "Verification of '{name}' failed: {mismatches}/{checked} elements out of tolerance (max abs error {max_abs_error})"
    )]
    VerificationFailed {
        /// Label of the checked buffer
        name: String,
        /// Number of elements outside tolerance
        mismatches: usize,
        /// Number of elements compared
        checked: usize,
        /// Largest absolute error observed
        max_abs_error: f32,
    },
}

impl AceleraError {
    /// Whether the caller can continue after this error
    ///
    /// A failed multiply or verification leaves every buffer intact; all other
    /// failures abort the lifecycle of the object involved.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::VerificationFailed { .. }
        )
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_is_recoverable() {
        let err = AceleraError::DimensionMismatch {
            rows: 4,
            cols: 5,
            vec_len: 3,
            out_len: 4,
        };
        assert!(err.is_recoverable());
        let msg = err.to_string();
        assert!(msg.contains("4x5"));
        assert!(msg.contains("3 elements"));
    }

    #[test]
    fn test_resource_exhaustion_is_fatal() {
        let err = AceleraError::ResourceExhaustion {
            space: MemorySpace::Device,
            requested_bytes: 1024,
            available_bytes: 512,
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("device"));
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_invalid_argument_helper() {
        let err = AceleraError::invalid_argument("extent overflow");
        assert!(matches!(err, AceleraError::InvalidArgument { ref reason } if reason == "extent overflow"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AceleraError = io.into();
        assert!(matches!(err, AceleraError::ConfigIo(_)));
    }

    #[test]
    fn test_memory_space_display() {
        assert_eq!(MemorySpace::Host.to_string(), "host");
        assert_eq!(MemorySpace::Device.to_string(), "device");
    }
}
