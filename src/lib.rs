//! # Acelera
//!
//! Pure Rust accelerator offload for dense matrix-vector products.
//!
//! Acelera (Spanish: "accelerates") treats a parallel processor as an opaque
//! executor with its own memory space. Host arrays and their accelerator
//! mirrors are allocated together, kept apart, and made consistent only by
//! explicit `push_to_device` / `pull_to_host` calls.
//!
//! ## Features
//!
//! - **Explicit memory lifecycle**: paired host/device buffers, released
//!   device-first on every exit path
//! - **Two-level parallelism**: coarse "gangs" over output rows, fine "vector"
//!   lanes inside each row's reduction, both tunable per launch
//! - **Device-side init**: constant fills never touch host memory
//! - **Recoverable shape errors**: a mismatched multiply is a no-op with a
//!   reported error
//!
//! ## Example
//!
//! ```rust
//! use acelera::{fill, multiply, Accelerator, Matrix, Vector};
//!
//! let acc = Accelerator::host().unwrap();
//! let mut mat = Matrix::new(&acc, 128, 256).unwrap();
//! let mut vec = Vector::new(&acc, 256).unwrap();
//! let mut out = Vector::new(&acc, 128).unwrap();
//!
//! fill(&mut mat, 1.0).unwrap();
//! fill(&mut vec, 2.0).unwrap();
//! multiply(&mat, &vec, &mut out).unwrap();
//!
//! // Device results are only visible after an explicit pull
//! out.pull_to_host().unwrap();
//! assert!(out.as_slice().iter().all(|&y| y == 512.0));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------+
//! |  fill / multiply          |  <- kernels (init, matvec)
//! +---------------------------+
//! |  Matrix / Vector          |  <- shaped views
//! +---------------------------+
//! |  DeviceBuffer<T>          |  <- host array + device mirror + descriptor
//! +---------------------------+
//! |  Accelerator              |  <- gang pool, memory ledger, transfers
//! +---------------------------+
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 in tests and reports
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::float_cmp)] // Exact comparisons against constant fills
#![allow(clippy::missing_panics_doc)]

pub mod buffer;
pub mod config;
/// Accelerator executor, device memory ledger and descriptor table
pub mod device;
pub mod error;
/// Device-side constant initialization
pub mod init;
/// Two-level matrix-vector multiply
pub mod matvec;
pub mod matrix;
pub mod vector;
/// Host-side verification of pulled results
pub mod verify;

// Re-exports for convenience
pub use buffer::{DeviceBuffer, Element};
pub use config::{AcceleratorConfig, LaunchConfig};
pub use device::{Accelerator, BufferDescriptor, BufferId, BufferShape, TransferStats};
pub use error::{AceleraError, MemorySpace, Result};
pub use init::{fill, DeviceFill};
pub use matrix::Matrix;
pub use matvec::{multiply, multiply_with};
pub use vector::Vector;
pub use verify::{reference_matvec, Verifier, VerifyReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
