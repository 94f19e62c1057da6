//! Accelerator and launch configuration
//!
//! [`AcceleratorConfig`] describes how the accelerator is brought up: how many
//! coarse-grained execution units ("gangs") it runs, the default fine-grained
//! vector length, and how much device memory it may hand out. It can be built
//! in code, read from the environment, or loaded from a JSON file.
//!
//! [`LaunchConfig`] is the per-dispatch view of the same two parallelism
//! dimensions and can be overridden per kernel launch.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AceleraError, Result};

/// Environment variable overriding the gang count
pub const ENV_GANGS: &str = "ACELERA_GANGS";
/// Environment variable overriding the vector length
pub const ENV_VECTOR_LENGTH: &str = "ACELERA_VECTOR_LENGTH";
/// Environment variable overriding the device memory capacity (bytes)
pub const ENV_DEVICE_MEMORY: &str = "ACELERA_DEVICE_MEMORY";

/// Default fine-grained vector length (one GPU warp)
pub const DEFAULT_VECTOR_LENGTH: usize = 32;

/// Upper bound on the fine-grained vector length
pub const MAX_VECTOR_LENGTH: usize = 1024;

/// Accelerator bring-up configuration
///
/// # Examples
///
/// ```
/// use acelera::AcceleratorConfig;
///
/// let config = AcceleratorConfig::default()
///     .with_gangs(4)
///     .with_vector_length(16)
///     .with_device_memory_bytes(1 << 20);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.resolved_gangs(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Coarse-grained execution units (0 = one per available core)
    pub gangs: usize,
    /// Fine-grained lanes per reduction
    pub vector_length: usize,
    /// Device memory capacity in bytes (0 = unlimited)
    pub device_memory_bytes: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            gangs: 0,
            vector_length: DEFAULT_VECTOR_LENGTH,
            device_memory_bytes: 0,
        }
    }
}

impl AcceleratorConfig {
    /// Set the gang count
    #[must_use]
    pub fn with_gangs(mut self, gangs: usize) -> Self {
        self.gangs = gangs;
        self
    }

    /// Set the vector length
    #[must_use]
    pub fn with_vector_length(mut self, vector_length: usize) -> Self {
        self.vector_length = vector_length;
        self
    }

    /// Set the device memory capacity in bytes
    #[must_use]
    pub fn with_device_memory_bytes(mut self, bytes: usize) -> Self {
        self.device_memory_bytes = bytes;
        self
    }

    /// Gang count with `0` resolved to the available core count
    #[must_use]
    pub fn resolved_gangs(&self) -> usize {
        if self.gangs == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.gangs
        }
    }

    /// Default launch configuration derived from this config
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            gangs: self.resolved_gangs(),
            vector_length: self.vector_length,
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the vector length is zero or exceeds
    /// [`MAX_VECTOR_LENGTH`].
    pub fn validate(&self) -> Result<()> {
        if self.vector_length == 0 {
            return Err(AceleraError::invalid_config("vector_length must be > 0"));
        }
        if self.vector_length > MAX_VECTOR_LENGTH {
            return Err(AceleraError::invalid_config(format!(
                "vector_length {} exceeds maximum {}",
                self.vector_length, MAX_VECTOR_LENGTH
            )));
        }
        Ok(())
    }

    /// Defaults overridden by `ACELERA_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is set but not a non-negative
    /// integer, or if the resulting config fails validation.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(gangs) = read_env_usize(ENV_GANGS)? {
            config.gangs = gangs;
        }
        if let Some(vector_length) = read_env_usize(ENV_VECTOR_LENGTH)? {
            config.vector_length = vector_length;
        }
        if let Some(bytes) = read_env_usize(ENV_DEVICE_MEMORY)? {
            config.device_memory_bytes = bytes;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigIo` if the file cannot be read, `ConfigParse` if it is
    /// not valid JSON, or `InvalidConfig` if validation fails.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

fn read_env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<usize>().map(Some).map_err(|e| {
            AceleraError::invalid_config(format!("{name}={raw:?} is not a valid count: {e}"))
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(AceleraError::invalid_config(format!("{name}: {e}"))),
    }
}

/// Two-level launch configuration for a kernel dispatch
///
/// `gangs` is the coarse-grained dimension (independent row blocks),
/// `vector_length` the fine-grained one (lanes of a single reduction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Coarse-grained execution units
    pub gangs: usize,
    /// Fine-grained lanes per gang
    pub vector_length: usize,
}

impl LaunchConfig {
    /// Create a launch configuration
    #[must_use]
    pub fn new(gangs: usize, vector_length: usize) -> Self {
        Self {
            gangs,
            vector_length,
        }
    }

    /// Validate the launch dimensions
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either dimension is zero or the vector
    /// length exceeds [`MAX_VECTOR_LENGTH`].
    pub fn validate(&self) -> Result<()> {
        if self.gangs == 0 {
            return Err(AceleraError::invalid_argument("launch gangs must be > 0"));
        }
        if self.vector_length == 0 || self.vector_length > MAX_VECTOR_LENGTH {
            return Err(AceleraError::invalid_argument(format!(
                "launch vector_length must be in 1..={MAX_VECTOR_LENGTH}, got {}",
                self.vector_length
            )));
        }
        Ok(())
    }

    /// Number of consecutive work items each gang receives
    #[must_use]
    pub fn items_per_gang(&self, items: usize) -> usize {
        items.div_ceil(self.gangs.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        std::env::remove_var(ENV_GANGS);
        std::env::remove_var(ENV_VECTOR_LENGTH);
        std::env::remove_var(ENV_DEVICE_MEMORY);
    }

    #[test]
    fn test_default_config() {
        let config = AcceleratorConfig::default();
        assert_eq!(config.gangs, 0);
        assert_eq!(config.vector_length, DEFAULT_VECTOR_LENGTH);
        assert_eq!(config.device_memory_bytes, 0);
        assert!(config.resolved_gangs() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_launch_config() {
        let config = AcceleratorConfig::default()
            .with_gangs(3)
            .with_vector_length(8);
        assert_eq!(config.launch_config(), LaunchConfig::new(3, 8));
    }

    #[test]
    fn test_validate_rejects_zero_vector_length() {
        let config = AcceleratorConfig::default().with_vector_length(0);
        assert!(matches!(
            config.validate(),
            Err(AceleraError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_huge_vector_length() {
        let config = AcceleratorConfig::default().with_vector_length(MAX_VECTOR_LENGTH + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_launch_config_validate() {
        assert!(LaunchConfig::new(1, 1).validate().is_ok());
        assert!(LaunchConfig::new(0, 32).validate().is_err());
        assert!(LaunchConfig::new(4, 0).validate().is_err());
    }

    #[test]
    fn test_items_per_gang() {
        let launch = LaunchConfig::new(4, 32);
        assert_eq!(launch.items_per_gang(128), 32);
        assert_eq!(launch.items_per_gang(130), 33);
        assert_eq!(launch.items_per_gang(3), 1);
        assert_eq!(launch.items_per_gang(0), 1);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var(ENV_GANGS, "6");
        std::env::set_var(ENV_VECTOR_LENGTH, "64");
        std::env::set_var(ENV_DEVICE_MEMORY, "4096");
        let config = AcceleratorConfig::from_env().unwrap();
        clear_env();
        assert_eq!(config.gangs, 6);
        assert_eq!(config.vector_length, 64);
        assert_eq!(config.device_memory_bytes, 4096);
    }

    #[test]
    #[serial]
    fn test_from_env_unset_is_default() {
        clear_env();
        let config = AcceleratorConfig::from_env().unwrap();
        assert_eq!(config, AcceleratorConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        std::env::set_var(ENV_GANGS, "lots");
        let result = AcceleratorConfig::from_env();
        clear_env();
        assert!(matches!(result, Err(AceleraError::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"gangs": 2}}"#).unwrap();
        let config = AcceleratorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.gangs, 2);
        assert_eq!(config.vector_length, DEFAULT_VECTOR_LENGTH);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let result = AcceleratorConfig::from_json_file(file.path());
        assert!(matches!(result, Err(AceleraError::ConfigParse(_))));
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = AcceleratorConfig::from_json_file("/nonexistent/acelera.json");
        assert!(matches!(result, Err(AceleraError::ConfigIo(_))));
    }

    #[test]
    fn test_json_roundtrip_of_launch_config() {
        let launch = LaunchConfig::new(8, 16);
        let json = serde_json::to_string(&launch).unwrap();
        let back: LaunchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, launch);
    }
}
