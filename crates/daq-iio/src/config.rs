//! Context configuration using Figment
//!
//! Configuration is loaded from:
//! 1. built-in defaults
//! 2. a TOML file (optional)
//! 3. environment variables prefixed with `DAQ_IIO_`
//!
//! # Example
//! ```no_run
//! use daq_iio::ContextConfig;
//!
//! let config = ContextConfig::load_from("config/iio.toml")?;
//! println!("timeout: {:?}", config.timeout());
//! # Ok::<(), daq_iio::IioError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{IioError, Result};

/// Environment variable prefix, e.g. `DAQ_IIO_TIMEOUT_MS=500`.
pub const ENV_PREFIX: &str = "DAQ_IIO_";

/// Settings shared by every buffer of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Timeout of blocking calls in milliseconds (0 = wait forever)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum transfers outstanding per hardware ring
    #[serde(default = "default_ring_depth")]
    pub ring_depth: usize,
    /// Blocks per stream when no pool size is given
    #[serde(default = "default_stream_pool_size")]
    pub stream_pool_size: usize,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_ring_depth() -> usize {
    16
}

fn default_stream_pool_size() -> usize {
    4
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            ring_depth: default_ring_depth(),
            stream_pool_size: default_stream_pool_size(),
        }
    }
}

impl ContextConfig {
    /// Load from a TOML file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from defaults and the environment only.
    pub fn from_env() -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        if self.ring_depth == 0 {
            return Err(IioError::Config(
                "ring_depth must be at least 1".to_string(),
            ));
        }
        if self.stream_pool_size == 0 {
            return Err(IioError::Config(
                "stream_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Timeout of blocking calls, `None` to wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms != 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Set the timeout in milliseconds (0 = wait forever).
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum number of outstanding transfers per ring.
    pub fn with_ring_depth(mut self, ring_depth: usize) -> Self {
        self.ring_depth = ring_depth;
        self
    }

    /// Set the default number of blocks per stream.
    pub fn with_stream_pool_size(mut self, stream_pool_size: usize) -> Self {
        self.stream_pool_size = stream_pool_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ContextConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Some(Duration::from_secs(1)));
        assert_eq!(config.stream_pool_size, 4);
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let config = ContextConfig::default().with_timeout_ms(0);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_validation_rejects_zero_depth() {
        let config = ContextConfig::default().with_ring_depth(0);
        assert!(matches!(config.validate(), Err(IioError::Config(_))));

        let config = ContextConfig::default().with_stream_pool_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = 250\nring_depth = 8").unwrap();

        let config = ContextConfig::load_from(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.ring_depth, 8);
        assert_eq!(config.stream_pool_size, 4);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = 250").unwrap();

        std::env::set_var("DAQ_IIO_TIMEOUT_MS", "75");
        let result = ContextConfig::load_from(file.path());
        std::env::remove_var("DAQ_IIO_TIMEOUT_MS");

        assert_eq!(result.unwrap().timeout_ms, 75);
    }

    #[test]
    #[serial]
    fn test_invalid_file_value_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ring_depth = 0").unwrap();

        let err = ContextConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("ring_depth"));
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let config = ContextConfig::load_from("/nonexistent/iio.toml").unwrap();
        assert_eq!(config, ContextConfig::default());
    }
}
