//! Server configuration
//!
//! Listening address, the root directory build work dirs are
//! allocated under, and how long finished builds are retained before
//! eviction.

use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening address (e.g., "0.0.0.0:8080")
    pub listen_addr: String,

    /// Directory under which each build gets its exclusive work dir
    pub build_root: PathBuf,

    /// How long a finished build (report and work dir) stays
    /// queryable before the registry evicts it
    pub retention: Duration,
}

impl Config {
    /// Creates configuration from environment variables with
    /// fallback to defaults.
    ///
    /// Recognized variables:
    /// - KILN_LISTEN_ADDR (default: "0.0.0.0:8080")
    /// - KILN_BUILD_ROOT (default: system temp dir + "kiln-builds")
    /// - KILN_RETENTION_SECS (default: 3600)
    pub fn from_env() -> Self {
        let listen_addr =
            std::env::var("KILN_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let build_root = std::env::var("KILN_BUILD_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("kiln-builds"));

        let retention = std::env::var("KILN_RETENTION_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        Self {
            listen_addr,
            build_root,
            retention,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr.is_empty() {
            anyhow::bail!("listen_addr cannot be empty");
        }

        if self.build_root.as_os_str().is_empty() {
            anyhow::bail!("build_root cannot be empty");
        }

        if self.retention.is_zero() {
            anyhow::bail!("retention must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            build_root: std::env::temp_dir().join("kiln-builds"),
            retention: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.listen_addr = String::new();
        assert!(config.validate().is_err());

        config.listen_addr = "127.0.0.1:0".to_string();
        config.retention = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
