//! Configuration options.
//!
//! The library reads a small set of process-wide options when it parses and dumps packet chains.
//! Applications either keep the defaults or load a TOML file with [`load_config`] and activate it
//! with [`install`].

use std::fs;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref ACTIVE: RwLock<ChainConfig> = RwLock::new(ChainConfig::default());
}

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ChainConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ChainConfig = match toml::from_str(&config_str) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Invalid config file {}: {}", path.display(), err);
            return Err(err.into());
        }
    };
    if config.max_chain_length == 0 {
        log::warn!("max_chain_length is 0, no packet can be parsed lazily");
    }
    Ok(config)
}

/// Returns the default configuration:
/// ```toml
/// max_chain_length = 64
/// hexdump_width = 16
/// dump_annotations = true
/// ```
pub fn default_config() -> ChainConfig {
    ChainConfig::default()
}

/// Makes `config` the active configuration of the process.
pub fn install(config: ChainConfig) {
    log::debug!("Installing config: {:?}", config);
    match ACTIVE.write() {
        Ok(mut active) => *active = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// Returns a copy of the active configuration.
pub fn current() -> ChainConfig {
    match ACTIVE.read() {
        Ok(active) => active.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/* --------------------------------------------------------------------------------- */

/// Packet chain options.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Maximum number of interpreters in one chain. Lazy parsing beyond it fails with
    /// [`PacketError::ChainTooLong`](crate::packet::PacketError::ChainTooLong). Defaults to
    /// `64`.
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,

    /// Bytes per line of hex dumps. Defaults to `16`.
    #[serde(default = "default_hexdump_width")]
    pub hexdump_width: usize,

    /// List a packet's annotations when dumping it. Defaults to `true`.
    #[serde(default = "default_dump_annotations")]
    pub dump_annotations: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            max_chain_length: default_max_chain_length(),
            hexdump_width: default_hexdump_width(),
            dump_annotations: default_dump_annotations(),
        }
    }
}

fn default_max_chain_length() -> usize {
    64
}

fn default_hexdump_width() -> usize {
    16
}

fn default_dump_annotations() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: ChainConfig = toml::from_str("hexdump_width = 8").unwrap();
        assert_eq!(config.hexdump_width, 8);
        assert_eq!(config.max_chain_length, 64);
        assert!(config.dump_annotations);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: ChainConfig = toml::from_str("").unwrap();
        assert_eq!(config, default_config());
    }

    #[test]
    fn test_load_config() {
        let path = std::env::temp_dir().join(format!("strata-config-{}.toml", std::process::id()));
        fs::write(&path, "max_chain_length = 8\ndump_annotations = false\n").unwrap();
        let config = load_config(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.max_chain_length, 8);
        assert!(!config.dump_annotations);
        assert_eq!(config.hexdump_width, 16);
    }

    #[test]
    fn test_load_invalid_config() {
        assert!(load_config("/nonexistent/strata.toml").is_err());
        let path = std::env::temp_dir().join(format!("strata-bad-{}.toml", std::process::id()));
        fs::write(&path, "max_chain_length = \"many\"").unwrap();
        let result = load_config(&path);
        fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
