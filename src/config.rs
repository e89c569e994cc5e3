use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::counters::COUNTER_LENGTH;
use crate::error::{CountersError, Result};

fn default_max_counters() -> usize {
    1024
}

/// Layout and reuse policy of a counters region, e.g.
/// `max_counters = 256` and `reuse_timeout_ms = 1000`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountersConfig {
    /// Number of counter slots in the region.
    #[serde(default = "default_max_counters")]
    pub max_counters: usize,

    /// How long a freed slot stays out of circulation before its id is handed
    /// out again, so lagging readers do not mistake a new counter for theirs.
    #[serde(default)]
    pub reuse_timeout_ms: u64,
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            max_counters: default_max_counters(),
            reuse_timeout_ms: 0,
        }
    }
}

impl CountersConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|err| CountersError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_counters == 0 {
            return Err(CountersError::InvalidConfig(
                "max_counters must be at least 1".into(),
            ));
        }
        if i32::try_from(self.max_counters).is_err() {
            return Err(CountersError::InvalidConfig(format!(
                "max_counters {} exceeds the counter id range",
                self.max_counters
            )));
        }
        if self.required_capacity().is_none() {
            return Err(CountersError::InvalidConfig(format!(
                "max_counters {} overflows the region size",
                self.max_counters
            )));
        }
        Ok(())
    }

    /// Bytes a region needs to hold every slot.
    pub fn required_capacity(&self) -> Option<usize> {
        self.max_counters.checked_mul(COUNTER_LENGTH)
    }

    pub fn reuse_timeout(&self) -> Duration {
        Duration::from_millis(self.reuse_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CountersConfig::default();
        assert_eq!(config.max_counters, 1024);
        assert_eq!(config.reuse_timeout(), Duration::ZERO);
        assert_eq!(config.required_capacity(), Some(1024 * COUNTER_LENGTH));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_document() {
        let config = CountersConfig::from_toml_str("reuse_timeout_ms = 250").unwrap();
        assert_eq!(config.max_counters, 1024);
        assert_eq!(config.reuse_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn parse_full_document() {
        let config = CountersConfig::from_toml_str(
            "max_counters = 16\nreuse_timeout_ms = 1000\n",
        )
        .unwrap();
        assert_eq!(config.max_counters, 16);
        assert_eq!(config.required_capacity(), Some(16 * COUNTER_LENGTH));
    }

    #[test]
    fn reject_invalid_documents() {
        assert!(matches!(
            CountersConfig::from_toml_str("max_counters = 0"),
            Err(CountersError::InvalidConfig(_))
        ));
        assert!(matches!(
            CountersConfig::from_toml_str("max_counters = 4294967296"),
            Err(CountersError::InvalidConfig(_))
        ));
        assert!(matches!(
            CountersConfig::from_toml_str("slots = 3"),
            Err(CountersError::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.toml");
        std::fs::write(&path, "max_counters = 8").unwrap();

        let config = CountersConfig::load(&path).unwrap();
        assert_eq!(config.max_counters, 8);

        let round_trip = CountersConfig::from_toml_str(&toml::to_string(&config).unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }
}
