use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Per-generation tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Minimum spacing between the *starts* of consecutive admissions.
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,
    /// Concurrency cap for this generation's device semaphore.
    pub max_concurrent: usize,
    /// Consecutive failures before the breaker opens.
    pub fail_threshold: u32,
}

/// Process-wide parameters that apply across every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Aggregate in-flight cap across all devices.
    pub max_concurrent: usize,
    /// How long a breaker stays Open before admitting a probe.
    #[serde(with = "duration_millis")]
    pub open_duration: Duration,
    /// Consecutive successful probes required to close a breaker.
    pub success_threshold: u32,
}

/// Full configuration bundle for a [`Governor`](../hearthnet_governor/struct.Governor.html).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub gen1: GenerationConfig,
    pub gen2: GenerationConfig,
    pub global: GlobalConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            gen1: GenerationConfig {
                min_interval: Duration::from_secs(2),
                max_concurrent: 1,
                fail_threshold: 3,
            },
            gen2: GenerationConfig {
                min_interval: Duration::from_millis(500),
                max_concurrent: 3,
                fail_threshold: 5,
            },
            global: GlobalConfig {
                max_concurrent: 10,
                open_duration: Duration::from_secs(60),
                success_threshold: 2,
            },
        }
    }
}

impl GovernorConfig {
    /// Return the generation-specific config for a (already normalized)
    /// generation. Panics if `generation` is not 1 or 2 — callers must
    /// normalize via [`crate::normalize_generation`] first.
    pub fn generation(&self, generation: crate::Generation) -> GenerationConfig {
        match generation {
            1 => self.gen1,
            2 => self.gen2,
            other => panic!("generation {other} was not normalized before lookup"),
        }
    }

    /// Validate every field in one pass, collecting all violations rather
    /// than stopping at the first.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.gen1.max_concurrent > 2 {
            violations.push(format!(
                "gen1.max_concurrent must be in [0, 2], got {}",
                self.gen1.max_concurrent
            ));
        }
        if self.gen2.max_concurrent > 5 {
            violations.push(format!(
                "gen2.max_concurrent must be in [0, 5], got {}",
                self.gen2.max_concurrent
            ));
        }
        if self.gen1.fail_threshold == 0 {
            violations.push("gen1.fail_threshold must be at least 1".to_string());
        }
        if self.gen2.fail_threshold == 0 {
            violations.push("gen2.fail_threshold must be at least 1".to_string());
        }
        if self.global.max_concurrent < 1 {
            violations.push("global.max_concurrent must be at least 1".to_string());
        }
        if self.global.success_threshold == 0 {
            violations.push("global.success_threshold must be at least 1".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }

    /// Overlay environment variables on top of [`GovernorConfig::default`].
    /// Unparsable or absent variables leave the prior value untouched.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        set_duration_ms_env(&mut config.gen1.min_interval, "HEARTHNET_GEN1_MIN_INTERVAL_MS");
        set_usize_env(&mut config.gen1.max_concurrent, "HEARTHNET_GEN1_MAX_CONCURRENT");
        set_u32_env(&mut config.gen1.fail_threshold, "HEARTHNET_GEN1_FAIL_THRESHOLD");

        set_duration_ms_env(&mut config.gen2.min_interval, "HEARTHNET_GEN2_MIN_INTERVAL_MS");
        set_usize_env(&mut config.gen2.max_concurrent, "HEARTHNET_GEN2_MAX_CONCURRENT");
        set_u32_env(&mut config.gen2.fail_threshold, "HEARTHNET_GEN2_FAIL_THRESHOLD");

        set_usize_env(&mut config.global.max_concurrent, "HEARTHNET_GLOBAL_MAX_CONCURRENT");
        set_duration_ms_env(&mut config.global.open_duration, "HEARTHNET_GLOBAL_OPEN_DURATION_MS");
        set_u32_env(&mut config.global.success_threshold, "HEARTHNET_GLOBAL_SUCCESS_THRESHOLD");

        config
    }
}

fn set_usize_env(field: &mut usize, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *field = value;
        }
    }
}

fn set_u32_env(field: &mut u32, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *field = value;
        }
    }
}

fn set_duration_ms_env(field: &mut Duration, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(millis) = raw.parse() {
            *field = Duration::from_millis(millis);
        }
    }
}

/// Errors raised while validating a [`GovernorConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid governor configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(GovernorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_oversized_gen1_concurrency() {
        let mut config = GovernorConfig::default();
        config.gen1.max_concurrent = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref v) if v.len() == 1));
    }

    #[test]
    fn collects_multiple_violations() {
        let mut config = GovernorConfig::default();
        config.gen1.max_concurrent = 9;
        config.global.max_concurrent = 0;
        let ConfigError::Invalid(violations) = config.validate().unwrap_err();
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn roundtrips_through_json() {
        let config = GovernorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GovernorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
