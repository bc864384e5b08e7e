//! Configuration loading and typed config structures for the Highlander
//! simulation.
//!
//! The canonical configuration lives in `highlander-config.yaml` at the
//! project root. Every field has a default, so an empty file (or no file at
//! all) yields the classic three-immortal duel.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Environment variable overriding `population.size`.
pub const ENV_POPULATION: &str = "HIGHLANDER_POPULATION";

/// Environment variable overriding `seed`.
pub const ENV_SEED: &str = "HIGHLANDER_SEED";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its valid range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong and where.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `highlander-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Who fights.
    #[serde(default)]
    pub population: PopulationConfig,

    /// How fast they fight.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Base seed for per-immortal RNGs. `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Bounds of a headless run.
    #[serde(default)]
    pub run: RunConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where combat reports go.
    #[serde(default)]
    pub report: ReportConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are not applied here; call
    /// [`apply_env_overrides`](Self::apply_env_overrides) afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Override values from environment variables.
    ///
    /// - `HIGHLANDER_POPULATION` overrides `population.size`
    /// - `HIGHLANDER_SEED` overrides `seed`
    ///
    /// `lookup` resolves a variable name to its value, which keeps this
    /// testable without touching the process environment. Pass
    /// `|key| std::env::var(key).ok()` for the real thing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but does not
    /// parse as an unsigned integer.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup(ENV_POPULATION) {
            self.population.size = val
                .trim()
                .parse()
                .map_err(|e| invalid(format!("{ENV_POPULATION}={val:?}: {e}")))?;
        }
        if let Some(val) = lookup(ENV_SEED) {
            let seed = val
                .trim()
                .parse()
                .map_err(|e| invalid(format!("{ENV_SEED}={val:?}: {e}")))?;
            self.seed = Some(seed);
        }
        Ok(())
    }

    /// Check every value is in range before any immortal is created.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let population = &self.population;
        if population.size == 0 {
            return Err(invalid("population.size must be at least 1"));
        }
        if population.initial_health <= 0 {
            return Err(invalid(format!(
                "population.initial_health must be positive, got {}",
                population.initial_health
            )));
        }
        if population.damage <= 0 {
            return Err(invalid(format!(
                "population.damage must be positive, got {}",
                population.damage
            )));
        }
        if population.total_health().is_none() {
            return Err(invalid(format!(
                "population.size x population.initial_health overflows i64 ({} x {})",
                population.size, population.initial_health
            )));
        }
        if self.run.checkpoint_interval_ms == 0 {
            return Err(invalid("run.checkpoint_interval_ms must be at least 1"));
        }
        if self.run.quiescence_timeout_ms == 0 {
            return Err(invalid("run.quiescence_timeout_ms must be at least 1"));
        }
        if self.report.channel_capacity == 0 {
            return Err(invalid("report.channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Population configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of immortals to create.
    #[serde(default = "default_population_size")]
    pub size: u32,

    /// Health each immortal starts with.
    #[serde(default = "default_initial_health")]
    pub initial_health: i64,

    /// Health transferred per successful attack.
    #[serde(default = "default_damage")]
    pub damage: i64,

    /// Display names are this prefix followed by the immortal's id.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl PopulationConfig {
    /// `size x initial_health`, the conserved health sum, if it fits.
    pub fn total_health(&self) -> Option<i64> {
        i64::from(self.size).checked_mul(self.initial_health)
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            initial_health: default_initial_health(),
            damage: default_damage(),
            name_prefix: default_name_prefix(),
        }
    }
}

/// Loop pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Milliseconds each immortal rests between iterations. Zero yields
    /// without sleeping.
    #[serde(default = "default_yield_ms")]
    pub yield_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            yield_ms: default_yield_ms(),
        }
    }
}

/// Bounds of a headless run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Total run time. Zero runs until one immortal remains or the
    /// operator stops the run.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Time between conservation checkpoints.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// How long a checkpoint or shutdown waits for every loop to settle.
    #[serde(default = "default_quiescence_timeout_ms")]
    pub quiescence_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            quiescence_timeout_ms: default_quiescence_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Which built-in sink receives combat reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log each report line through `tracing`, inside the combat section.
    Tracing,
    /// Forward reports over a bounded channel to a drain task.
    #[default]
    Channel,
    /// Keep reports in memory.
    Memory,
    /// Discard reports.
    Null,
}

/// Report sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Which sink to use.
    #[serde(default)]
    pub sink: SinkKind,

    /// Buffer size of the channel sink.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_population_size() -> u32 {
    3
}

const fn default_initial_health() -> i64 {
    100
}

const fn default_damage() -> i64 {
    10
}

fn default_name_prefix() -> String {
    "im".to_owned()
}

const fn default_yield_ms() -> u64 {
    1
}

const fn default_duration_ms() -> u64 {
    5_000
}

const fn default_checkpoint_interval_ms() -> u64 {
    1_000
}

const fn default_quiescence_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_channel_capacity() -> usize {
    1_024
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn default_config_is_the_classic_duel() {
        let config = SimulationConfig::default();
        assert_eq!(config.population.size, 3);
        assert_eq!(config.population.initial_health, 100);
        assert_eq!(config.population.damage, 10);
        assert_eq!(config.population.total_health(), Some(300));
        assert_eq!(config.seed, None);
        assert_eq!(config.report.sink, SinkKind::Channel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        assert_eq!(SimulationConfig::parse("").unwrap(), SimulationConfig::default());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
population:
  size: 8
  initial_health: 250
  damage: 25
  name_prefix: "mac"

pacing:
  yield_ms: 0

seed: 1985

run:
  duration_ms: 10000
  checkpoint_interval_ms: 500
  quiescence_timeout_ms: 750

logging:
  level: "debug"

report:
  sink: channel
  channel_capacity: 64
"#;
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.population.size, 8);
        assert_eq!(config.population.name_prefix, "mac");
        assert_eq!(config.pacing.yield_ms, 0);
        assert_eq!(config.seed, Some(1985));
        assert_eq!(config.run.checkpoint_interval_ms, 500);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.report.sink, SinkKind::Channel);
        assert_eq!(config.report.channel_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = SimulationConfig::parse("population:\n  size: 12\n").unwrap();
        assert_eq!(config.population.size, 12);
        assert_eq!(config.population.initial_health, 100);
        assert_eq!(config.run, RunConfig::default());
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let result = SimulationConfig::parse("population: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = SimulationConfig::default();
        config.population.size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = SimulationConfig::default();
        config.population.damage = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.population.initial_health = -5;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.population.size = u32::MAX;
        config.population.initial_health = i64::MAX / 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_replace_size_and_seed() {
        let vars: BTreeMap<&str, &str> =
            BTreeMap::from([(ENV_POPULATION, "7"), (ENV_SEED, " 99 ")]);
        let mut config = SimulationConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.population.size, 7);
        assert_eq!(config.seed, Some(99));
    }

    #[test]
    fn unparsable_env_override_is_an_error() {
        let mut config = SimulationConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == ENV_POPULATION).then(|| "lots".to_owned())
        });
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        assert_eq!(config.population.size, 3);
    }
}
