use std::fmt::Display;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::issue::Severity;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name}: threshold tiers must be positive and ascending (info={info}, warning={warning}, critical={critical})")]
    Tiers {
        name: &'static str,
        info: String,
        warning: String,
        critical: String,
    },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("{name} must be within 0..=1, got {value}")]
    Ratio { name: &'static str, value: f64 },
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Ascending `(info, warning, critical)` lower bounds. A value maps to the
/// highest tier whose bound it reaches; bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTiers<T> {
    pub info: T,
    pub warning: T,
    pub critical: T,
}

impl<T: PartialOrd + Copy + Default + Display> ThresholdTiers<T> {
    pub const fn new(info: T, warning: T, critical: T) -> Self {
        Self {
            info,
            warning,
            critical,
        }
    }

    pub fn classify(&self, value: T) -> Option<Severity> {
        if value >= self.critical {
            Some(Severity::Critical)
        } else if value >= self.warning {
            Some(Severity::Warning)
        } else if value >= self.info {
            Some(Severity::Info)
        } else {
            None
        }
    }

    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        // NaN compares false both ways, so NaN bounds fail here.
        let positive = self.info > T::default();
        let ascending = self.info <= self.warning && self.warning <= self.critical;
        if positive && ascending {
            Ok(())
        } else {
            Err(ConfigError::Tiers {
                name,
                info: self.info.to_string(),
                warning: self.warning.to_string(),
                critical: self.critical.to_string(),
            })
        }
    }
}

/// Shape-only or parameter-aware signature grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMode {
    #[default]
    ShapeOnly,
    ParamAware,
}

/// Gap-tolerant run detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Unrelated records allowed between two pattern records of one run.
    pub max_gap: usize,
    pub min_boundary_count: usize,
    /// Minimum share of boundaries whose internal gap is within `max_gap`.
    pub min_proximity_ratio: f64,
    pub max_avg_operations_between: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_gap: 10,
            min_boundary_count: 5,
            min_proximity_ratio: 0.70,
            max_avg_operations_between: 10,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        nonzero("max_gap", self.max_gap)?;
        nonzero("min_boundary_count", self.min_boundary_count)?;
        nonzero("max_avg_operations_between", self.max_avg_operations_between)?;
        if !(0.0..=1.0).contains(&self.min_proximity_ratio) {
            return Err(ConfigError::Ratio {
                name: "min_proximity_ratio",
                value: self.min_proximity_ratio,
            });
        }
        Ok(())
    }
}

/// The parameters every analyzer consumes from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tiers: ThresholdTiers<usize>,
    pub scan: ScanConfig,
    pub max_sampled_queries: usize,
    pub mode: SignatureMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: ThresholdTiers::new(5, 10, 20),
            scan: ScanConfig::default(),
            max_sampled_queries: 20,
            mode: SignatureMode::ShapeOnly,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiers.validate("tiers")?;
        self.scan.validate()?;
        nonzero("max_sampled_queries", self.max_sampled_queries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    pub enabled: bool,
    pub tiers: ThresholdTiers<usize>,
}

impl FrequencyConfig {
    const fn with_tiers(info: usize, warning: usize, critical: usize) -> Self {
        Self {
            enabled: true,
            tiers: ThresholdTiers::new(info, warning, critical),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub enabled: bool,
    pub scan: ScanConfig,
    /// Severity by number of boundaries in the run.
    pub tiers: ThresholdTiers<usize>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan: ScanConfig::default(),
            tiers: ThresholdTiers::new(5, 10, 20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleConfig {
    pub enabled: bool,
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub enabled: bool,
    /// Execution time tiers in milliseconds.
    pub tiers: ThresholdTiers<f64>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tiers: ThresholdTiers::new(100.0, 500.0, 1000.0),
        }
    }
}

/// Configuration of the whole analyzer set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_sampled_queries: usize,
    pub repeated_query: FrequencyConfig,
    pub caching_opportunity: FrequencyConfig,
    pub bulk_operation: FrequencyConfig,
    pub flush_in_loop: FlushConfig,
    /// Tiers on the number of JOINs in one statement.
    pub join_fanout: FrequencyConfig,
    pub unbounded_sort: ToggleConfig,
    /// Tiers on the OFFSET value.
    pub deep_pagination: FrequencyConfig,
    pub null_comparison: ToggleConfig,
    pub empty_in_clause: ToggleConfig,
    pub slow_query: TimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sampled_queries: 20,
            repeated_query: FrequencyConfig::with_tiers(5, 10, 20),
            caching_opportunity: FrequencyConfig::with_tiers(3, 5, 10),
            bulk_operation: FrequencyConfig::with_tiers(5, 20, 50),
            flush_in_loop: FlushConfig::default(),
            join_fanout: FrequencyConfig::with_tiers(4, 6, 8),
            unbounded_sort: ToggleConfig::default(),
            deep_pagination: FrequencyConfig::with_tiers(1000, 5000, 10000),
            null_comparison: ToggleConfig::default(),
            empty_in_clause: ToggleConfig::default(),
            slow_query: TimeConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let overrides: toml::Table =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut merged = match toml::Value::try_from(Config::default()) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => toml::Table::new(),
            Err(e) => return Err(ConfigError::Parse(e.to_string())),
        };
        merge_tables(&mut merged, overrides);

        let config: Config = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        nonzero("max_sampled_queries", self.max_sampled_queries)?;
        self.repeated_query.tiers.validate("repeated_query.tiers")?;
        self.caching_opportunity
            .tiers
            .validate("caching_opportunity.tiers")?;
        self.bulk_operation.tiers.validate("bulk_operation.tiers")?;
        self.flush_in_loop.scan.validate()?;
        self.flush_in_loop.tiers.validate("flush_in_loop.tiers")?;
        self.join_fanout.tiers.validate("join_fanout.tiers")?;
        self.deep_pagination.tiers.validate("deep_pagination.tiers")?;
        self.slow_query.tiers.validate("slow_query.tiers")
    }

    /// Engine parameters for a grouping analyzer driven by `tiers` and
    /// `mode`. Grouping never scans, so the scan section stays at defaults.
    pub fn engine(&self, tiers: ThresholdTiers<usize>, mode: SignatureMode) -> EngineConfig {
        EngineConfig {
            tiers,
            scan: ScanConfig::default(),
            max_sampled_queries: self.max_sampled_queries,
            mode,
        }
    }
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn nonzero(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { name })
    } else {
        Ok(())
    }
}
