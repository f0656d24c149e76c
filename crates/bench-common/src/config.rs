//! Configuration structures for the benchmark harness.
//!
//! Benchmark parameters (stack sizes, priorities, delays) are fixed at
//! configuration time. Supports TOML deserialization with defaults that
//! reproduce the reference run: 1024-word stacks, priority 0, 1000-tick
//! delays and an effectively unbounded mutex timeout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default stack depth, in words, for every benchmark task.
pub const DEFAULT_STACK_WORDS: usize = 1024;

/// Default mutex acquisition timeout in ticks. Large but finite so that a
/// kernel ordering fault surfaces as a timeout instead of a hang.
pub const DEFAULT_LOCK_TIMEOUT_TICKS: u32 = 0x0FFF_FFFF;

/// Top-level benchmark configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Task creation / deletion benchmark.
    pub lifecycle: LifecycleConfig,

    /// Context switch and mutex benchmark.
    pub handoff: HandoffConfig,

    /// Simulated kernel parameters.
    pub kernel: KernelConfig,

    /// Repeated creation/deletion over a range of stack sizes.
    pub sweep: SweepConfig,
}

/// Task lifecycle benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Stack depth of the measured task, in words.
    pub stack_size: usize,

    /// Priority of the measured task.
    pub priority: u8,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_WORDS,
            priority: 0,
        }
    }
}

/// Cross-task handoff benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Stack depth of both handoff tasks, in words.
    pub stack_size: usize,

    /// Shared priority of both handoff tasks.
    pub priority: u8,

    /// Ticks the sending task blocks for to force the switch.
    pub switch_delay_ticks: u32,

    /// Ticks the receiving task blocks for after reporting.
    pub settle_delay_ticks: u32,

    /// Mutex acquisition timeout, in ticks.
    pub lock_timeout_ticks: u32,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_WORDS,
            priority: 0,
            switch_delay_ticks: 1000,
            settle_delay_ticks: 1000,
            lock_timeout_ticks: DEFAULT_LOCK_TIMEOUT_TICKS,
        }
    }
}

/// Simulated kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Length of one scheduler tick.
    #[serde(with = "humantime_serde")]
    pub tick_period: Duration,

    /// Bytes available for task stacks and control blocks.
    pub heap_size: usize,

    /// CPU(s) every task thread is pinned to.
    pub cpu_affinity: CpuAffinity,

    /// Check each task's stack depth at every kernel call.
    pub stack_check: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(1),
            heap_size: 256 * 1024,
            cpu_affinity: CpuAffinity::Single(0),
            stack_check: true,
        }
    }
}

/// Stack-size sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Run the sweep before the scheduler starts.
    pub enabled: bool,

    /// Stack depths to measure, in words.
    pub stack_sizes: Vec<usize>,

    /// Create/delete pairs measured per stack size.
    pub iterations: usize,

    /// Percentiles to report (e.g., [50, 90, 99]).
    pub percentiles: Vec<f64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stack_sizes: vec![128, 256, 512, 1024, 2048, 4096],
            iterations: 32,
            percentiles: vec![50.0, 90.0, 99.0],
        }
    }
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            // TOML has no null; an empty set reads back as `None`
            CpuAffinity::None => serializer.collect_seq(std::iter::empty::<usize>()),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers (empty for none)")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::custom("CPU index cannot be negative"));
                }
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                if cpus.is_empty() {
                    return Ok(CpuAffinity::None);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

impl BenchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject parameter combinations no benchmark run can use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lifecycle.stack_size == 0 {
            return Err(ConfigError::Invalid("lifecycle.stack_size must be > 0".into()));
        }
        if self.handoff.stack_size == 0 {
            return Err(ConfigError::Invalid("handoff.stack_size must be > 0".into()));
        }
        if self.handoff.lock_timeout_ticks == 0 {
            return Err(ConfigError::Invalid(
                "handoff.lock_timeout_ticks must be > 0".into(),
            ));
        }
        if self.kernel.tick_period.is_zero() {
            return Err(ConfigError::Invalid("kernel.tick_period must be > 0".into()));
        }
        if self.sweep.enabled {
            if self.sweep.iterations == 0 {
                return Err(ConfigError::Invalid("sweep.iterations must be > 0".into()));
            }
            if self.sweep.stack_sizes.contains(&0) {
                return Err(ConfigError::Invalid(
                    "sweep.stack_sizes must not contain 0".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
