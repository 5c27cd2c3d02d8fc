//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/laser_scan.toml` (base configuration)
//! 2. Environment variables (prefixed with `LASERSCAN_`)
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore, so field names keep their
//! single underscores:
//!
//! ```text
//! LASERSCAN_APPLICATION__LOG_LEVEL=debug
//! LASERSCAN_TIMING__SETTLE_DELAY_MS=250
//! LASERSCAN_TIMING__MONITOR_READ_SCAN=40
//! ```
//!
//! # Example
//!
//! ```no_run
//! use laser_scan::config::LaserScanConfig;
//!
//! let config = LaserScanConfig::load()?;
//! println!("Application: {}", config.application.name);
//! println!("Settle delay: {:?}", config.timing.settle_delay());
//! # Ok::<(), laser_scan::config::ConfigError>(())
//! ```

use crate::polling::PollPolicy;
use crate::scan::geometry::ScanGeometry;
use crate::scan::spec::{MonitorSpec, ScanSpec};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or the environment could not be read or deserialized.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// The values were read but are inconsistent.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserScanConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Waits, poll intervals and timeouts of the scan loop
    #[serde(default)]
    pub timing: TimingConfig,
    /// Scan run by `laser_scan scan`
    #[serde(default)]
    pub scan: Option<ScanSpec>,
    /// Monitor session run by `laser_scan monitor`
    #[serde(default)]
    pub monitor: Option<MonitorSpec>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Timing of the scan loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// The sweep status is polled `monitor_read_scan` times per expected line
    /// scan duration.
    #[serde(default = "default_monitor_read_scan")]
    pub monitor_read_scan: u32,
    /// Wait after setting an axis value before polling the device.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Interval between `finished_moving` polls.
    #[serde(default = "default_motion_poll_interval")]
    pub motion_poll_interval_ms: u64,
    /// Upper bound on one move.
    #[serde(default = "default_motion_timeout")]
    pub motion_timeout_ms: u64,
    /// Wait between the edges of `sync_shutter`.
    #[serde(default = "default_shutter_sync_delay")]
    pub shutter_sync_delay_ms: u64,
    /// A line scan times out after `line_scan_time × sweep_timeout_factor`.
    #[serde(default = "default_sweep_timeout_factor")]
    pub sweep_timeout_factor: f64,
    /// Lower bound on the line scan timeout.
    #[serde(default = "default_min_sweep_timeout")]
    pub min_sweep_timeout_ms: u64,
    /// Scale applied to the DAQ sample period in continuous mode.
    #[serde(default = "default_continuous_accuracy_factor")]
    pub continuous_accuracy_factor: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            monitor_read_scan: default_monitor_read_scan(),
            settle_delay_ms: default_settle_delay(),
            motion_poll_interval_ms: default_motion_poll_interval(),
            motion_timeout_ms: default_motion_timeout(),
            shutter_sync_delay_ms: default_shutter_sync_delay(),
            sweep_timeout_factor: default_sweep_timeout_factor(),
            min_sweep_timeout_ms: default_min_sweep_timeout(),
            continuous_accuracy_factor: default_continuous_accuracy_factor(),
        }
    }
}

impl TimingConfig {
    /// Wait after setting an axis value.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Wait between the edges of the shutter sync pulse.
    pub fn shutter_sync_delay(&self) -> Duration {
        Duration::from_millis(self.shutter_sync_delay_ms)
    }

    /// Poll policy for `finished_moving`.
    pub fn motion_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.motion_poll_interval_ms),
            timeout: Duration::from_millis(self.motion_timeout_ms),
        }
    }

    /// Poll policy for `sweep_condition` during a line scan of `line_scan_time`.
    pub fn sweep_policy(&self, line_scan_time: Duration) -> PollPolicy {
        let interval = line_scan_time / self.monitor_read_scan.max(1);
        let timeout = line_scan_time
            .mul_f64(self.sweep_timeout_factor.max(1.0))
            .max(Duration::from_millis(self.min_sweep_timeout_ms));
        PollPolicy { interval, timeout }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_monitor_read_scan() -> u32 {
    20
}

fn default_settle_delay() -> u64 {
    100
}

fn default_motion_poll_interval() -> u64 {
    200
}

fn default_motion_timeout() -> u64 {
    60_000
}

fn default_shutter_sync_delay() -> u64 {
    200
}

fn default_sweep_timeout_factor() -> f64 {
    3.0
}

fn default_min_sweep_timeout() -> u64 {
    10_000
}

fn default_continuous_accuracy_factor() -> f64 {
    0.85
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl LaserScanConfig {
    /// Load configuration from `config/laser_scan.toml` and environment variables
    ///
    /// Configuration is loaded in this order of precedence (highest to lowest):
    /// 1. Environment variables (`LASERSCAN_` prefix)
    /// 2. `config/laser_scan.toml`
    ///
    /// After loading, configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/laser_scan.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LASERSCAN_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Timing factors are in range
    /// - The scan and monitor descriptions are well-formed and their
    ///   geometry can be computed
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let timing = &self.timing;
        if timing.monitor_read_scan == 0 {
            return Err(ConfigError::ValidationError(
                "timing.monitor_read_scan must be at least 1".to_string(),
            ));
        }
        if timing.sweep_timeout_factor.is_nan() || timing.sweep_timeout_factor < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid timing.sweep_timeout_factor {}. Must be >= 1",
                timing.sweep_timeout_factor
            )));
        }
        let factor = timing.continuous_accuracy_factor;
        if factor.is_nan() || factor <= 0.0 || factor > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid timing.continuous_accuracy_factor {}. Must be in (0, 1]",
                timing.continuous_accuracy_factor
            )));
        }

        if let Some(scan) = &self.scan {
            scan.validate()
                .and_then(|_| ScanGeometry::for_scan(scan))
                .map_err(|e| ConfigError::ValidationError(format!("[scan] {}", e)))?;
        }
        if let Some(monitor) = &self.monitor {
            monitor
                .validate()
                .and_then(|_| ScanGeometry::for_monitor(&monitor.sweep))
                .map_err(|e| ConfigError::ValidationError(format!("[monitor] {}", e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::spec::{Axis, AxisRange};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[application]
name = "Laser Scan Test"
log_level = "debug"

[timing]
settle_delay_ms = 5

[scan]
laser = "santec"
detectors = ["pd1", "pd2"]

[scan.sweep]
start_wavelength = "1540 nm"
stop_wavelength = "1560 nm"
interval_trigger = "10 pm"
wavelength_speed = "10 nm/s"

[scan.axis]
kind = "device"
device = "piezo"
output = "voltage"

[scan.range]
start = "0 V"
stop = "10 V"
step = "2 V"

[scan.shutter]
device = "NI-DAQ"
port = "port0/line1"
delay = "50 ms"
"#;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn minimal(log_level: &str) -> LaserScanConfig {
        LaserScanConfig {
            application: ApplicationConfig {
                name: "Test".to_string(),
                log_level: log_level.to_string(),
            },
            timing: TimingConfig::default(),
            scan: None,
            monitor: None,
        }
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let file = write_config(SAMPLE);
        let config = LaserScanConfig::load_from(file.path()).unwrap();

        assert_eq!(config.application.name, "Laser Scan Test");
        assert_eq!(config.timing.settle_delay_ms, 5);
        assert_eq!(config.timing.monitor_read_scan, 20);
        assert_eq!(config.timing.continuous_accuracy_factor, 0.85);

        let scan = config.scan.unwrap();
        assert_eq!(scan.detectors, vec!["pd1", "pd2"]);
        assert!(matches!(scan.axis, Axis::Device { ref device, .. } if device == "piezo"));
        assert!(matches!(scan.range, AxisRange::Span { .. }));
        assert!(config.monitor.is_none());
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(minimal("info").validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let result = minimal("invalid").validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_invalid_accuracy_factor() {
        let mut config = minimal("info");
        config.timing.continuous_accuracy_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_scan_with_bad_range_fails_validation() {
        let file = write_config(&SAMPLE.replace("step = \"2 V\"", "step = \"2 nm\""));
        let err = LaserScanConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("[scan]"));
    }

    #[test]
    fn test_missing_application_section_fails_to_load() {
        let file = write_config("[timing]\nsettle_delay_ms = 1\n");
        assert!(matches!(
            LaserScanConfig::load_from(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn test_sweep_policy_bounds() {
        let timing = TimingConfig::default();
        let policy = timing.sweep_policy(Duration::from_secs(2));
        assert_eq!(policy.interval, Duration::from_millis(100));
        assert_eq!(policy.timeout, Duration::from_secs(10));

        let long = timing.sweep_policy(Duration::from_secs(20));
        assert_eq!(long.timeout, Duration::from_secs(60));
    }
}
