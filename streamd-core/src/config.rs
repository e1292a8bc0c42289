//! Configuration (ambient stack — spec.md §1 lists config file parsing and
//! the bash→YAML migration as out-of-scope "straightforward glue",
//! referenced only at the interface the core consumes). [`StreamdConfig`]
//! is the resolved top-level configuration the launcher reads to build
//! each Supervisor's `StreamConfig` (spec.md §3 **(NEW)**).
//!
//! Loading follows `SecurityConfig::from_env` in the teacher's
//! `signaling-server/src/security.rs`: parse the structured form (there,
//! nothing; here, YAML), then let individual environment variables
//! override specific fields with `env::var(...).ok().and_then(|v|
//! v.parse().ok())`.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::ConfigError;

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/var/run/streamd")
}
fn default_asound_root() -> PathBuf {
    PathBuf::from("/proc/asound")
}
fn default_sysfs_usb_root() -> PathBuf {
    PathBuf::from("/sys/bus/usb/devices")
}
fn default_sound_class_root() -> PathBuf {
    PathBuf::from("/sys/class/sound")
}
fn default_encoder_path() -> PathBuf {
    PathBuf::from("/usr/bin/ffmpeg")
}
fn default_stop_timeout_secs() -> u64 {
    30
}
fn default_success_threshold_secs() -> u64 {
    300
}

/// Per-device bitrate/codec/rate overrides, keyed by sanitized name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceOverride {
    pub codec: Option<String>,
    pub bitrate: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

/// On-disk form of [`BackoffConfig`]; `Duration` has no direct YAML
/// scalar, so the config layer speaks milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawBackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for RawBackoffConfig {
    fn default() -> Self {
        let d = BackoffConfig::default();
        Self {
            base_ms: d.base.as_millis() as u64,
            cap_ms: d.cap.as_millis() as u64,
            max_attempts: d.max_attempts,
        }
    }
}

impl From<RawBackoffConfig> for BackoffConfig {
    fn from(r: RawBackoffConfig) -> Self {
        BackoffConfig {
            base: Duration::from_millis(r.base_ms),
            cap: Duration::from_millis(r.cap_ms),
            max_attempts: r.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamdConfig {
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    #[serde(default)]
    pub relay_base_url: String,
    #[serde(default = "default_encoder_path")]
    pub encoder_path: PathBuf,
    #[serde(default = "default_asound_root")]
    pub asound_root: PathBuf,
    #[serde(default = "default_sysfs_usb_root")]
    pub sysfs_usb_root: PathBuf,
    /// Root of the kernel's `controlC<N>` class symlinks, walked by the
    /// USB Topology Resolver (C3) to find each card's sysfs device
    /// directory before matching on (bus, device).
    #[serde(default = "default_sound_class_root")]
    pub sound_class_root: PathBuf,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_success_threshold_secs")]
    pub success_threshold_secs: u64,
    #[serde(default)]
    pub backoff: RawBackoffConfig,
    #[serde(default)]
    pub devices: HashMap<String, DeviceOverride>,
}

impl Default for StreamdConfig {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            relay_base_url: String::new(),
            encoder_path: default_encoder_path(),
            asound_root: default_asound_root(),
            sysfs_usb_root: default_sysfs_usb_root(),
            sound_class_root: default_sound_class_root(),
            stop_timeout_secs: default_stop_timeout_secs(),
            success_threshold_secs: default_success_threshold_secs(),
            backoff: RawBackoffConfig::default(),
            devices: HashMap::new(),
        }
    }
}

impl StreamdConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn success_threshold(&self) -> Duration {
        Duration::from_secs(self.success_threshold_secs)
    }

    /// Load from a YAML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text, path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides read directly from the environment, the way
    /// `SecurityConfig::from_env` builds its fields: `env::var(...).ok()`
    /// feeding `.and_then(|v| v.parse().ok())`, applied only when present
    /// so an unset variable never clobbers a value loaded from file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("STREAMD_LOCK_DIR") {
            self.lock_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("STREAMD_RELAY_BASE_URL") {
            self.relay_base_url = v;
        }
        if let Ok(v) = env::var("STREAMD_ENCODER_PATH") {
            self.encoder_path = PathBuf::from(v);
        }
        if let Some(v) = env::var("STREAMD_STOP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.stop_timeout_secs = v;
        }
        if let Some(v) = env::var("STREAMD_SUCCESS_THRESHOLD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.success_threshold_secs = v;
        }
    }
}

/// Logging level environment variable read by the binary entrypoint
/// (spec.md §6 "Environment variables... logging level"); `tracing_subscriber`
/// consumes it via `EnvFilter`, the same wiring the teacher's
/// `beacon-server`/`signaling-server` `main` functions use.
pub const LOG_LEVEL_ENV_VAR: &str = "STREAMD_LOG_LEVEL";

/// Minimal one-pass bash→YAML migration (spec.md §1: out of scope,
/// referenced only at the interface the Supervisor consumes — a resolved
/// `StreamConfig`). Recognizes flat `KEY=VALUE` assignments (comments and
/// blank lines ignored) plus `DEVICE_<name>_<FIELD>=VALUE` for per-device
/// overrides, matching the `blue_yeti` fixture in spec.md §8 scenario 6.
pub fn migrate_bash(text: &str) -> StreamdConfig {
    let mut config = StreamdConfig::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = strip_quotes(value.trim());

        if let Some(rest) = key.strip_prefix("DEVICE_") {
            apply_device_field(&mut config.devices, rest, value);
            continue;
        }

        match key {
            "LOCK_DIR" => config.lock_dir = PathBuf::from(value),
            "RELAY_BASE_URL" => config.relay_base_url = value.to_string(),
            "ENCODER_PATH" => config.encoder_path = PathBuf::from(value),
            "ASOUND_ROOT" => config.asound_root = PathBuf::from(value),
            "SYSFS_USB_ROOT" => config.sysfs_usb_root = PathBuf::from(value),
            "STOP_TIMEOUT_SECS" => {
                if let Ok(v) = value.parse() {
                    config.stop_timeout_secs = v;
                }
            }
            "SUCCESS_THRESHOLD_SECS" => {
                if let Ok(v) = value.parse() {
                    config.success_threshold_secs = v;
                }
            }
            _ => {}
        }
    }

    config
}

fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value)
}

/// `DEVICE_<name>_<FIELD>=value` — the device name is everything up to the
/// last underscore-delimited field keyword, so device names containing
/// underscores (`blue_yeti`) still parse correctly.
fn apply_device_field(devices: &mut HashMap<String, DeviceOverride>, rest: &str, value: &str) {
    for field in ["SAMPLE_RATE", "CHANNELS", "CODEC", "BITRATE"] {
        let suffix = format!("_{field}");
        if let Some(name) = rest.strip_suffix(&suffix) {
            let entry = devices.entry(name.to_string()).or_default();
            match field {
                "SAMPLE_RATE" => entry.sample_rate = value.parse().ok(),
                "CHANNELS" => entry.channels = value.parse().ok(),
                "CODEC" => entry.codec = Some(value.to_string()),
                "BITRATE" => entry.bitrate = Some(value.to_string()),
                _ => unreachable!(),
            }
            return;
        }
    }
}
