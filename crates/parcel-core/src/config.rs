//! Configuration system for Parcel.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARCEL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parcel/config.toml
//!   3. ~/.config/parcel/config.toml
//!
//! Only FRAME_PAYLOAD (in `wire`) is a protocol constant. Everything here is
//! local policy and may differ between peers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::FRAME_PAYLOAD;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParcelConfig {
    pub transfer: TransferSettings,
    pub simulation: SimulationSettings,
}

/// Engine policy shared by every transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Aggregate outgoing budget across all transfers.
    pub max_bytes_per_second: u32,
    /// Ticks a completed transfer may linger before it is force-destroyed.
    pub max_age_ticks: u32,
    /// A transfer whose share is below this defers to the next tick rather
    /// than emitting a tiny frame. Capped at FRAME_PAYLOAD.
    pub min_frame_quota: u32,
    /// How many receiver-side cancellations are remembered to discard
    /// late frames. Oldest entries are evicted first.
    pub canceled_capacity: usize,
    /// Largest blob a peer may announce. A first frame above this is
    /// dropped before any buffer is allocated.
    pub max_incoming_bytes: u32,
}

/// Settings for the `parceld` loopback simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub tick_hz: u32,
    pub blob_bytes: u32,
    pub concurrent_transfers: u32,
    /// Receiver drops every incoming transfer after this many ticks.
    /// 0 = never.
    pub cancel_after_ticks: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_bytes_per_second: 32 * 1024,
            max_age_ticks: 60,
            min_frame_quota: FRAME_PAYLOAD as u32,
            canceled_capacity: 1024,
            max_incoming_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            blob_bytes: 64 * 1024,
            concurrent_transfers: 1,
            cancel_after_ticks: 0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parcel")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParcelConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            ParcelConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARCEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ParcelConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.max_bytes_per_second == 0 {
            return Err(ConfigError::Invalid {
                field: "transfer.max_bytes_per_second",
                reason: "must be greater than zero".into(),
            });
        }
        if self.transfer.min_frame_quota as usize > FRAME_PAYLOAD {
            return Err(ConfigError::Invalid {
                field: "transfer.min_frame_quota",
                reason: format!("must not exceed the frame payload of {FRAME_PAYLOAD}"),
            });
        }
        if self.transfer.max_incoming_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "transfer.max_incoming_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.simulation.tick_hz == 0 {
            return Err(ConfigError::Invalid {
                field: "simulation.tick_hz",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Apply PARCEL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_number("PARCEL_TRANSFER__MAX_BYTES_PER_SECOND") {
            self.transfer.max_bytes_per_second = v;
        }
        if let Some(v) = env_number("PARCEL_TRANSFER__MAX_AGE_TICKS") {
            self.transfer.max_age_ticks = v;
        }
        if let Some(v) = env_number("PARCEL_TRANSFER__MIN_FRAME_QUOTA") {
            self.transfer.min_frame_quota = v;
        }
        if let Some(v) = env_number("PARCEL_TRANSFER__CANCELED_CAPACITY") {
            self.transfer.canceled_capacity = v;
        }
        if let Some(v) = env_number("PARCEL_TRANSFER__MAX_INCOMING_BYTES") {
            self.transfer.max_incoming_bytes = v;
        }
        if let Some(v) = env_number("PARCEL_SIMULATION__TICK_HZ") {
            self.simulation.tick_hz = v;
        }
        if let Some(v) = env_number("PARCEL_SIMULATION__BLOB_BYTES") {
            self.simulation.blob_bytes = v;
        }
        if let Some(v) = env_number("PARCEL_SIMULATION__CONCURRENT_TRANSFERS") {
            self.simulation.concurrent_transfers = v;
        }
        if let Some(v) = env_number("PARCEL_SIMULATION__CANCEL_AFTER_TICKS") {
            self.simulation.cancel_after_ticks = v;
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
