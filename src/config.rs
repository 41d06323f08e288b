//! Application configuration.
//!
//! Loaded from a YAML file; every section has a `Default` so a partial file
//! (or none at all, for tests) yields a working configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::settings::FeeSettings;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Global default fee rates; per-wallet settings override these.
    #[serde(default)]
    pub fees: FeeSettings,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub frozen: FrozenConfig,
    #[serde(default)]
    pub replenishment: ReplenishmentConfig,
    #[serde(default)]
    pub accrual: AccrualConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            log_file: "fundcore.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfirmationConfig {
    /// Validity window for a confirmation code, in minutes.
    pub ttl_minutes: i64,
    /// Number of digits in a generated code.
    pub code_length: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 15,
            code_length: 6,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FrozenConfig {
    /// Days between a frozen parcel's creation and its scheduled defrost.
    pub defrost_delay_days: i64,
}

impl Default for FrozenConfig {
    fn default() -> Self {
        Self {
            defrost_delay_days: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplenishmentConfig {
    /// Business days between a program replenishment and its application.
    pub apply_delay_business_days: u32,
}

impl Default for ReplenishmentConfig {
    fn default() -> Self {
        Self {
            apply_delay_business_days: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AccrualConfig {
    /// Inclusive date ranges on which the accrual job does not run.
    #[serde(default)]
    pub holidays: Vec<HolidayRange>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct HolidayRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl HolidayRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

impl AccrualConfig {
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.iter().any(|r| r.contains(date))
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, serde_yaml::Error> {
        let raw = fs::read_to_string(path.as_ref()).unwrap_or_default();
        serde_yaml::from_str(&raw)
    }
}
