//! NutriBaby configuration system.

use chrono::Offset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{NutriBabyError, Result};
use crate::kinds::EventKind;

/// Environment variable that overrides `wechat.app_secret`.
pub const APP_SECRET_ENV: &str = "NUTRIBABY_WECHAT_APP_SECRET";

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutriBabyConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reminder: ReminderConfig,
    #[serde(default)]
    pub wechat: WechatConfig,
}

fn default_log_level() -> String { "info".into() }

impl Default for NutriBabyConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            reminder: ReminderConfig::default(),
            wechat: WechatConfig::default(),
        }
    }
}

impl NutriBabyConfig {
    /// Load config from the default path (~/.nutribaby/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NutriBabyError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content).map(Self::with_env_overrides)
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| NutriBabyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| NutriBabyError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the NutriBaby home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nutribaby")
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var(APP_SECRET_ENV)
            && !secret.is_empty()
        {
            self.wechat.app_secret = secret;
        }
        self
    }

    /// Reject settings the reminder engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(NutriBabyError::Config(format!(
                "log_level must be one of {LOG_LEVELS:?}, got '{}'",
                self.log_level
            )));
        }
        self.reminder.validate()
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.nutribaby/nutribaby.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Reminder engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Shortens the default cadence to one minute.
    #[serde(default)]
    pub test_mode: bool,
    /// Explicit cadence; overrides the production/test default when set.
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,
    #[serde(default = "default_deadline_ratio")]
    pub tick_deadline_ratio: f64,
    #[serde(default = "default_token_lifetime_days")]
    pub token_lifetime_days: i64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: u32,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
    #[serde(default = "default_spent_retention_days")]
    pub spent_token_retention_days: i64,
    /// Offset used when rendering wall-clock fields.
    #[serde(default = "default_utc_offset_minutes")]
    pub local_utc_offset_minutes: i32,
    /// Downstream template id, keyed by event kind name.
    #[serde(default)]
    pub template_ids: BTreeMap<String, String>,
    /// Mini-program page opened from the notification, keyed by event kind name.
    #[serde(default)]
    pub landing_pages: BTreeMap<String, String>,
}

const PRODUCTION_TICK_SECS: u64 = 180;
const TEST_MODE_TICK_SECS: u64 = 60;

fn default_deadline_ratio() -> f64 { 0.8 }
fn default_token_lifetime_days() -> i64 { 7 }
fn default_send_timeout_secs() -> u64 { 5 }
fn default_scan_page_size() -> u32 { 100 }
fn default_sweep_batch_size() -> u32 { 500 }
fn default_spent_retention_days() -> i64 { 30 }
fn default_utc_offset_minutes() -> i32 { 480 }

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            tick_interval_secs: None,
            tick_deadline_ratio: default_deadline_ratio(),
            token_lifetime_days: default_token_lifetime_days(),
            send_timeout_secs: default_send_timeout_secs(),
            scan_page_size: default_scan_page_size(),
            sweep_batch_size: default_sweep_batch_size(),
            spent_token_retention_days: default_spent_retention_days(),
            local_utc_offset_minutes: default_utc_offset_minutes(),
            template_ids: BTreeMap::new(),
            landing_pages: BTreeMap::new(),
        }
    }
}

impl ReminderConfig {
    /// Scheduler cadence.
    pub fn tick_interval(&self) -> std::time::Duration {
        let secs = match self.tick_interval_secs {
            Some(secs) => secs,
            None if self.test_mode => TEST_MODE_TICK_SECS,
            None => PRODUCTION_TICK_SECS,
        };
        std::time::Duration::from_secs(secs)
    }

    /// Hard budget of a single tick.
    pub fn tick_deadline(&self) -> std::time::Duration {
        self.tick_interval().mul_f64(self.tick_deadline_ratio)
    }

    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(self.token_lifetime_days)
    }

    pub fn spent_token_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.spent_token_retention_days)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.send_timeout_secs)
    }

    pub fn local_offset(&self) -> chrono::FixedOffset {
        self.checked_offset().unwrap_or_else(|| chrono::Utc.fix())
    }

    fn checked_offset(&self) -> Option<chrono::FixedOffset> {
        self.local_utc_offset_minutes
            .checked_mul(60)
            .and_then(chrono::FixedOffset::east_opt)
    }

    pub fn template_id(&self, kind: EventKind) -> Option<&str> {
        self.template_ids
            .get(kind.as_str())
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn landing_page(&self, kind: EventKind) -> String {
        if let Some(page) = self.landing_pages.get(kind.as_str()) {
            return page.clone();
        }
        if kind.is_feeding() {
            "pages/record/feeding/feeding".into()
        } else {
            "pages/vaccine/vaccine".into()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval().is_zero() {
            return Err(NutriBabyError::Config("tick_interval_secs must be positive".into()));
        }
        if !(self.tick_deadline_ratio > 0.0 && self.tick_deadline_ratio <= 1.0) {
            return Err(NutriBabyError::Config(format!(
                "tick_deadline_ratio must be in (0, 1], got {}",
                self.tick_deadline_ratio
            )));
        }
        if self.token_lifetime_days <= 0 {
            return Err(NutriBabyError::Config("token_lifetime_days must be positive".into()));
        }
        if self.send_timeout_secs == 0 {
            return Err(NutriBabyError::Config("send_timeout_secs must be positive".into()));
        }
        if self.scan_page_size == 0 || self.sweep_batch_size == 0 {
            return Err(NutriBabyError::Config("page and batch sizes must be positive".into()));
        }
        if self.checked_offset().is_none() {
            return Err(NutriBabyError::Config(format!(
                "local_utc_offset_minutes out of range: {}",
                self.local_utc_offset_minutes
            )));
        }
        for key in self.template_ids.keys().chain(self.landing_pages.keys()) {
            key.parse::<EventKind>().map_err(|_| {
                NutriBabyError::Config(format!("unknown event kind '{key}' in reminder config"))
            })?;
        }
        let missing: Vec<&str> = EventKind::ALL
            .iter()
            .filter(|k| self.template_id(**k).is_none())
            .map(|k| k.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(NutriBabyError::Config(format!(
                "reminder.template_ids missing for: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// WeChat mini-program credentials and send options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WechatConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_miniprogram_state")]
    pub miniprogram_state: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_api_base() -> String { "https://api.weixin.qq.com".into() }
fn default_miniprogram_state() -> String { "formal".into() }
fn default_lang() -> String { "zh_CN".into() }

impl Default for WechatConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            api_base: default_api_base(),
            miniprogram_state: default_miniprogram_state(),
            lang: default_lang(),
        }
    }
}

impl WechatConfig {
    pub fn has_credentials(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }
}
