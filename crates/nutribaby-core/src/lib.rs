//! # NutriBaby Core
//!
//! Shared building blocks for NutriBaby services: configuration, the error
//! taxonomy, event/template kinds and the injectable clock.

pub mod clock;
pub mod config;
pub mod error;
pub mod kinds;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{NutriBabyConfig, ReminderConfig, WechatConfig};
pub use error::{NutriBabyError, Result, TransportError};
pub use kinds::{EventKind, TemplateKind};
