//! # NutriBaby Reminder
//!
//! Periodic reminder dispatch for the NutriBaby mini-program. Every tick the
//! scheduler scans feeding and vaccination records whose reminder time has
//! arrived, spends one consent token per caregiver and pushes a templated
//! subscribe message.
//!
//! ## Architecture
//! ```text
//! ReminderScheduler (tokio interval, one tick at a time)
//!   └── TickRunner
//!         ├── Dispatcher
//!         │     ├── DueEventScanner → Store (feeding, then vaccination)
//!         │     ├── AuthorizationLedger::consume (one token per caregiver)
//!         │     ├── RendererRegistry → Payload
//!         │     ├── PushTransport (WeChat / dry run) + send log
//!         │     └── Store::mark_notified
//!         └── AuthorizationLedger::sweep (expire + purge)
//! ```

pub mod candidate;
pub mod dispatch;
pub mod engine;
pub mod ledger;
pub mod persistence;
pub mod render;
pub mod scanner;
pub mod service;
pub mod store;
pub mod transport;
pub mod wechat;

#[cfg(test)]
mod testing;

pub use candidate::{CandidateDetails, CaregiverBinding, ReminderCandidate};
pub use dispatch::{Dispatcher, TickReport};
pub use engine::{ReminderScheduler, SchedulerStats, TickRunner};
pub use ledger::{AuthorizationLedger, AuthorizationToken, TokenStatus, TokenSummary};
pub use persistence::SqliteStore;
pub use render::{Payload, RendererRegistry, TemplateRenderer};
pub use scanner::DueEventScanner;
pub use service::{ReminderService, SendLogPage};
pub use store::{SendLogEntry, SendStatus, Store};
pub use transport::{DryRunTransport, PushMessage, PushTransport};
pub use wechat::WechatTransport;
