//! Storage seam for the reminder engine.
//!
//! The engine only talks to a [`Store`]; [`crate::persistence::SqliteStore`]
//! is the production backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutribaby_core::{EventKind, NutriBabyError, Result, TemplateKind};

use crate::candidate::{CaregiverBinding, Page, PageCursor};
use crate::ledger::{AuthorizationToken, TokenSummary};
use crate::render::Payload;
use serde::{Deserialize, Serialize};

/// Everything the engine reads and writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Feeding records that are due, not yet notified, not deleted and
    /// whose baby is not deleted. Ordered by subject then event time
    /// (newest first) then record id.
    async fn scan_due_feeding(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page>;

    /// Pending vaccination schedule entries whose reminder window opened.
    async fn scan_due_vaccination(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page>;

    /// Set the notified flag. Returns `false` if the record was already
    /// notified (the original timestamp is kept).
    async fn mark_notified(
        &self,
        kind: EventKind,
        record_id: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Non-deleted caregivers bound to a baby, in binding order.
    async fn caregivers_for(&self, subject_id: &str) -> Result<Vec<CaregiverBinding>>;

    // ─── Authorization tokens ─────────────────────────────────

    async fn insert_token(&self, token: &AuthorizationToken) -> Result<()>;

    /// Atomically flip the oldest live token to consumed and return it.
    async fn consume_token(
        &self,
        caregiver_id: &str,
        kind: TemplateKind,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationToken>>;

    /// Flip up to `limit` available tokens past expiry to expired.
    async fn expire_tokens(&self, now: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// Delete up to `limit` spent tokens that ended before `before`.
    async fn purge_spent_tokens(&self, before: DateTime<Utc>, limit: usize) -> Result<usize>;

    async fn token_summary(
        &self,
        caregiver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenSummary>>;

    // ─── Send log ─────────────────────────────────────────────

    async fn append_send_log(&self, entry: &SendLogEntry) -> Result<i64>;

    /// Newest first. Returns the page and the total number of entries.
    async fn send_logs(
        &self,
        caregiver_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<SendLogEntry>, u64)>;
}

/// Outcome recorded for one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sent" => Ok(SendStatus::Sent),
            "failed" => Ok(SendStatus::Failed),
            other => Err(NutriBabyError::Store(format!("unknown send status '{other}'"))),
        }
    }
}

/// Audit row for one push attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendLogEntry {
    /// Assigned by the store.
    #[serde(default)]
    pub id: Option<i64>,
    pub caregiver_id: String,
    pub template_kind: TemplateKind,
    pub template_id: String,
    pub payload: Payload,
    pub page: String,
    pub status: SendStatus,
    pub error_text: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
