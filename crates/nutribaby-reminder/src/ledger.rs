//! Authorization ledger: one-shot consent tokens per caregiver and template.
//!
//! Every successful `consume` spends exactly one token that was live at
//! that instant. Two concurrent consumers never receive the same token.

use chrono::{DateTime, Duration, Utc};
use nutribaby_core::{Clock, NutriBabyError, Result, TemplateKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Available,
    Consumed,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Available => "available",
            TokenStatus::Consumed => "consumed",
            TokenStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(TokenStatus::Available),
            "consumed" => Ok(TokenStatus::Consumed),
            "expired" => Ok(TokenStatus::Expired),
            other => Err(NutriBabyError::Store(format!("unknown token status '{other}'"))),
        }
    }
}

/// A single-use permission to push one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationToken {
    pub token_id: String,
    pub caregiver_id: String,
    pub template_kind: TemplateKind,
    /// Downstream template the consent was granted against.
    pub template_id: String,
    pub status: TokenStatus,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl AuthorizationToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Available && now < self.expires_at
    }
}

/// Per-kind token counts for the status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub template_kind: TemplateKind,
    pub available: u64,
    pub consumed: u64,
    pub expired: u64,
    /// Earliest expiry among live tokens.
    pub next_expiry: Option<DateTime<Utc>>,
}

impl TokenSummary {
    pub fn empty(template_kind: TemplateKind) -> Self {
        Self {
            template_kind,
            available: 0,
            consumed: 0,
            expired: 0,
            next_expiry: None,
        }
    }
}

/// Result of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
}

/// Records, consumes and sweeps consent tokens.
pub struct AuthorizationLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    sweep_batch: usize,
    retention: Duration,
}

impl AuthorizationLedger {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        lifetime: Duration,
        sweep_batch: usize,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            lifetime,
            sweep_batch: sweep_batch.max(1),
            retention,
        }
    }

    /// Store a fresh token for a consent the client just reported.
    pub async fn record(
        &self,
        caregiver_id: &str,
        kind: TemplateKind,
        template_id: &str,
        granted_at: DateTime<Utc>,
    ) -> Result<AuthorizationToken> {
        if caregiver_id.trim().is_empty() {
            return Err(NutriBabyError::InvalidRecord("empty caregiver id".into()));
        }
        if template_id.trim().is_empty() {
            return Err(NutriBabyError::InvalidRecord("empty template id".into()));
        }
        let token = AuthorizationToken {
            token_id: uuid::Uuid::new_v4().to_string(),
            caregiver_id: caregiver_id.to_string(),
            template_kind: kind,
            template_id: template_id.to_string(),
            status: TokenStatus::Available,
            granted_at,
            expires_at: granted_at + self.lifetime,
            consumed_at: None,
        };
        self.store.insert_token(&token).await?;
        tracing::debug!(
            "🎫 Token {} recorded for {} ({}), expires {}",
            token.token_id,
            caregiver_id,
            kind,
            token.expires_at
        );
        Ok(token)
    }

    /// Spend the oldest live token for `(caregiver, kind)`.
    pub async fn consume(&self, caregiver_id: &str, kind: TemplateKind) -> Result<AuthorizationToken> {
        let now = self.clock.now();
        match self.store.consume_token(caregiver_id, kind, now).await? {
            Some(token) => Ok(token),
            None => Err(NutriBabyError::NoTokenAvailable {
                caregiver_id: caregiver_id.to_string(),
                template_kind: kind.to_string(),
            }),
        }
    }

    /// Expire stale tokens and purge spent ones past retention. Bounded per call.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.store.expire_tokens(now, self.sweep_batch).await?;
        let purged = self
            .store
            .purge_spent_tokens(now - self.retention, self.sweep_batch)
            .await?;
        if expired > 0 || purged > 0 {
            tracing::info!("🧹 Token sweep: {expired} expired, {purged} purged");
        }
        Ok(SweepReport { expired, purged })
    }

    /// One summary per template kind, zero rows included.
    pub async fn list(&self, caregiver_id: &str) -> Result<Vec<TokenSummary>> {
        let now = self.clock.now();
        let rows = self.store.token_summary(caregiver_id, now).await?;
        Ok(TemplateKind::ALL
            .into_iter()
            .map(|kind| {
                rows.iter()
                    .find(|s| s.template_kind == kind)
                    .cloned()
                    .unwrap_or_else(|| TokenSummary::empty(kind))
            })
            .collect())
    }
}
