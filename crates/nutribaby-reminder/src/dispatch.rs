//! Reminder dispatch: one pass over due candidates.
//!
//! For each candidate: resolve caregivers, render once, then per caregiver
//! consume a token, push, and log. The record is marked notified once at
//! least one attempt was made. A missing token for one caregiver never
//! blocks the others.

use chrono::{DateTime, Utc};
use nutribaby_core::{
    EventKind, NutriBabyError, ReminderConfig, Result, TemplateKind, TransportError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::candidate::ReminderCandidate;
use crate::ledger::AuthorizationLedger;
use crate::render::RendererRegistry;
use crate::scanner::DueEventScanner;
use crate::store::{SendLogEntry, SendStatus, Store};
use crate::transport::{PushMessage, PushTransport};

/// Budget and stop signal for one tick.
#[derive(Debug, Clone)]
pub struct TickContext {
    /// Logical "now" for scanning, rendering and marking.
    pub now: DateTime<Utc>,
    pub deadline: tokio::time::Instant,
    pub cancel: CancellationToken,
}

impl TickContext {
    pub fn new(now: DateTime<Utc>, budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            now,
            deadline: tokio::time::Instant::now() + budget,
            cancel,
        }
    }

    /// Deadline passed or shutdown requested.
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || tokio::time::Instant::now() >= self.deadline
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub candidates: usize,
    pub attempts: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped_no_token: usize,
    pub skipped_no_caregiver: usize,
    pub renderer_missing: usize,
    pub marked: usize,
    pub mark_failures: usize,
    /// Tokens expired by the post-dispatch sweep.
    pub swept: usize,
    /// Spent tokens purged by the post-dispatch sweep.
    pub purged: usize,
    /// The tick stopped early on deadline or shutdown.
    pub abandoned: bool,
}

/// What happened to one candidate.
#[derive(Debug, Default)]
struct CandidateOutcome {
    attempts: usize,
    abandoned: bool,
}

/// Runs scan → consume → render → send → log → mark.
pub struct Dispatcher {
    scanner: DueEventScanner,
    store: Arc<dyn Store>,
    ledger: Arc<AuthorizationLedger>,
    registry: RendererRegistry,
    transport: Arc<dyn PushTransport>,
    send_timeout: Duration,
    landing_pages: BTreeMap<EventKind, String>,
}

impl Dispatcher {
    pub fn new(
        config: &ReminderConfig,
        store: Arc<dyn Store>,
        ledger: Arc<AuthorizationLedger>,
        registry: RendererRegistry,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let landing_pages = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, config.landing_page(kind)))
            .collect();
        Self {
            scanner: DueEventScanner::new(store.clone(), config.scan_page_size as usize),
            store,
            ledger,
            registry,
            transport,
            send_timeout: config.send_timeout(),
            landing_pages,
        }
    }

    /// One full dispatch pass. Store failures while scanning or resolving
    /// caregivers abort the pass; everything else is counted and logged.
    pub async fn run(&self, ctx: &TickContext) -> Result<TickReport> {
        let mut report = TickReport::default();
        let mut scan = self.scanner.scan(ctx.now);

        while let Some(candidate) = scan.next().await? {
            if ctx.should_stop() {
                report.abandoned = true;
                break;
            }
            report.candidates += 1;
            let outcome = self.dispatch_candidate(&candidate, ctx, &mut report).await?;
            if outcome.attempts > 0 {
                self.mark(&candidate, ctx.now, &mut report).await;
            }
            if outcome.abandoned {
                report.abandoned = true;
                break;
            }
        }

        if report.abandoned {
            tracing::warn!(
                "⏱️ Tick stopped early after {} candidate(s); the rest wait for the next tick",
                report.candidates
            );
        }
        Ok(report)
    }

    async fn dispatch_candidate(
        &self,
        candidate: &ReminderCandidate,
        ctx: &TickContext,
        report: &mut TickReport,
    ) -> Result<CandidateOutcome> {
        let mut outcome = CandidateOutcome::default();

        let renderer = match self.registry.get(candidate.event_kind) {
            Ok(r) if r.accepts(candidate) => r,
            Ok(_) => {
                tracing::error!(
                    "❌ Record {} ({}) carries details its renderer cannot use",
                    candidate.record_id,
                    candidate.event_kind
                );
                report.renderer_missing += 1;
                return Ok(outcome);
            }
            Err(e) => {
                tracing::error!("❌ Record {}: {e}", candidate.record_id);
                report.renderer_missing += 1;
                return Ok(outcome);
            }
        };

        let caregivers = self.store.caregivers_for(&candidate.subject_id).await?;
        if caregivers.is_empty() {
            tracing::warn!(
                "⚠️ No caregivers bound to {}; record {} left unmarked",
                candidate.subject_id,
                candidate.record_id
            );
            report.skipped_no_caregiver += 1;
            return Ok(outcome);
        }

        let last_event_time = candidate.reference_time();
        let payload = match renderer.render(candidate, last_event_time, ctx.now - last_event_time) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("❌ Rendering record {} failed: {e}", candidate.record_id);
                report.renderer_missing += 1;
                return Ok(outcome);
            }
        };
        let template_kind = candidate.event_kind.template_kind();
        let page = self
            .landing_pages
            .get(&candidate.event_kind)
            .cloned()
            .unwrap_or_default();

        for binding in &caregivers {
            if ctx.should_stop() {
                outcome.abandoned = true;
                break;
            }

            let token = match self.ledger.consume(&binding.caregiver_id, template_kind).await {
                Ok(token) => token,
                Err(NutriBabyError::NoTokenAvailable { .. }) => {
                    tracing::debug!(
                        "No {} authorization for {}, skipping",
                        template_kind,
                        binding.caregiver_id
                    );
                    report.skipped_no_token += 1;
                    continue;
                }
                Err(e) if outcome.attempts == 0 => return Err(e),
                Err(e) => {
                    tracing::error!(
                        "❌ Token lookup failed mid-record {}: {e}",
                        candidate.record_id
                    );
                    outcome.abandoned = true;
                    break;
                }
            };
            if token.template_id != renderer.template_id() {
                tracing::warn!(
                    "⚠️ Token {} was granted for template {}, configured is {}; sending with the granted one",
                    token.token_id,
                    token.template_id,
                    renderer.template_id()
                );
            }

            let message = PushMessage {
                caregiver_id: binding.caregiver_id.clone(),
                template_id: token.template_id.clone(),
                payload: payload.clone(),
                landing_page: page.clone(),
            };
            let result = self.send_once(&message).await;
            outcome.attempts += 1;
            report.attempts += 1;

            match &result {
                Ok(()) => {
                    report.sent += 1;
                    tracing::info!(
                        "📨 {} reminder sent to {} (record {})",
                        candidate.event_kind,
                        binding.caregiver_id,
                        candidate.record_id
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        "⚠️ {} reminder to {} failed ({}): {}",
                        candidate.event_kind,
                        binding.caregiver_id,
                        if e.is_retryable() { "transient" } else { "permanent" },
                        e.message()
                    );
                }
            }
            self.log_send(&message, template_kind, &result, ctx.now).await;
        }

        Ok(outcome)
    }

    async fn send_once(&self, message: &PushMessage) -> std::result::Result<(), TransportError> {
        match tokio::time::timeout(self.send_timeout, self.transport.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Transient(format!(
                "send timed out after {}s",
                self.send_timeout.as_secs_f64()
            ))),
        }
    }

    async fn log_send(
        &self,
        message: &PushMessage,
        template_kind: TemplateKind,
        result: &std::result::Result<(), TransportError>,
        now: DateTime<Utc>,
    ) {
        let (status, error_text, sent_at) = match result {
            Ok(()) => (SendStatus::Sent, None, Some(now)),
            Err(e) => (SendStatus::Failed, Some(e.message().to_string()), None),
        };
        let entry = SendLogEntry {
            id: None,
            caregiver_id: message.caregiver_id.clone(),
            template_kind,
            template_id: message.template_id.clone(),
            payload: message.payload.clone(),
            page: message.landing_page.clone(),
            status,
            error_text,
            sent_at,
            created_at: now,
        };
        if let Err(e) = self.store.append_send_log(&entry).await {
            tracing::warn!("⚠️ Send log write failed for {}: {e}", message.caregiver_id);
        }
    }

    async fn mark(&self, candidate: &ReminderCandidate, now: DateTime<Utc>, report: &mut TickReport) {
        match self
            .store
            .mark_notified(candidate.event_kind, &candidate.record_id, now)
            .await
        {
            Ok(true) => report.marked += 1,
            Ok(false) => {
                tracing::debug!("Record {} was already marked", candidate.record_id);
            }
            Err(e) => {
                // next tick will see the record again and re-send
                tracing::error!("❌ Marking record {} failed: {e}", candidate.record_id);
                report.mark_failures += 1;
            }
        }
    }
}
