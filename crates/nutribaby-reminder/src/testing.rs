//! Test fixtures: timestamps, records, a scriptable transport and a
//! pre-wired harness.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use nutribaby_core::{
    EventKind, ManualClock, NutriBabyError, ReminderConfig, Result, TemplateKind, TransportError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::candidate::{
    BreastSide, CandidateDetails, CaregiverBinding, FeedingDetail, Page, PageCursor,
    ReminderCandidate,
};
use crate::dispatch::Dispatcher;
use crate::ledger::{AuthorizationLedger, AuthorizationToken, TokenSummary};
use crate::persistence::{NewFeedingRecord, SqliteStore};
use crate::render::RendererRegistry;
use crate::store::{SendLogEntry, Store};
use crate::transport::{PushMessage, PushTransport};

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn breast_record(
    record_id: &str,
    baby_id: &str,
    event_time: DateTime<Utc>,
    interval_minutes: i64,
) -> NewFeedingRecord {
    NewFeedingRecord {
        record_id: record_id.into(),
        baby_id: baby_id.into(),
        event_time,
        detail: FeedingDetail::Breast { side: Some(BreastSide::Left), duration_secs: Some(900) },
        reminder_interval: Some(Duration::minutes(interval_minutes)),
        created_by: "cg-a".into(),
    }
}

pub fn feeding_candidate(
    record_id: &str,
    subject_id: &str,
    event_time: DateTime<Utc>,
    detail: FeedingDetail,
) -> ReminderCandidate {
    ReminderCandidate {
        record_id: record_id.into(),
        subject_id: subject_id.into(),
        event_kind: detail.event_kind(),
        event_time,
        interval: Some(Duration::minutes(180)),
        notified: false,
        notified_at: None,
        details: CandidateDetails::Feeding(detail),
    }
}

pub fn breast_candidate(
    record_id: &str,
    subject_id: &str,
    event_time: DateTime<Utc>,
    side: Option<BreastSide>,
) -> ReminderCandidate {
    feeding_candidate(
        record_id,
        subject_id,
        event_time,
        FeedingDetail::Breast { side, duration_secs: None },
    )
}

/// Config with every template configured and wall-clock fields in UTC.
pub fn test_config() -> ReminderConfig {
    let mut config = ReminderConfig {
        local_utc_offset_minutes: 0,
        send_timeout_secs: 1,
        ..ReminderConfig::default()
    };
    for (kind, id) in [
        (EventKind::BreastFeeding, "tpl-breast"),
        (EventKind::BottleFeeding, "tpl-bottle"),
        (EventKind::SolidFeeding, "tpl-solid"),
        (EventKind::VaccinationDue, "tpl-vaccine"),
        (EventKind::VaccinationOverdue, "tpl-vaccine"),
    ] {
        config.template_ids.insert(kind.as_str().into(), id.into());
    }
    config
}

// ─── Mock transport ───────────────────────────────────────

/// How the mock answers for a given caregiver.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    Fail(TransportError),
    /// Signal `entered`, then wait for `release`.
    Block,
    /// Never returns; exercises the send timeout.
    Hang,
    Panic,
}

/// Records every message; answers per caregiver (default: succeed).
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<PushMessage>>,
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    pub entered: Notify,
    pub release: Notify,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, caregiver_id: &str, behavior: MockBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(caregiver_id.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<PushMessage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.calls().into_iter().map(|m| m.caregiver_id).collect()
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, message: &PushMessage) -> std::result::Result<(), TransportError> {
        self.calls.lock().unwrap().push(message.clone());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&message.caregiver_id)
            .cloned()
            .unwrap_or(MockBehavior::Succeed);
        match behavior {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::Fail(e) => Err(e),
            MockBehavior::Block => {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(())
            }
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::Panic => panic!("mock transport exploded"),
        }
    }
}

// ─── Failing store ────────────────────────────────────────

/// Store operations that [`FlakyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ScanFeeding,
    ScanVaccination,
    MarkNotified,
    CaregiversFor,
    ConsumeToken,
    AppendSendLog,
}

/// Delegates to SQLite, except for operations switched to fail.
pub struct FlakyStore {
    inner: Arc<SqliteStore>,
    failing: Mutex<HashSet<StoreOp>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: StoreOp) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(NutriBabyError::Store(format!("{op:?}: database is locked")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn scan_due_feeding(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        self.check(StoreOp::ScanFeeding)?;
        self.inner.scan_due_feeding(now, cursor, limit).await
    }

    async fn scan_due_vaccination(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        self.check(StoreOp::ScanVaccination)?;
        self.inner.scan_due_vaccination(now, cursor, limit).await
    }

    async fn mark_notified(
        &self,
        kind: EventKind,
        record_id: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check(StoreOp::MarkNotified)?;
        self.inner.mark_notified(kind, record_id, notified_at).await
    }

    async fn caregivers_for(&self, subject_id: &str) -> Result<Vec<CaregiverBinding>> {
        self.check(StoreOp::CaregiversFor)?;
        self.inner.caregivers_for(subject_id).await
    }

    async fn insert_token(&self, token: &AuthorizationToken) -> Result<()> {
        self.inner.insert_token(token).await
    }

    async fn consume_token(
        &self,
        caregiver_id: &str,
        kind: TemplateKind,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationToken>> {
        self.check(StoreOp::ConsumeToken)?;
        self.inner.consume_token(caregiver_id, kind, now).await
    }

    async fn expire_tokens(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.inner.expire_tokens(now, limit).await
    }

    async fn purge_spent_tokens(&self, before: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.inner.purge_spent_tokens(before, limit).await
    }

    async fn token_summary(
        &self,
        caregiver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenSummary>> {
        self.inner.token_summary(caregiver_id, now).await
    }

    async fn append_send_log(&self, entry: &SendLogEntry) -> Result<i64> {
        self.check(StoreOp::AppendSendLog)?;
        self.inner.append_send_log(entry).await
    }

    async fn send_logs(
        &self,
        caregiver_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<SendLogEntry>, u64)> {
        self.inner.send_logs(caregiver_id, offset, limit).await
    }
}

// ─── Harness ──────────────────────────────────────────────

/// In-memory store, manual clock and mock transport wired together.
/// The dispatcher and ledger reach the store through `flaky`.
pub struct Harness {
    pub config: ReminderConfig,
    pub store: Arc<SqliteStore>,
    pub flaky: Arc<FlakyStore>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<MockTransport>,
    pub ledger: Arc<AuthorizationLedger>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_config(now, test_config())
    }

    pub fn with_config(now: DateTime<Utc>, config: ReminderConfig) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let clock = Arc::new(ManualClock::new(now));
        let ledger = Arc::new(AuthorizationLedger::new(
            flaky.clone(),
            clock.clone(),
            config.token_lifetime(),
            config.sweep_batch_size as usize,
            config.spent_token_retention(),
        ));
        Self {
            config,
            store,
            flaky,
            clock,
            transport: Arc::new(MockTransport::new()),
            ledger,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            &self.config,
            self.flaky.clone(),
            self.ledger.clone(),
            RendererRegistry::from_config(&self.config),
            self.transport.clone(),
        )
    }

    /// Baby `b1` with the given caregivers bound in order.
    pub fn family(&self, caregivers: &[&str]) {
        self.store.insert_baby("b1", "Mia", at(2024, 1, 15, 0, 0)).unwrap();
        for caregiver in caregivers {
            self.store.bind_caregiver("b1", caregiver, "parent").unwrap();
        }
    }

    pub async fn grant(&self, caregiver_id: &str, kind: TemplateKind, granted_at: DateTime<Utc>) {
        let template_id = match kind {
            TemplateKind::BreastFeeding => "tpl-breast",
            TemplateKind::BottleFeeding => "tpl-bottle",
            TemplateKind::SolidFeeding => "tpl-solid",
            TemplateKind::Vaccination => "tpl-vaccine",
        };
        self.ledger
            .record(caregiver_id, kind, template_id, granted_at)
            .await
            .unwrap();
    }
}
