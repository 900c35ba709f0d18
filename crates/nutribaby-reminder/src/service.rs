//! `ReminderService`: the facade the rest of the backend talks to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use nutribaby_core::{Clock, EventKind, ReminderConfig, Result, TemplateKind};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::{Dispatcher, TickReport};
use crate::engine::{ReminderScheduler, SchedulerStats, TickRunner};
use crate::ledger::{AuthorizationLedger, AuthorizationToken, TokenSummary};
use crate::render::RendererRegistry;
use crate::store::{SendLogEntry, Store};
use crate::transport::PushTransport;

/// A page of send history.
#[derive(Debug, Clone, Serialize)]
pub struct SendLogPage {
    pub entries: Vec<SendLogEntry>,
    pub total: u64,
}

pub struct ReminderService {
    store: Arc<dyn Store>,
    ledger: Arc<AuthorizationLedger>,
    scheduler: ReminderScheduler,
    clock: Arc<dyn Clock>,
    config: ReminderConfig,
}

impl ReminderService {
    /// Wire the engine from `config`. Rejects settings the scheduler
    /// cannot run with, such as a zero cadence.
    pub fn new(
        config: &ReminderConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn PushTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(AuthorizationLedger::new(
            store.clone(),
            clock.clone(),
            config.token_lifetime(),
            config.sweep_batch_size as usize,
            config.spent_token_retention(),
        ));
        let dispatcher = Dispatcher::new(
            config,
            store.clone(),
            ledger.clone(),
            RendererRegistry::from_config(config),
            transport.clone(),
        );
        let runner = TickRunner::new(dispatcher, ledger.clone(), clock.clone(), config.tick_deadline());
        tracing::info!(
            "🍼 Reminder service ready: transport={}, cadence={}s, tick budget={}ms",
            transport.name(),
            config.tick_interval().as_secs(),
            config.tick_deadline().as_millis()
        );
        Ok(Self {
            store,
            ledger,
            scheduler: ReminderScheduler::new(runner, config.tick_interval()),
            clock,
            config: config.clone(),
        })
    }

    /// Record a consent reported by the client. `granted_at` defaults to now.
    pub async fn ingest_consent(
        &self,
        caregiver_id: &str,
        template_kind: TemplateKind,
        template_id: &str,
        granted_at: Option<DateTime<Utc>>,
    ) -> Result<AuthorizationToken> {
        let known = EventKind::ALL
            .into_iter()
            .filter(|k| k.template_kind() == template_kind)
            .filter_map(|k| self.config.template_id(k))
            .any(|id| id == template_id);
        if !known {
            tracing::warn!(
                "⚠️ Consent from {caregiver_id} for {template_kind} uses unconfigured template {template_id}"
            );
        }
        let granted_at = granted_at.unwrap_or_else(|| self.clock.now());
        self.ledger
            .record(caregiver_id, template_kind, template_id, granted_at)
            .await
    }

    /// Run one tick now. `None` if a tick is already running.
    pub async fn force_scan(&self) -> Result<Option<TickReport>> {
        self.scheduler.force_scan().await
    }

    /// Per-kind authorization counts for a caregiver.
    pub async fn list_status(&self, caregiver_id: &str) -> Result<Vec<TokenSummary>> {
        self.ledger.list(caregiver_id).await
    }

    pub async fn send_logs(&self, caregiver_id: &str, offset: usize, limit: usize) -> Result<SendLogPage> {
        let (entries, total) = self.store.send_logs(caregiver_id, offset, limit.clamp(1, 100)).await?;
        Ok(SendLogPage { entries, total })
    }

    pub fn start(&self) {
        self.scheduler.start();
    }

    /// See [`ReminderScheduler::stop`].
    pub async fn stop(&self, deadline: Duration) -> bool {
        self.scheduler.stop(deadline).await
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}

#[cfg(test)]
mod tests {
    //! End-to-end flows through the facade.

    use super::*;
    use crate::candidate::{FeedingDetail, MilkKind};
    use crate::persistence::{NewFeedingRecord, NewVaccination, SqliteStore};
    use crate::store::SendStatus;
    use crate::testing::{MockBehavior, MockTransport, at, breast_record, test_config};
    use nutribaby_core::{ManualClock, NutriBabyError, TransportError};

    struct Fixture {
        service: ReminderService,
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        transport: Arc<MockTransport>,
    }

    fn fixture(now: DateTime<Utc>, caregivers: &[&str]) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(now));
        let transport = Arc::new(MockTransport::new());
        store.insert_baby("b1", "Mia", at(2024, 1, 15, 0, 0)).unwrap();
        for caregiver in caregivers {
            store.bind_caregiver("b1", caregiver, "parent").unwrap();
        }
        let service =
            ReminderService::new(&test_config(), store.clone(), transport.clone(), clock.clone()).unwrap();
        Fixture { service, store, clock, transport }
    }

    #[tokio::test]
    async fn breast_feeding_single_caregiver() {
        let f = fixture(at(2024, 5, 1, 12, 5), &["cg-a"]);
        f.store
            .insert_feeding_record(&breast_record("r1", "b1", at(2024, 5, 1, 9, 0), 180))
            .unwrap();
        f.service
            .ingest_consent("cg-a", TemplateKind::BreastFeeding, "tpl-breast", Some(at(2024, 5, 1, 8, 0)))
            .await
            .unwrap();

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!((report.candidates, report.sent, report.marked), (1, 1, 1));

        let calls = f.transport.calls();
        assert_eq!(calls.len(), 1);
        let payload = &calls[0].payload;
        assert_eq!(payload.get("time1"), Some("2024-05-01 09:00:00"));
        assert_eq!(payload.get("thing2"), Some("about 3 hours"));
        assert_eq!(payload.get("phrase3"), Some("left side"));
        assert!(payload.get("thing4").is_some_and(|t| !t.is_empty()));
        assert_eq!(
            f.store.notified_state(EventKind::BreastFeeding, "r1").unwrap(),
            Some((true, Some(at(2024, 5, 1, 12, 5))))
        );

        f.clock.advance(chrono::Duration::minutes(3));
        let next = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(next.candidates, 0);
        assert_eq!(f.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn bottle_feeding_waits_for_consent() {
        let f = fixture(at(2024, 5, 1, 12, 5), &["cg-a"]);
        f.store
            .insert_feeding_record(&NewFeedingRecord {
                record_id: "r2".into(),
                baby_id: "b1".into(),
                event_time: at(2024, 5, 1, 9, 0),
                detail: FeedingDetail::Bottle { amount_ml: Some(120), milk_kind: MilkKind::Formula },
                reminder_interval: Some(chrono::Duration::minutes(180)),
                created_by: "cg-a".into(),
            })
            .unwrap();

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(report.skipped_no_token, 1);
        assert!(f.transport.calls().is_empty());
        assert_eq!(
            f.store.notified_state(EventKind::BottleFeeding, "r2").unwrap(),
            Some((false, None))
        );

        f.clock.advance(chrono::Duration::minutes(1));
        f.service
            .ingest_consent("cg-a", TemplateKind::BottleFeeding, "tpl-bottle", None)
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(2));

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(
            f.store.notified_state(EventKind::BottleFeeding, "r2").unwrap(),
            Some((true, Some(at(2024, 5, 1, 12, 8))))
        );
        assert_eq!(f.transport.calls()[0].payload.get("character_string3"), Some("120 ml"));
    }

    #[tokio::test]
    async fn one_caregiver_fails_the_other_succeeds() {
        let f = fixture(at(2024, 5, 1, 12, 5), &["cg-a", "cg-b"]);
        f.store
            .insert_feeding_record(&breast_record("r1", "b1", at(2024, 5, 1, 9, 0), 180))
            .unwrap();
        for caregiver in ["cg-a", "cg-b"] {
            f.service
                .ingest_consent(caregiver, TemplateKind::BreastFeeding, "tpl-breast", Some(at(2024, 5, 1, 8, 0)))
                .await
                .unwrap();
        }
        f.transport.set("cg-b", MockBehavior::Fail(TransportError::Transient("timeout".into())));

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(f.transport.recipients(), ["cg-a", "cg-b"]);
        assert_eq!((report.sent, report.failed, report.marked), (1, 1, 1));

        // both tokens are spent regardless of outcome
        for caregiver in ["cg-a", "cg-b"] {
            let status = f.service.list_status(caregiver).await.unwrap();
            let breast = status.iter().find(|s| s.template_kind == TemplateKind::BreastFeeding).unwrap();
            assert_eq!((breast.available, breast.consumed), (0, 1));
        }

        let ok = f.service.send_logs("cg-a", 0, 10).await.unwrap();
        assert_eq!(ok.total, 1);
        assert_eq!(ok.entries[0].status, SendStatus::Sent);
        let failed = f.service.send_logs("cg-b", 0, 10).await.unwrap();
        assert_eq!(failed.entries[0].status, SendStatus::Failed);
        assert!(failed.entries[0].error_text.as_deref().is_some_and(|e| e.contains("timeout")));
    }

    #[tokio::test]
    async fn vaccination_overdue_reminder() {
        let f = fixture(at(2024, 4, 15, 2, 0), &["cg-a"]);
        f.store
            .insert_vaccination(&NewVaccination {
                schedule_id: "v1".into(),
                baby_id: "b1".into(),
                vaccine_name: "DTaP".into(),
                dose_number: 1,
                age_in_months: 3,
                reminder_days: 7,
            })
            .unwrap();
        f.service
            .ingest_consent("cg-a", TemplateKind::Vaccination, "tpl-vaccine", Some(at(2024, 4, 14, 0, 0)))
            .await
            .unwrap();

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        let call = &f.transport.calls()[0];
        assert_eq!(call.landing_page, "pages/vaccine/vaccine");
        assert_eq!(call.payload.get("thing1"), Some("DTaP"));
        assert_eq!(call.payload.get("time2"), Some("2024-04-15 00:00:00"));
        assert_eq!(call.payload.get("number3"), Some("1"));
        assert_eq!(
            f.store.notified_state(EventKind::VaccinationOverdue, "v1").unwrap(),
            Some((true, Some(at(2024, 4, 15, 2, 0))))
        );
    }

    #[tokio::test]
    async fn vaccination_due_inside_reminder_window() {
        let f = fixture(at(2024, 4, 10, 9, 0), &["cg-a"]);
        f.store
            .insert_vaccination(&NewVaccination {
                schedule_id: "v1".into(),
                baby_id: "b1".into(),
                vaccine_name: "DTaP".into(),
                dose_number: 1,
                age_in_months: 3,
                reminder_days: 7,
            })
            .unwrap();
        f.service
            .ingest_consent("cg-a", TemplateKind::Vaccination, "tpl-vaccine", None)
            .await
            .unwrap();

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        let call = &f.transport.calls()[0];
        assert_eq!(call.payload.get("time2"), Some("2024-04-15 00:00:00"));
        assert_eq!(call.payload.get("number3"), None);

        // one flag covers both kinds: no second reminder once overdue
        f.clock.set(at(2024, 4, 20, 9, 0));
        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(report.candidates, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumption_hands_out_one_token() {
        let f = fixture(at(2024, 5, 1, 12, 5), &["cg-a"]);
        f.service
            .ingest_consent("cg-a", TemplateKind::SolidFeeding, "tpl-solid", Some(at(2024, 5, 1, 8, 0)))
            .await
            .unwrap();
        let ledger = f.service.ledger.clone();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.consume("cg-a", TemplateKind::SolidFeeding).await })
            })
            .collect();
        let mut won = 0;
        let mut lost = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => won += 1,
                Err(NutriBabyError::NoTokenAvailable { .. }) => lost += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((won, lost), (1, 1));
    }

    #[tokio::test]
    async fn expired_token_is_skipped_and_swept() {
        let f = fixture(at(2024, 5, 1, 12, 5), &["cg-a"]);
        f.store
            .insert_feeding_record(&breast_record("r1", "b1", at(2024, 5, 1, 9, 0), 180))
            .unwrap();
        // granted eight days ago, lifetime is seven
        f.service
            .ingest_consent("cg-a", TemplateKind::BreastFeeding, "tpl-breast", Some(at(2024, 4, 23, 12, 0)))
            .await
            .unwrap();

        let report = f.service.force_scan().await.unwrap().unwrap();
        assert_eq!(report.skipped_no_token, 1);
        assert_eq!(report.swept, 1);
        assert!(f.transport.calls().is_empty());

        let status = f.service.list_status("cg-a").await.unwrap();
        let breast = status.iter().find(|s| s.template_kind == TemplateKind::BreastFeeding).unwrap();
        assert_eq!((breast.available, breast.expired), (0, 1));
    }

    #[tokio::test]
    async fn unknown_template_id_is_still_recorded() {
        let f = fixture(at(2024, 5, 1, 12, 5), &["cg-a"]);
        let token = f
            .service
            .ingest_consent("cg-a", TemplateKind::SolidFeeding, "tpl-solid-old", None)
            .await
            .unwrap();
        assert_eq!(token.granted_at, at(2024, 5, 1, 12, 5));
        assert_eq!(token.expires_at, at(2024, 5, 8, 12, 5));
    }

    #[test]
    fn zero_cadence_is_rejected_up_front() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = ReminderConfig {
            tick_interval_secs: Some(0),
            ..test_config()
        };
        let result = ReminderService::new(
            &config,
            store,
            Arc::new(MockTransport::new()),
            Arc::new(ManualClock::new(at(2024, 5, 1, 12, 5))),
        );
        assert!(matches!(result, Err(NutriBabyError::Config(_))));
    }
}
