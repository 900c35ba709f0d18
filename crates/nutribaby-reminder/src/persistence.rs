//! SQLite-backed store for babies, feeding records, vaccination schedules,
//! consent tokens and the send log.
//!
//! Timestamps are stored as UTC `YYYY-MM-DD HH:MM:SS` text so due instants
//! can be computed in-query with `datetime()`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use nutribaby_core::{EventKind, NutriBabyError, Result, TemplateKind};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, types::Type};
use std::path::Path;
use std::sync::Mutex;

use crate::candidate::{
    CandidateDetails, CaregiverBinding, FeedingDetail, Page, PageCursor, ReminderCandidate,
    VaccinationDetail,
};
use crate::ledger::{AuthorizationToken, TokenStatus, TokenSummary};
use crate::store::{SendLogEntry, SendStatus, Store};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn ts(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|n| n.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_kind(idx: usize, s: &str) -> rusqlite::Result<TemplateKind> {
    s.parse::<TemplateKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_status(idx: usize, s: &str) -> rusqlite::Result<SendStatus> {
    SendStatus::parse(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn db_err(e: rusqlite::Error) -> NutriBabyError {
    NutriBabyError::Store(e.to_string())
}

/// A feeding record as written by the recording flow.
#[derive(Debug, Clone)]
pub struct NewFeedingRecord {
    pub record_id: String,
    pub baby_id: String,
    pub event_time: DateTime<Utc>,
    pub detail: FeedingDetail,
    /// `None` means the caregiver did not ask for a reminder.
    pub reminder_interval: Option<Duration>,
    pub created_by: String,
}

/// A vaccination schedule entry.
#[derive(Debug, Clone)]
pub struct NewVaccination {
    pub schedule_id: String,
    pub baby_id: String,
    pub vaccine_name: String,
    pub dose_number: u32,
    /// Months after birth the dose is due.
    pub age_in_months: u32,
    /// Days before the due date the reminder window opens.
    pub reminder_days: u32,
}

/// SQLite implementation of [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .ok();
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
            CREATE TABLE IF NOT EXISTS babies (
                baby_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                birth_date TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS baby_collaborators (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                baby_id TEXT NOT NULL,
                caregiver_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'caregiver',
                deleted_at TEXT,
                UNIQUE (baby_id, caregiver_id)
            );

            CREATE TABLE IF NOT EXISTS feeding_records (
                record_id TEXT PRIMARY KEY,
                baby_id TEXT NOT NULL,
                feeding_type TEXT NOT NULL,      -- 'breast', 'bottle', 'food'
                event_time TEXT NOT NULL,
                detail TEXT NOT NULL,            -- JSON, tagged by type
                reminder_interval_secs INTEGER,  -- NULL: no reminder wanted
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                reminder_sent_at TEXT,
                created_by TEXT NOT NULL DEFAULT '',
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_feeding_due
                ON feeding_records (reminder_sent, baby_id, event_time);

            CREATE TABLE IF NOT EXISTS vaccination_schedule (
                schedule_id TEXT PRIMARY KEY,
                baby_id TEXT NOT NULL,
                vaccine_name TEXT NOT NULL,
                dose_number INTEGER NOT NULL DEFAULT 1,
                age_in_months INTEGER NOT NULL,
                reminder_days INTEGER NOT NULL DEFAULT 7,
                vaccination_status TEXT NOT NULL DEFAULT 'pending',  -- pending, completed, skipped
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                reminder_sent_at TEXT,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS subscribe_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_id TEXT NOT NULL UNIQUE,
                caregiver_id TEXT NOT NULL,
                template_kind TEXT NOT NULL,
                template_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'available',  -- available, consumed, expired
                granted_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                consumed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_lookup
                ON subscribe_tokens (caregiver_id, template_kind, status, granted_at);

            CREATE TABLE IF NOT EXISTS message_send_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                caregiver_id TEXT NOT NULL,
                template_kind TEXT NOT NULL,
                template_id TEXT NOT NULL,
                payload TEXT NOT NULL,           -- JSON object
                page TEXT NOT NULL,
                status TEXT NOT NULL,            -- sent, failed
                error_text TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_send_logs_caregiver
                ON message_send_logs (caregiver_id, created_at);
         ",
            )
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| NutriBabyError::Store(format!("connection lock poisoned: {e}")))?;
        f(&mut *conn).map_err(db_err)
    }

    // ─── Domain records ───────────────────────────────────────

    pub fn insert_baby(&self, baby_id: &str, name: &str, birth_date: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO babies (baby_id, name, birth_date) VALUES (?1, ?2, ?3)",
                rusqlite::params![baby_id, name, ts(birth_date)],
            )
        })?;
        Ok(())
    }

    pub fn soft_delete_baby(&self, baby_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE babies SET deleted_at = ?2 WHERE baby_id = ?1",
                rusqlite::params![baby_id, ts(at)],
            )
        })?;
        Ok(())
    }

    pub fn bind_caregiver(&self, baby_id: &str, caregiver_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO baby_collaborators (baby_id, caregiver_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT (baby_id, caregiver_id) DO UPDATE SET role = ?3, deleted_at = NULL",
                rusqlite::params![baby_id, caregiver_id, role],
            )
        })?;
        Ok(())
    }

    pub fn unbind_caregiver(&self, baby_id: &str, caregiver_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE baby_collaborators SET deleted_at = ?3 WHERE baby_id = ?1 AND caregiver_id = ?2",
                rusqlite::params![baby_id, caregiver_id, ts(at)],
            )
        })?;
        Ok(())
    }

    pub fn insert_feeding_record(&self, record: &NewFeedingRecord) -> Result<()> {
        let interval_secs = match record.reminder_interval {
            Some(d) if d <= Duration::zero() => {
                return Err(NutriBabyError::InvalidRecord(format!(
                    "record {}: reminder interval must be positive",
                    record.record_id
                )));
            }
            Some(d) => Some(d.num_seconds()),
            None => None,
        };
        let detail = serde_json::to_string(&record.detail)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feeding_records
                 (record_id, baby_id, feeding_type, event_time, detail, reminder_interval_secs, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.record_id,
                    record.baby_id,
                    record.detail.feeding_type(),
                    ts(record.event_time),
                    detail,
                    interval_secs,
                    record.created_by,
                ],
            )
        })?;
        Ok(())
    }

    pub fn soft_delete_feeding_record(&self, record_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE feeding_records SET deleted_at = ?2 WHERE record_id = ?1",
                rusqlite::params![record_id, ts(at)],
            )
        })?;
        Ok(())
    }

    pub fn insert_vaccination(&self, entry: &NewVaccination) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vaccination_schedule
                 (schedule_id, baby_id, vaccine_name, dose_number, age_in_months, reminder_days)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    entry.schedule_id,
                    entry.baby_id,
                    entry.vaccine_name,
                    entry.dose_number,
                    entry.age_in_months,
                    entry.reminder_days,
                ],
            )
        })?;
        Ok(())
    }

    /// e.g. `completed` once the dose is given.
    pub fn set_vaccination_status(&self, schedule_id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE vaccination_schedule SET vaccination_status = ?2 WHERE schedule_id = ?1",
                rusqlite::params![schedule_id, status],
            )
        })?;
        Ok(())
    }

    /// `(notified, notified_at)` for a record, or `None` if it does not exist.
    pub fn notified_state(
        &self,
        kind: EventKind,
        record_id: &str,
    ) -> Result<Option<(bool, Option<DateTime<Utc>>)>> {
        let sql = if kind.is_feeding() {
            "SELECT reminder_sent, reminder_sent_at FROM feeding_records WHERE record_id = ?1"
        } else {
            "SELECT reminder_sent, reminder_sent_at FROM vaccination_schedule WHERE schedule_id = ?1"
        };
        self.with_conn(|conn| {
            conn.query_row(sql, [record_id], |row| {
                let sent: i64 = row.get(0)?;
                let at: Option<String> = row.get(1)?;
                Ok((sent != 0, parse_opt_ts(1, at)?))
            })
            .optional()
        })
    }
}

/// Raw feeding row, decoded outside the connection lock.
struct FeedingRow {
    record_id: String,
    baby_id: String,
    event_time: DateTime<Utc>,
    detail: String,
    interval_secs: i64,
}

#[async_trait]
impl Store for SqliteStore {
    async fn scan_due_feeding(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        let (c_subject, c_time, c_record) = cursor_params(cursor);
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT f.record_id, f.baby_id, f.event_time, f.detail, f.reminder_interval_secs
                 FROM feeding_records f
                 JOIN babies b ON b.baby_id = f.baby_id
                 WHERE f.deleted_at IS NULL AND b.deleted_at IS NULL
                   AND f.reminder_sent = 0
                   AND f.reminder_interval_secs IS NOT NULL
                   AND datetime(f.event_time, '+' || f.reminder_interval_secs || ' seconds') <= ?1
                   AND (?2 IS NULL OR f.baby_id > ?2
                        OR (f.baby_id = ?2 AND (f.event_time < ?3
                            OR (f.event_time = ?3 AND f.record_id > ?4))))
                 ORDER BY f.baby_id ASC, f.event_time DESC, f.record_id ASC
                 LIMIT ?5",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![ts(now), c_subject, c_time, c_record, limit as i64],
                |row| {
                    let event_time: String = row.get(2)?;
                    Ok(FeedingRow {
                        record_id: row.get(0)?,
                        baby_id: row.get(1)?,
                        event_time: parse_ts(2, &event_time)?,
                        detail: row.get(3)?,
                        interval_secs: row.get(4)?,
                    })
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let next = if rows.len() >= limit {
            rows.last().map(|r| PageCursor {
                subject_id: r.baby_id.clone(),
                event_time: r.event_time,
                record_id: r.record_id.clone(),
            })
        } else {
            None
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let detail = match serde_json::from_str::<FeedingDetail>(&row.detail) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping feeding record {}: bad detail ({e})", row.record_id);
                    continue;
                }
            };
            items.push(ReminderCandidate {
                record_id: row.record_id,
                subject_id: row.baby_id,
                event_kind: detail.event_kind(),
                event_time: row.event_time,
                interval: Some(Duration::seconds(row.interval_secs)),
                notified: false,
                notified_at: None,
                details: CandidateDetails::Feeding(detail),
            });
        }
        Ok(Page { items, next })
    }

    async fn scan_due_vaccination(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        let (c_subject, c_time, c_record) = cursor_params(cursor);
        let items = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT v.schedule_id, v.baby_id, v.vaccine_name, v.dose_number, v.due_at, v.window_at
                 FROM (
                    SELECT s.schedule_id, s.baby_id, s.vaccine_name, s.dose_number,
                           datetime(b.birth_date, '+' || s.age_in_months || ' months') AS due_at,
                           datetime(b.birth_date, '+' || s.age_in_months || ' months',
                                    '-' || s.reminder_days || ' days') AS window_at
                    FROM vaccination_schedule s
                    JOIN babies b ON b.baby_id = s.baby_id
                    WHERE s.deleted_at IS NULL AND b.deleted_at IS NULL
                      AND s.reminder_sent = 0
                      AND s.vaccination_status = 'pending'
                 ) v
                 WHERE v.window_at <= ?1
                   AND (?2 IS NULL OR v.baby_id > ?2
                        OR (v.baby_id = ?2 AND (v.window_at < ?3
                            OR (v.window_at = ?3 AND v.schedule_id > ?4))))
                 ORDER BY v.baby_id ASC, v.window_at DESC, v.schedule_id ASC
                 LIMIT ?5",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![ts(now), c_subject, c_time, c_record, limit as i64],
                |row| {
                    let due_at: String = row.get(4)?;
                    let window_at: String = row.get(5)?;
                    let due_at = parse_ts(4, &due_at)?;
                    let event_kind = if now < due_at {
                        EventKind::VaccinationDue
                    } else {
                        EventKind::VaccinationOverdue
                    };
                    Ok(ReminderCandidate {
                        record_id: row.get(0)?,
                        subject_id: row.get(1)?,
                        event_kind,
                        event_time: parse_ts(5, &window_at)?,
                        interval: Some(Duration::zero()),
                        notified: false,
                        notified_at: None,
                        details: CandidateDetails::Vaccination(VaccinationDetail {
                            vaccine_name: row.get(2)?,
                            dose_number: row.get(3)?,
                            due_at,
                        }),
                    })
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let next = if items.len() >= limit {
            items.last().map(PageCursor::after)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn mark_notified(
        &self,
        kind: EventKind,
        record_id: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<bool> {
        let (update, exists) = if kind.is_feeding() {
            (
                "UPDATE feeding_records SET reminder_sent = 1, reminder_sent_at = ?2
                 WHERE record_id = ?1 AND reminder_sent = 0",
                "SELECT COUNT(*) FROM feeding_records WHERE record_id = ?1",
            )
        } else {
            (
                "UPDATE vaccination_schedule SET reminder_sent = 1, reminder_sent_at = ?2
                 WHERE schedule_id = ?1 AND reminder_sent = 0",
                "SELECT COUNT(*) FROM vaccination_schedule WHERE schedule_id = ?1",
            )
        };
        let (changed, found) = self.with_conn(|conn| {
            let changed = conn.execute(update, rusqlite::params![record_id, ts(notified_at)])?;
            let found: i64 = conn.query_row(exists, [record_id], |r| r.get(0))?;
            Ok((changed, found))
        })?;
        if found == 0 {
            return Err(NutriBabyError::InvalidRecord(format!(
                "no {kind} record '{record_id}' to mark"
            )));
        }
        Ok(changed > 0)
    }

    async fn caregivers_for(&self, subject_id: &str) -> Result<Vec<CaregiverBinding>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT baby_id, caregiver_id, role FROM baby_collaborators
                 WHERE baby_id = ?1 AND deleted_at IS NULL
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([subject_id], |row| {
                Ok(CaregiverBinding {
                    subject_id: row.get(0)?,
                    caregiver_id: row.get(1)?,
                    role: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn insert_token(&self, token: &AuthorizationToken) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subscribe_tokens
                 (token_id, caregiver_id, template_kind, template_id, status, granted_at, expires_at, consumed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    token.token_id,
                    token.caregiver_id,
                    token.template_kind.as_str(),
                    token.template_id,
                    token.status.as_str(),
                    ts(token.granted_at),
                    ts(token.expires_at),
                    token.consumed_at.map(ts),
                ],
            )
        })?;
        Ok(())
    }

    async fn consume_token(
        &self,
        caregiver_id: &str,
        kind: TemplateKind,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationToken>> {
        let now_ts = ts(now);
        let found = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let row = tx
                .query_row(
                    "SELECT id, token_id, template_id, granted_at, expires_at
                     FROM subscribe_tokens
                     WHERE caregiver_id = ?1 AND template_kind = ?2
                       AND status = 'available' AND expires_at > ?3
                     ORDER BY granted_at ASC, id ASC
                     LIMIT 1",
                    rusqlite::params![caregiver_id, kind.as_str(), now_ts],
                    |row| {
                        let granted: String = row.get(3)?;
                        let expires: String = row.get(4)?;
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            parse_ts(3, &granted)?,
                            parse_ts(4, &expires)?,
                        ))
                    },
                )
                .optional()?;
            if let Some((id, ..)) = &row {
                tx.execute(
                    "UPDATE subscribe_tokens SET status = 'consumed', consumed_at = ?2
                     WHERE id = ?1 AND status = 'available'",
                    rusqlite::params![id, now_ts],
                )?;
            }
            tx.commit()?;
            Ok(row)
        })?;

        Ok(found.map(|(_, token_id, template_id, granted_at, expires_at)| AuthorizationToken {
            token_id,
            caregiver_id: caregiver_id.to_string(),
            template_kind: kind,
            template_id,
            status: TokenStatus::Consumed,
            granted_at,
            expires_at,
            consumed_at: Some(now),
        }))
    }

    async fn expire_tokens(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE subscribe_tokens SET status = 'expired'
                 WHERE id IN (
                    SELECT id FROM subscribe_tokens
                    WHERE status = 'available' AND expires_at <= ?1
                    LIMIT ?2
                 )",
                rusqlite::params![ts(now), limit as i64],
            )
        })
    }

    async fn purge_spent_tokens(&self, before: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM subscribe_tokens
                 WHERE id IN (
                    SELECT id FROM subscribe_tokens
                    WHERE status IN ('consumed', 'expired')
                      AND COALESCE(consumed_at, expires_at) < ?1
                    LIMIT ?2
                 )",
                rusqlite::params![ts(before), limit as i64],
            )
        })
    }

    async fn token_summary(
        &self,
        caregiver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT template_kind,
                    SUM(CASE WHEN status = 'available' AND expires_at > ?2 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'consumed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'expired'
                              OR (status = 'available' AND expires_at <= ?2) THEN 1 ELSE 0 END),
                    MIN(CASE WHEN status = 'available' AND expires_at > ?2 THEN expires_at END)
                 FROM subscribe_tokens
                 WHERE caregiver_id = ?1
                 GROUP BY template_kind
                 ORDER BY template_kind",
            )?;
            let rows = stmt.query_map(rusqlite::params![caregiver_id, ts(now)], |row| {
                let kind: String = row.get(0)?;
                Ok(TokenSummary {
                    template_kind: parse_kind(0, &kind)?,
                    available: row.get::<_, i64>(1)? as u64,
                    consumed: row.get::<_, i64>(2)? as u64,
                    expired: row.get::<_, i64>(3)? as u64,
                    next_expiry: parse_opt_ts(4, row.get(4)?)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn append_send_log(&self, entry: &SendLogEntry) -> Result<i64> {
        let payload = serde_json::to_string(&entry.payload)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_send_logs
                 (caregiver_id, template_kind, template_id, payload, page, status, error_text, sent_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    entry.caregiver_id,
                    entry.template_kind.as_str(),
                    entry.template_id,
                    payload,
                    entry.page,
                    entry.status.as_str(),
                    entry.error_text,
                    entry.sent_at.map(ts),
                    ts(entry.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    async fn send_logs(
        &self,
        caregiver_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<SendLogEntry>, u64)> {
        let (rows, total) = self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_send_logs WHERE caregiver_id = ?1",
                [caregiver_id],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare_cached(
                "SELECT id, caregiver_id, template_kind, template_id, payload, page, status,
                        error_text, sent_at, created_at
                 FROM message_send_logs
                 WHERE caregiver_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![caregiver_id, limit as i64, offset as i64],
                |row| {
                    let kind: String = row.get(2)?;
                    let status: String = row.get(6)?;
                    let created_at: String = row.get(9)?;
                    Ok((
                        SendLogEntry {
                            id: Some(row.get(0)?),
                            caregiver_id: row.get(1)?,
                            template_kind: parse_kind(2, &kind)?,
                            template_id: row.get(3)?,
                            payload: Default::default(),
                            page: row.get(5)?,
                            status: parse_status(6, &status)?,
                            error_text: row.get(7)?,
                            sent_at: parse_opt_ts(8, row.get(8)?)?,
                            created_at: parse_ts(9, &created_at)?,
                        },
                        row.get::<_, String>(4)?,
                    ))
                },
            )?;
            Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total))
        })?;

        let mut entries = Vec::with_capacity(rows.len());
        for (mut entry, payload) in rows {
            entry.payload = serde_json::from_str(&payload)?;
            entries.push(entry);
        }
        Ok((entries, total as u64))
    }
}

fn cursor_params(cursor: Option<&PageCursor>) -> (Option<String>, Option<String>, Option<String>) {
    match cursor {
        Some(c) => (
            Some(c.subject_id.clone()),
            Some(ts(c.event_time)),
            Some(c.record_id.clone()),
        ),
        None => (None, None, None),
    }
}
