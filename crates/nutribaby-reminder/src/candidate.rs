//! Reminder candidates: the view the engine takes over domain records.

use chrono::{DateTime, Duration, Utc};
use nutribaby_core::EventKind;
use serde::{Deserialize, Serialize};

/// A domain record that may generate a reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderCandidate {
    /// Feeding record id or vaccination schedule id.
    pub record_id: String,
    /// Baby the record belongs to.
    pub subject_id: String,
    pub event_kind: EventKind,
    /// Instant the reference event occurred (for vaccinations: the instant
    /// the reminder window opened).
    pub event_time: DateTime<Utc>,
    /// Delay after `event_time` at which the reminder is due. `None` opts out.
    pub interval: Option<Duration>,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
    pub details: CandidateDetails,
}

impl ReminderCandidate {
    /// `event_time + interval`, if the record asks for a reminder at all.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.interval.map(|interval| self.event_time + interval)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.notified && self.due_at().is_some_and(|due| due <= now)
    }

    /// Time the payload is measured from: the feeding itself, or the
    /// vaccination due date.
    pub fn reference_time(&self) -> DateTime<Utc> {
        match &self.details {
            CandidateDetails::Vaccination(v) => v.due_at,
            CandidateDetails::Feeding(_) => self.event_time,
        }
    }
}

/// Kind-specific attributes used by the renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CandidateDetails {
    Feeding(FeedingDetail),
    Vaccination(VaccinationDetail),
}

/// Feeding attributes, stored as typed JSON in `feeding_records.detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedingDetail {
    Breast {
        #[serde(default)]
        side: Option<BreastSide>,
        #[serde(default)]
        duration_secs: Option<u32>,
    },
    Bottle {
        #[serde(default)]
        amount_ml: Option<u32>,
        #[serde(default)]
        milk_kind: MilkKind,
    },
    Solid {
        #[serde(default)]
        food_name: String,
    },
}

impl FeedingDetail {
    pub fn event_kind(&self) -> EventKind {
        match self {
            FeedingDetail::Breast { .. } => EventKind::BreastFeeding,
            FeedingDetail::Bottle { .. } => EventKind::BottleFeeding,
            FeedingDetail::Solid { .. } => EventKind::SolidFeeding,
        }
    }

    /// Value of the `feeding_type` column.
    pub fn feeding_type(&self) -> &'static str {
        match self {
            FeedingDetail::Breast { .. } => "breast",
            FeedingDetail::Bottle { .. } => "bottle",
            FeedingDetail::Solid { .. } => "food",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreastSide {
    Left,
    Right,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilkKind {
    #[default]
    Formula,
    BreastMilk,
}

/// Vaccination attributes derived from `vaccination_schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccinationDetail {
    pub vaccine_name: String,
    pub dose_number: u32,
    /// birth date + months offset
    pub due_at: DateTime<Utc>,
}

/// A caregiver bound to a baby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaregiverBinding {
    pub subject_id: String,
    pub caregiver_id: String,
    /// Informational only (e.g. "mother", "grandparent").
    pub role: String,
}

/// Keyset position inside one scan source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub subject_id: String,
    pub event_time: DateTime<Utc>,
    pub record_id: String,
}

impl PageCursor {
    pub fn after(candidate: &ReminderCandidate) -> Self {
        Self {
            subject_id: candidate.subject_id.clone(),
            event_time: candidate.event_time,
            record_id: candidate.record_id.clone(),
        }
    }
}

/// One page of a scan source.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<ReminderCandidate>,
    /// `None` once the source is exhausted.
    pub next: Option<PageCursor>,
}
