//! Template renderers: turn a candidate into a subscribe-message payload.
//!
//! One strategy per event kind, looked up through [`RendererRegistry`].
//! Rendering is pure: same candidate, same times, same payload.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use nutribaby_core::{EventKind, NutriBabyError, ReminderConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::candidate::{BreastSide, CandidateDetails, FeedingDetail, MilkKind, ReminderCandidate};

const BREAST_TIP: &str = "Time to nurse, watch for hunger cues";
const BOTTLE_TIP: &str = "Time for a bottle, prepare it in advance";
const SOLID_TIP: &str = "Time for solids, watch for allergic reactions";
const VACCINE_DUE_TIP: &str = "Please book the clinic visit in time";
const VACCINE_OVERDUE_TIP: &str = "Overdue, please arrange a catch-up dose";

/// Ordered field → value map, sent as `{"field": {"value": "..."}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wire shape of the `data` object.
    pub fn to_wire(&self) -> serde_json::Value {
        let data: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::json!({ "value": v })))
            .collect();
        serde_json::Value::Object(data)
    }
}

/// Human text for time since the last event.
///
/// Under an hour: `about N minutes`; exactly one whole hour: `about 1 hour`;
/// otherwise `about N hours` with N truncated.
pub fn format_elapsed(elapsed: Duration) -> String {
    let minutes = elapsed.num_minutes().max(0);
    if minutes < 60 {
        return format!("about {minutes} minutes");
    }
    match minutes / 60 {
        1 => "about 1 hour".to_string(),
        hours => format!("about {hours} hours"),
    }
}

fn wall_clock(t: DateTime<Utc>, offset: FixedOffset) -> String {
    t.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn mismatch(kind: EventKind, candidate: &ReminderCandidate) -> NutriBabyError {
    NutriBabyError::InvalidRecord(format!(
        "record {} has no {kind} details",
        candidate.record_id
    ))
}

/// Strategy that builds the payload for one event kind.
pub trait TemplateRenderer: Send + Sync {
    fn event_kind(&self) -> EventKind;

    /// Downstream template this renderer fills.
    fn template_id(&self) -> &str;

    /// Whether the candidate carries the details this renderer needs.
    fn accepts(&self, candidate: &ReminderCandidate) -> bool;

    fn render(
        &self,
        candidate: &ReminderCandidate,
        last_event_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<Payload>;
}

// ─── Feeding ──────────────────────────────────────────────

pub struct BreastFeedingRenderer {
    template_id: String,
    offset: FixedOffset,
}

impl BreastFeedingRenderer {
    pub fn new(template_id: impl Into<String>, offset: FixedOffset) -> Self {
        Self { template_id: template_id.into(), offset }
    }
}

impl TemplateRenderer for BreastFeedingRenderer {
    fn event_kind(&self) -> EventKind {
        EventKind::BreastFeeding
    }

    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn accepts(&self, candidate: &ReminderCandidate) -> bool {
        matches!(candidate.details, CandidateDetails::Feeding(FeedingDetail::Breast { .. }))
    }

    fn render(
        &self,
        candidate: &ReminderCandidate,
        last_event_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<Payload> {
        let CandidateDetails::Feeding(FeedingDetail::Breast { side, .. }) = &candidate.details else {
            return Err(mismatch(self.event_kind(), candidate));
        };
        let side = match side {
            Some(BreastSide::Left) => "left side",
            Some(BreastSide::Right) => "right side",
            Some(BreastSide::Both) => "both sides",
            None => "breast milk",
        };
        let mut payload = Payload::new();
        payload.insert("time1", wall_clock(last_event_time, self.offset));
        payload.insert("thing2", format_elapsed(elapsed));
        payload.insert("phrase3", side);
        payload.insert("thing4", BREAST_TIP);
        Ok(payload)
    }
}

pub struct BottleFeedingRenderer {
    template_id: String,
    offset: FixedOffset,
}

impl BottleFeedingRenderer {
    pub fn new(template_id: impl Into<String>, offset: FixedOffset) -> Self {
        Self { template_id: template_id.into(), offset }
    }
}

impl TemplateRenderer for BottleFeedingRenderer {
    fn event_kind(&self) -> EventKind {
        EventKind::BottleFeeding
    }

    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn accepts(&self, candidate: &ReminderCandidate) -> bool {
        matches!(candidate.details, CandidateDetails::Feeding(FeedingDetail::Bottle { .. }))
    }

    fn render(
        &self,
        candidate: &ReminderCandidate,
        last_event_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<Payload> {
        let CandidateDetails::Feeding(FeedingDetail::Bottle { amount_ml, milk_kind }) =
            &candidate.details
        else {
            return Err(mismatch(self.event_kind(), candidate));
        };
        let mut payload = Payload::new();
        payload.insert("time1", wall_clock(last_event_time, self.offset));
        payload.insert("thing2", format_elapsed(elapsed));
        payload.insert(
            "character_string3",
            amount_ml.map(|ml| format!("{ml} ml")).unwrap_or_default(),
        );
        payload.insert(
            "phrase4",
            match milk_kind {
                MilkKind::Formula => "formula",
                MilkKind::BreastMilk => "breast milk",
            },
        );
        payload.insert("thing5", BOTTLE_TIP);
        Ok(payload)
    }
}

pub struct SolidFeedingRenderer {
    template_id: String,
    offset: FixedOffset,
}

impl SolidFeedingRenderer {
    pub fn new(template_id: impl Into<String>, offset: FixedOffset) -> Self {
        Self { template_id: template_id.into(), offset }
    }
}

impl TemplateRenderer for SolidFeedingRenderer {
    fn event_kind(&self) -> EventKind {
        EventKind::SolidFeeding
    }

    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn accepts(&self, candidate: &ReminderCandidate) -> bool {
        matches!(candidate.details, CandidateDetails::Feeding(FeedingDetail::Solid { .. }))
    }

    fn render(
        &self,
        candidate: &ReminderCandidate,
        last_event_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<Payload> {
        let CandidateDetails::Feeding(FeedingDetail::Solid { food_name }) = &candidate.details
        else {
            return Err(mismatch(self.event_kind(), candidate));
        };
        let food = match food_name.trim() {
            "" => "solid food",
            name => name,
        };
        let mut payload = Payload::new();
        payload.insert("time1", wall_clock(last_event_time, self.offset));
        payload.insert("thing2", format_elapsed(elapsed));
        payload.insert("character_string3", food);
        payload.insert("phrase4", "solid food");
        payload.insert("thing5", SOLID_TIP);
        Ok(payload)
    }
}

// ─── Vaccination ──────────────────────────────────────────

fn vaccine_label(name: &str, dose: u32) -> String {
    if dose > 1 { format!("{name} (dose {dose})") } else { name.to_string() }
}

pub struct VaccinationDueRenderer {
    template_id: String,
    offset: FixedOffset,
}

impl VaccinationDueRenderer {
    pub fn new(template_id: impl Into<String>, offset: FixedOffset) -> Self {
        Self { template_id: template_id.into(), offset }
    }
}

impl TemplateRenderer for VaccinationDueRenderer {
    fn event_kind(&self) -> EventKind {
        EventKind::VaccinationDue
    }

    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn accepts(&self, candidate: &ReminderCandidate) -> bool {
        matches!(candidate.details, CandidateDetails::Vaccination(_))
    }

    /// `last_event_time` is the due date; `elapsed` is negative until then.
    fn render(
        &self,
        candidate: &ReminderCandidate,
        last_event_time: DateTime<Utc>,
        _elapsed: Duration,
    ) -> Result<Payload> {
        let CandidateDetails::Vaccination(v) = &candidate.details else {
            return Err(mismatch(self.event_kind(), candidate));
        };
        let mut payload = Payload::new();
        payload.insert("thing1", vaccine_label(&v.vaccine_name, v.dose_number));
        payload.insert("time2", wall_clock(last_event_time, self.offset));
        payload.insert("thing4", VACCINE_DUE_TIP);
        Ok(payload)
    }
}

pub struct VaccinationOverdueRenderer {
    template_id: String,
    offset: FixedOffset,
}

impl VaccinationOverdueRenderer {
    pub fn new(template_id: impl Into<String>, offset: FixedOffset) -> Self {
        Self { template_id: template_id.into(), offset }
    }
}

/// Whole days past due, rounded up, at least one.
pub fn days_overdue(elapsed: Duration) -> i64 {
    let secs = elapsed.num_seconds().max(0);
    ((secs + 86_399) / 86_400).max(1)
}

impl TemplateRenderer for VaccinationOverdueRenderer {
    fn event_kind(&self) -> EventKind {
        EventKind::VaccinationOverdue
    }

    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn accepts(&self, candidate: &ReminderCandidate) -> bool {
        matches!(candidate.details, CandidateDetails::Vaccination(_))
    }

    fn render(
        &self,
        candidate: &ReminderCandidate,
        last_event_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<Payload> {
        let CandidateDetails::Vaccination(v) = &candidate.details else {
            return Err(mismatch(self.event_kind(), candidate));
        };
        let mut payload = Payload::new();
        payload.insert("thing1", vaccine_label(&v.vaccine_name, v.dose_number));
        payload.insert("time2", wall_clock(last_event_time, self.offset));
        payload.insert("number3", days_overdue(elapsed).to_string());
        payload.insert("thing4", VACCINE_OVERDUE_TIP);
        Ok(payload)
    }
}

// ─── Registry ─────────────────────────────────────────────

/// Event kind → renderer lookup.
#[derive(Default)]
pub struct RendererRegistry {
    renderers: BTreeMap<EventKind, Box<dyn TemplateRenderer>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in renderers for every kind that has a template id.
    pub fn from_config(config: &ReminderConfig) -> Self {
        let offset = config.local_offset();
        let mut registry = Self::new();
        for kind in EventKind::ALL {
            let Some(id) = config.template_id(kind) else {
                tracing::warn!("⚠️ No template id for {kind}, reminders of this kind will be skipped");
                continue;
            };
            let renderer: Box<dyn TemplateRenderer> = match kind {
                EventKind::BreastFeeding => Box::new(BreastFeedingRenderer::new(id, offset)),
                EventKind::BottleFeeding => Box::new(BottleFeedingRenderer::new(id, offset)),
                EventKind::SolidFeeding => Box::new(SolidFeedingRenderer::new(id, offset)),
                EventKind::VaccinationDue => Box::new(VaccinationDueRenderer::new(id, offset)),
                EventKind::VaccinationOverdue => {
                    Box::new(VaccinationOverdueRenderer::new(id, offset))
                }
            };
            registry.register(renderer);
        }
        registry
    }

    /// Replaces any renderer already registered for the same kind.
    pub fn register(&mut self, renderer: Box<dyn TemplateRenderer>) {
        self.renderers.insert(renderer.event_kind(), renderer);
    }

    pub fn get(&self, kind: EventKind) -> Result<&dyn TemplateRenderer> {
        self.renderers
            .get(&kind)
            .map(|r| r.as_ref())
            .ok_or_else(|| NutriBabyError::RendererMissing(kind.to_string()))
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}
