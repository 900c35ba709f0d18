//! Event and template kinds shared by config, store and dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::NutriBabyError;

/// Kind of domain event a reminder is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BreastFeeding,
    BottleFeeding,
    SolidFeeding,
    VaccinationDue,
    VaccinationOverdue,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::BreastFeeding,
        EventKind::BottleFeeding,
        EventKind::SolidFeeding,
        EventKind::VaccinationDue,
        EventKind::VaccinationOverdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BreastFeeding => "breast_feeding",
            EventKind::BottleFeeding => "bottle_feeding",
            EventKind::SolidFeeding => "solid_feeding",
            EventKind::VaccinationDue => "vaccination_due",
            EventKind::VaccinationOverdue => "vaccination_overdue",
        }
    }

    /// Consent bucket a reminder of this kind draws from.
    pub fn template_kind(&self) -> TemplateKind {
        match self {
            EventKind::BreastFeeding => TemplateKind::BreastFeeding,
            EventKind::BottleFeeding => TemplateKind::BottleFeeding,
            EventKind::SolidFeeding => TemplateKind::SolidFeeding,
            EventKind::VaccinationDue | EventKind::VaccinationOverdue => TemplateKind::Vaccination,
        }
    }

    pub fn is_feeding(&self) -> bool {
        matches!(
            self,
            EventKind::BreastFeeding | EventKind::BottleFeeding | EventKind::SolidFeeding
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = NutriBabyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| NutriBabyError::RendererMissing(s.to_string()))
    }
}

/// Coarse notification bucket; each maps to one downstream template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    BreastFeeding,
    BottleFeeding,
    SolidFeeding,
    Vaccination,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::BreastFeeding,
        TemplateKind::BottleFeeding,
        TemplateKind::SolidFeeding,
        TemplateKind::Vaccination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::BreastFeeding => "breast_feeding",
            TemplateKind::BottleFeeding => "bottle_feeding",
            TemplateKind::SolidFeeding => "solid_feeding",
            TemplateKind::Vaccination => "vaccination",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = NutriBabyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| NutriBabyError::InvalidRecord(format!("unknown template kind '{s}'")))
    }
}
