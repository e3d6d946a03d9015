//! Event-coding labels
//!
//! The three enumerated dimensions carry the numeric codes used by the
//! coding scheme. Conversion from a code is strict: unknown codes yield
//! `None` and are never mapped to a nearby value.

use serde::{Deserialize, Serialize};

/// Presence and type of social protest (`SP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SocialProtest {
    /// Collective action directed at authorities or employers.
    VerticalConflict,
    /// Conflict between groups, or individual action.
    HorizontalOrIndividual,
    NoProtest,
}

impl SocialProtest {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::VerticalConflict),
            9 => Some(Self::HorizontalOrIndividual),
            1 => Some(Self::NoProtest),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::VerticalConflict => 2,
            Self::HorizontalOrIndividual => 9,
            Self::NoProtest => 1,
        }
    }
}

/// Whether the reported event happened within a year of publication (`CU`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurrentEvent {
    WithinYear,
    PriorToYear,
}

impl CurrentEvent {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::WithinYear),
            1 => Some(Self::PriorToYear),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::WithinYear => 2,
            Self::PriorToYear => 1,
        }
    }
}

/// Whether the event is inside the in-scope region (`INT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeographicScope {
    InIndia,
    OutsideIndia,
}

impl GeographicScope {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::InIndia),
            1 => Some(Self::OutsideIndia),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::InIndia => 2,
            Self::OutsideIndia => 1,
        }
    }
}

/// The oracle's structured judgment for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub social_protest: SocialProtest,
    pub current_event: CurrentEvent,
    pub scope: GeographicScope,
    pub city: Option<String>,
    pub other_location: Option<String>,
    pub actors: Option<String>,
    pub demands: Option<String>,
    pub action_type: Option<String>,
}

impl Label {
    /// A label with the enumerated fields set and no extracted entities.
    pub fn new(social_protest: SocialProtest, current_event: CurrentEvent, scope: GeographicScope) -> Self {
        Self {
            social_protest,
            current_event,
            scope,
            city: None,
            other_location: None,
            actors: None,
            demands: None,
            action_type: None,
        }
    }
}
