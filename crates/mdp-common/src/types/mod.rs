//! Shared domain types for museum visitor-interaction records
//!
//! The pipeline never passes untyped field maps downstream: raw input is held in
//! [`RawEvent`] / [`RawExhibition`] exactly as received, and only the validator
//! turns it into the typed [`FactRecord`] / [`ExhibitionRecord`] forms that the
//! sink writer accepts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the fixed-format exhibition identifier.
pub const EXHIBITION_CODE_LEN: usize = 6;

/// Highest kiosk site number in the live feed.
pub const MAX_SITE_NUMBER: u32 = 5;

/// Errors from parsing an exhibition code
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("Exhibition code must be exactly {EXHIBITION_CODE_LEN} characters, got {0}")]
    WrongLength(usize),

    #[error("Exhibition code may only contain A-Z, 0-9, and underscore: {0:?}")]
    InvalidCharacter(String),

    #[error("Exhibition site number is not numeric: {0:?}")]
    InvalidSiteNumber(String),

    #[error("Site number {0} is outside the kiosk range 0-{MAX_SITE_NUMBER}")]
    SiteOutOfRange(u32),
}

/// Fixed-format 6-character external exhibition identifier.
///
/// This is the natural key of the exhibition table (not a surrogate). Codes are
/// upper-case ASCII letters, digits, and underscore, e.g. `EXH_04` or `EX0001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExhibitionCode(String);

impl ExhibitionCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a code from a raw kiosk site number, e.g. `"3"` becomes `EXH_03`.
    ///
    /// The live feed identifies exhibitions by a bare site number; the archive
    /// and the database use the code form. Only the installed kiosk range
    /// (0-[`MAX_SITE_NUMBER`]) is accepted.
    pub fn from_site_number(site: &str) -> Result<Self, CodeError> {
        let n: u32 = site
            .trim()
            .parse()
            .map_err(|_| CodeError::InvalidSiteNumber(site.to_string()))?;
        if n > MAX_SITE_NUMBER {
            return Err(CodeError::SiteOutOfRange(n));
        }
        format!("EXH_{:02}", n).parse()
    }
}

impl FromStr for ExhibitionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != EXHIBITION_CODE_LEN {
            return Err(CodeError::WrongLength(s.len()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(CodeError::InvalidCharacter(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for ExhibitionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from converting a raw value into a [`RatingValue`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Rating value {0} is outside the 0-4 domain")]
pub struct RatingError(pub i64);

/// Closed 0-4 rating scale used by the kiosk terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingValue {
    Terrible,
    Bad,
    Neutral,
    Good,
    Amazing,
}

impl RatingValue {
    /// All legal values, in scale order. Used to seed the rating table.
    pub const ALL: [RatingValue; 5] = [
        RatingValue::Terrible,
        RatingValue::Bad,
        RatingValue::Neutral,
        RatingValue::Good,
        RatingValue::Amazing,
    ];

    pub fn value(self) -> i16 {
        match self {
            RatingValue::Terrible => 0,
            RatingValue::Bad => 1,
            RatingValue::Neutral => 2,
            RatingValue::Good => 3,
            RatingValue::Amazing => 4,
        }
    }

    pub fn meaning(self) -> &'static str {
        match self {
            RatingValue::Terrible => "Terrible",
            RatingValue::Bad => "Bad",
            RatingValue::Neutral => "Neutral",
            RatingValue::Good => "Good",
            RatingValue::Amazing => "Amazing",
        }
    }
}

impl TryFrom<i64> for RatingValue {
    type Error = RatingError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RatingValue::Terrible),
            1 => Ok(RatingValue::Bad),
            2 => Ok(RatingValue::Neutral),
            3 => Ok(RatingValue::Good),
            4 => Ok(RatingValue::Amazing),
            other => Err(RatingError(other)),
        }
    }
}

/// Kind of record flowing through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Vote,
    Assistance,
    Emergency,
    Exhibition,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Vote => "vote",
            RecordKind::Assistance => "assistance",
            RecordKind::Emergency => "emergency",
            RecordKind::Exhibition => "exhibition",
        }
    }

    /// Best-effort kind classification for a raw event that has not been
    /// validated, from the request markers alone. Used to attribute
    /// rejections to the right per-kind tally.
    pub fn from_raw(raw: &RawEvent) -> RecordKind {
        match (raw.val, raw.request_type) {
            (Some(v), Some(t)) if v == -1.0 && t == 1.0 => RecordKind::Emergency,
            (Some(v), _) if v == -1.0 => RecordKind::Assistance,
            _ => RecordKind::Vote,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw interaction event exactly as received from the feed or the archive.
///
/// All fields are optional so that missing data is reported by the validator
/// with a precise reason code instead of failing at deserialization.
///
/// Wire shape: `{"at": <RFC 3339>, "site": "<n>", "val": -1..4, "type": 0|1}`
/// where `val = -1` marks a request and `type` separates assistance (0) from
/// emergency (1). Batch CSV rows carry the same fields as columns; the archive
/// stores `val` and `type` as floats (`0.0`), hence `f64` here — the validator
/// enforces that they are integral.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    pub at: Option<String>,
    pub site: Option<String>,
    pub val: Option<f64>,
    #[serde(rename = "type")]
    pub request_type: Option<f64>,
}

/// Raw exhibition metadata row from the bulk archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExhibition {
    #[serde(rename = "EXHIBITION_ID")]
    pub exhibition_id: Option<String>,
    #[serde(rename = "EXHIBITION_NAME")]
    pub name: Option<String>,
    #[serde(rename = "DESCRIPTION")]
    pub description: Option<String>,
    #[serde(rename = "START_DATE")]
    pub start_date: Option<String>,
    #[serde(rename = "DEPARTMENT")]
    pub department: Option<String>,
    #[serde(rename = "FLOOR")]
    pub floor: Option<String>,
}

/// A fully validated, typed fact record ready for the sink writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactRecord {
    Vote {
        exhibition: ExhibitionCode,
        at: DateTime<Utc>,
        rating: RatingValue,
    },
    Assistance {
        exhibition: ExhibitionCode,
        at: DateTime<Utc>,
    },
    Emergency {
        exhibition: ExhibitionCode,
        at: DateTime<Utc>,
    },
}

impl FactRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            FactRecord::Vote { .. } => RecordKind::Vote,
            FactRecord::Assistance { .. } => RecordKind::Assistance,
            FactRecord::Emergency { .. } => RecordKind::Emergency,
        }
    }

    pub fn exhibition(&self) -> &ExhibitionCode {
        match self {
            FactRecord::Vote { exhibition, .. }
            | FactRecord::Assistance { exhibition, .. }
            | FactRecord::Emergency { exhibition, .. } => exhibition,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            FactRecord::Vote { at, .. }
            | FactRecord::Assistance { at, .. }
            | FactRecord::Emergency { at, .. } => *at,
        }
    }
}

/// A fully validated exhibition reference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhibitionRecord {
    pub code: ExhibitionCode,
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub department_title: String,
    pub floor: String,
}
