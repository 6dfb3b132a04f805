//! Record validation
//!
//! Pure functions: raw field set in, fully typed record or a precise reason
//! code out. No I/O happens here, so every rule is unit-testable without a
//! database. The current time is injected by the caller so the
//! future-timestamp rule is deterministic under test.
//!
//! Checks run in order and fail fast:
//!
//! 1. required fields present and non-empty
//! 2. type coercion (numeric parse, timestamp/date parse)
//! 3. exhibition identifier syntactically well-formed
//! 4. timestamp not in the future
//! 5. vote ratings inside the closed 0-4 domain; request type 0 or 1

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use mdp_common::types::{
    CodeError, ExhibitionCode, ExhibitionRecord, FactRecord, RatingValue, RawEvent, RawExhibition,
};

/// Timestamp layout used by the historical kiosk archive.
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date layout used by the exhibition metadata export.
const ARCHIVE_DATE_FORMAT: &str = "%d/%m/%y";

/// Rejection reasons produced by the validator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("Field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("Field '{field}' is not an integer: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Field '{field}' is not a valid timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Field '{field}' is not a valid date: {value:?}")]
    InvalidDate { field: &'static str, value: String },

    #[error(transparent)]
    MalformedCode(#[from] CodeError),

    #[error("Timestamp {at} is in the future")]
    FutureTimestamp { at: String },

    #[error("Rating value {0} is outside the 0-4 domain")]
    RatingOutOfRange(i64),

    #[error("Request type must be 0 (assistance) or 1 (emergency), got {0}")]
    UnknownRequestType(i64),

    #[error("Record payload could not be decoded: {0}")]
    MalformedPayload(String),
}

/// Validate a raw interaction event into a typed fact record.
pub fn validate_event(raw: &RawEvent, now: DateTime<Utc>) -> Result<FactRecord, ValidationError> {
    let at = require_str(raw.at.as_deref(), "at")?;
    let site = require_str(raw.site.as_deref(), "site")?;
    let val = require_int(raw.val, "val")?;

    let at = parse_timestamp(at)?;
    let exhibition = parse_site(site)?;

    if at > now {
        return Err(ValidationError::FutureTimestamp { at: at.to_rfc3339() });
    }

    // val = -1 marks a request; anything else is a vote on the 0-4 scale
    if val == -1 {
        let request_type = match raw.request_type {
            None => return Err(ValidationError::MissingField("type")),
            Some(t) => integral(t, "type")?,
        };
        match request_type {
            0 => Ok(FactRecord::Assistance { exhibition, at }),
            1 => Ok(FactRecord::Emergency { exhibition, at }),
            other => Err(ValidationError::UnknownRequestType(other)),
        }
    } else {
        let rating =
            RatingValue::try_from(val).map_err(|e| ValidationError::RatingOutOfRange(e.0))?;
        Ok(FactRecord::Vote {
            exhibition,
            at,
            rating,
        })
    }
}

/// Validate a raw exhibition metadata row into a typed reference record.
pub fn validate_exhibition(
    raw: &RawExhibition,
    now: DateTime<Utc>,
) -> Result<ExhibitionRecord, ValidationError> {
    let code = require_str(raw.exhibition_id.as_deref(), "EXHIBITION_ID")?;
    let title = require_str(raw.name.as_deref(), "EXHIBITION_NAME")?;
    let description = require_str(raw.description.as_deref(), "DESCRIPTION")?;
    let start_date = require_str(raw.start_date.as_deref(), "START_DATE")?;
    let department = require_str(raw.department.as_deref(), "DEPARTMENT")?;
    let floor = require_str(raw.floor.as_deref(), "FLOOR")?;

    let code: ExhibitionCode = code.parse()?;
    let start_date = parse_date(start_date, "START_DATE")?;

    if start_date > now.date_naive() {
        return Err(ValidationError::FutureTimestamp {
            at: start_date.to_string(),
        });
    }

    Ok(ExhibitionRecord {
        code,
        title: title.to_string(),
        description: description.to_string(),
        start_date,
        department_title: department.to_string(),
        floor: floor.to_string(),
    })
}

fn require_str<'a>(
    value: Option<&'a str>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match value {
        None => Err(ValidationError::MissingField(field)),
        Some(s) if s.trim().is_empty() => Err(ValidationError::EmptyField(field)),
        Some(s) => Ok(s.trim()),
    }
}

fn require_int(value: Option<f64>, field: &'static str) -> Result<i64, ValidationError> {
    match value {
        None => Err(ValidationError::MissingField(field)),
        Some(v) => integral(v, field),
    }
}

/// The archive stores numeric columns as floats; accept them only when they
/// carry an integral value.
fn integral(value: f64, field: &'static str) -> Result<i64, ValidationError> {
    if value.fract() != 0.0 || !value.is_finite() {
        return Err(ValidationError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    Ok(value as i64)
}

/// The live feed identifies exhibitions by bare site number, the archive by
/// full code; accept either form.
fn parse_site(site: &str) -> Result<ExhibitionCode, ValidationError> {
    if site.chars().all(|c| c.is_ascii_digit()) {
        Ok(ExhibitionCode::from_site_number(site)?)
    } else {
        Ok(site.parse()?)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    // Archive rows carry naive timestamps, taken as UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, ARCHIVE_TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    Err(ValidationError::InvalidTimestamp {
        field: "at",
        value: value.to_string(),
    })
}

fn parse_date(value: &str, field: &'static str) -> Result<NaiveDate, ValidationError> {
    if let Ok(d) = NaiveDate::parse_from_str(value, ARCHIVE_DATE_FORMAT) {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(d);
    }
    Err(ValidationError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
