//! Performance array builder: turns the `midi` JSON payload into
//! [`PerformanceNote`]s.
//!
//! Each element must be a 9-element array in the order of [`FIELDS`].
//! Coercion is strict: float fields take any JSON number, integer fields
//! take integers (or floats with no fractional part) inside the i32 range,
//! and the id must be a string of at most 256 characters. Anything else is
//! reported as a [`PerformanceError`] naming the element and field.

use std::fmt;

use serde_json::Value;

use crate::model::{PerformanceNote, MAX_PERFORMANCE_ID_LEN};

/// Field names in the order they appear in each tuple.
pub const FIELDS: [&str; 9] = [
    "onset_sec",
    "duration_sec",
    "onset_tick",
    "duration_tick",
    "pitch",
    "velocity",
    "track",
    "channel",
    "id",
];

/// Errors from building the performance array.
#[derive(Debug, Clone, PartialEq)]
pub enum PerformanceError {
    /// The payload is not valid JSON
    Json(String),
    /// The payload is valid JSON but not an array
    NotAnArray,
    /// An element is not an array
    NotATuple { index: usize },
    /// An element has the wrong number of values
    WrongArity { index: usize, found: usize },
    /// A value does not fit its declared field type
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for PerformanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceError::Json(s) => write!(f, "Invalid MIDI JSON: {}", s),
            PerformanceError::NotAnArray => write!(f, "MIDI JSON must be an array of notes"),
            PerformanceError::NotATuple { index } => {
                write!(f, "MIDI note {} is not an array", index)
            }
            PerformanceError::WrongArity { index, found } => write!(
                f,
                "MIDI note {} has {} values, expected {}",
                index,
                found,
                FIELDS.len()
            ),
            PerformanceError::InvalidField {
                index,
                field,
                reason,
            } => write!(f, "MIDI note {} field '{}': {}", index, field, reason),
        }
    }
}

impl std::error::Error for PerformanceError {}

/// Parse the `midi` form field.
pub fn parse_performance(json: &str) -> Result<Vec<PerformanceNote>, PerformanceError> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| PerformanceError::Json(e.to_string()))?;
    performance_from_value(&value)
}

/// Build the performance array from an already-parsed JSON value.
pub fn performance_from_value(value: &Value) -> Result<Vec<PerformanceNote>, PerformanceError> {
    let elements = value.as_array().ok_or(PerformanceError::NotAnArray)?;
    elements
        .iter()
        .enumerate()
        .map(|(index, element)| {
            let items = element
                .as_array()
                .ok_or(PerformanceError::NotATuple { index })?;
            note_from_tuple(index, items)
        })
        .collect()
}

fn note_from_tuple(index: usize, items: &[Value]) -> Result<PerformanceNote, PerformanceError> {
    if items.len() != FIELDS.len() {
        return Err(PerformanceError::WrongArity {
            index,
            found: items.len(),
        });
    }

    Ok(PerformanceNote {
        onset_sec: as_f32(index, 0, &items[0])?,
        duration_sec: as_f32(index, 1, &items[1])?,
        onset_tick: as_i32(index, 2, &items[2])?,
        duration_tick: as_i32(index, 3, &items[3])?,
        pitch: as_i32(index, 4, &items[4])?,
        velocity: as_i32(index, 5, &items[5])?,
        track: as_i32(index, 6, &items[6])?,
        channel: as_i32(index, 7, &items[7])?,
        id: as_id(index, 8, &items[8])?,
    })
}

fn invalid(index: usize, field: usize, reason: impl Into<String>) -> PerformanceError {
    PerformanceError::InvalidField {
        index,
        field: FIELDS[field],
        reason: reason.into(),
    }
}

fn as_f32(index: usize, field: usize, value: &Value) -> Result<f32, PerformanceError> {
    let v = value
        .as_f64()
        .ok_or_else(|| invalid(index, field, format!("expected a number, got {value}")))?;
    let narrowed = v as f32;
    if !narrowed.is_finite() {
        return Err(invalid(index, field, format!("{v} does not fit a 32-bit float")));
    }
    Ok(narrowed)
}

fn as_i32(index: usize, field: usize, value: &Value) -> Result<i32, PerformanceError> {
    if let Some(i) = value.as_i64() {
        return i32::try_from(i)
            .map_err(|_| invalid(index, field, format!("{i} does not fit a 32-bit integer")));
    }
    if let Some(f) = value.as_f64() {
        if f.fract() != 0.0 {
            return Err(invalid(index, field, format!("expected an integer, got {f}")));
        }
        if f < i32::MIN as f64 || f > i32::MAX as f64 {
            return Err(invalid(index, field, format!("{f} does not fit a 32-bit integer")));
        }
        return Ok(f as i32);
    }
    Err(invalid(index, field, format!("expected an integer, got {value}")))
}

fn as_id(index: usize, field: usize, value: &Value) -> Result<String, PerformanceError> {
    let id = value
        .as_str()
        .ok_or_else(|| invalid(index, field, format!("expected a string, got {value}")))?;
    let len = id.chars().count();
    if len > MAX_PERFORMANCE_ID_LEN {
        return Err(invalid(
            index,
            field,
            format!("{len} characters, at most {MAX_PERFORMANCE_ID_LEN} allowed"),
        ));
    }
    Ok(id.to_string())
}
