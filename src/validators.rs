//! Document validators and the payload telemetry merge handler.
//!
//! In the system this crate is a client of, these run server-side: a validation
//! function gates every write, and an update handler performs the
//! content-addressed merge for payload telemetry. They're specified — and
//! implemented — here because [`crate::store::FakeDocumentStore`] must enforce
//! the identical contract for this crate's own tests to mean anything, and
//! because the real HTTP-backed store must be held to the same rules.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use crate::document::{ListenerDoc, PayloadTelemetryDoc, ReceiverRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingField(&'static str),
    WrongType(&'static str),
    InvalidTimestamp(&'static str),
    InvalidBase64,
    EmptyReceivers,
    CoordinateOutOfRange { field: &'static str, value: f64 },
    AdminOnly(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(name) => write!(f, "missing required field {name:?}"),
            ValidationError::WrongType(name) => write!(f, "field {name:?} has the wrong type"),
            ValidationError::InvalidTimestamp(name) => {
                write!(f, "field {name:?} is not a valid RFC-3339 timestamp")
            }
            ValidationError::InvalidBase64 => write!(f, "data._raw is not valid base64"),
            ValidationError::EmptyReceivers => {
                write!(f, "payload telemetry document has no receivers")
            }
            ValidationError::CoordinateOutOfRange { field, value } => {
                write!(f, "{field} {value} is out of range")
            }
            ValidationError::AdminOnly(kind) => {
                write!(f, "{kind} documents may only be written by administrators")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

fn is_rfc3339(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

/// Validates a `listener_telemetry` document: callsign, latitude and longitude
/// (when present) in range, well-formed timestamps.
pub fn validate_listener_telemetry(doc: &ListenerDoc) -> Result<(), ValidationError> {
    validate_listener_envelope(doc)?;
    match doc.data.get("callsign") {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(_) => return Err(ValidationError::WrongType("callsign")),
        None => return Err(ValidationError::MissingField("callsign")),
    }
    if let Some(lat) = doc.data.get("latitude") {
        let lat = lat.as_f64().ok_or(ValidationError::WrongType("latitude"))?;
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::CoordinateOutOfRange {
                field: "latitude",
                value: lat,
            });
        }
    }
    if let Some(lon) = doc.data.get("longitude") {
        let lon = lon.as_f64().ok_or(ValidationError::WrongType("longitude"))?;
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::CoordinateOutOfRange {
                field: "longitude",
                value: lon,
            });
        }
    }
    Ok(())
}

/// Validates a `listener_information` document: just the envelope and a
/// callsign, since the remaining metadata is intentionally free-form.
pub fn validate_listener_information(doc: &ListenerDoc) -> Result<(), ValidationError> {
    validate_listener_envelope(doc)?;
    match doc.data.get("callsign") {
        Some(Value::String(s)) if !s.is_empty() => Ok(()),
        Some(_) => Err(ValidationError::WrongType("callsign")),
        None => Err(ValidationError::MissingField("callsign")),
    }
}

fn validate_listener_envelope(doc: &ListenerDoc) -> Result<(), ValidationError> {
    if doc.doc_type.is_empty() {
        return Err(ValidationError::MissingField("type"));
    }
    if !is_rfc3339(&doc.time_created) {
        return Err(ValidationError::InvalidTimestamp("time_created"));
    }
    if !is_rfc3339(&doc.time_uploaded) {
        return Err(ValidationError::InvalidTimestamp("time_uploaded"));
    }
    Ok(())
}

/// Validates a `payload_telemetry` document: `data._raw` must be valid
/// base64, `receivers` must be non-empty, and every receiver sub-record must
/// carry well-formed timestamps.
pub fn validate_payload_telemetry(doc: &PayloadTelemetryDoc) -> Result<(), ValidationError> {
    if BASE64.decode(&doc.data.raw).is_err() {
        return Err(ValidationError::InvalidBase64);
    }
    if doc.receivers.is_empty() {
        return Err(ValidationError::EmptyReceivers);
    }
    for record in doc.receivers.values() {
        if !is_rfc3339(&record.time_created) {
            return Err(ValidationError::InvalidTimestamp("time_created"));
        }
        if !is_rfc3339(&record.time_uploaded) {
            return Err(ValidationError::InvalidTimestamp("time_uploaded"));
        }
    }
    Ok(())
}

/// `flight`, `payload_configuration` and `habitat` documents are admin-only;
/// an ordinary callsign writer is always rejected. The uploader never
/// constructs these kinds itself — this exists purely to document (and let
/// the fake store enforce) the contract.
pub fn validate_admin_only(kind: &'static str, is_admin: bool) -> Result<(), ValidationError> {
    if is_admin {
        Ok(())
    } else {
        Err(ValidationError::AdminOnly(kind))
    }
}

/// The `add_listener` update handler: merges `receivers.<callsign>` from the
/// incoming record onto `existing`, leaving every other receiver's sub-record
/// untouched, and creates the document if it doesn't exist yet.
pub fn merge_add_listener(
    existing: Option<PayloadTelemetryDoc>,
    id: &str,
    raw_base64: &str,
    callsign: &str,
    record: ReceiverRecord,
) -> PayloadTelemetryDoc {
    match existing {
        Some(mut doc) => {
            doc.receivers.insert(callsign.to_string(), record);
            doc
        }
        None => {
            let mut receivers = BTreeMap::new();
            receivers.insert(callsign.to_string(), record);
            PayloadTelemetryDoc {
                id: id.to_string(),
                rev: None,
                doc_type: crate::document::TYPE_PAYLOAD_TELEMETRY.to_string(),
                data: crate::document::PayloadTelemetryData {
                    raw: raw_base64.to_string(),
                },
                receivers,
            }
        }
    }
}
