//! The four persisted document shapes and the RFC-3339 timestamp helpers shared
//! by every document the uploader produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TYPE_LISTENER_TELEMETRY: &str = "listener_telemetry";
pub const TYPE_LISTENER_INFORMATION: &str = "listener_information";
pub const TYPE_PAYLOAD_TELEMETRY: &str = "payload_telemetry";

/// Current local time as RFC-3339 with local offset, second precision, e.g.
/// `2011-03-13T06:47:14+00:00`.
pub fn now_rfc3339() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// A listener telemetry or listener information document. Both kinds share the
/// same envelope; only `doc_type` and the validation rules applied to `data`
/// differ (see [`crate::validators`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub data: Map<String, Value>,
    pub time_created: String,
    pub time_uploaded: String,
}

impl ListenerDoc {
    pub fn new(doc_type: &str, data: Map<String, Value>, time_created: String) -> Self {
        ListenerDoc {
            id: None,
            doc_type: doc_type.to_string(),
            data,
            time_created,
            time_uploaded: now_rfc3339(),
        }
    }
}

/// `data._raw` of a payload telemetry document: the raw sentence bytes, base64
/// encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadTelemetryData {
    #[serde(rename = "_raw")]
    pub raw: String,
}

/// A single receiver's sub-record inside a payload telemetry document's
/// `receivers` mapping. `metadata` carries whatever extra fields the caller
/// supplied (e.g. `frequency`); it must not collide with the named fields.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReceiverRecord {
    pub time_created: String,
    pub time_uploaded: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_listener_telemetry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_listener_information: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// The body the uploader POSTs to the `add_listener` update handler: the raw
/// bytes plus exactly one receiver's sub-record. The store merges this onto
/// whatever document already exists at the target id (see
/// [`crate::validators::merge_add_listener`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadTelemetrySubmission {
    pub data: PayloadTelemetryData,
    pub receivers: BTreeMap<String, ReceiverRecord>,
}

/// A payload telemetry document. The document id is always
/// `sha256(raw_bytes)` hex-encoded — see [`crate::uploader::content_address`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadTelemetryDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub data: PayloadTelemetryData,
    pub receivers: BTreeMap<String, ReceiverRecord>,
}

/// One flight document with the payload documents it references, in the order
/// the view returned them.
#[derive(Debug, Clone)]
pub struct FlightWithPayloads {
    pub flight: Value,
    pub payload_docs: Vec<Value>,
}
