//! The synchronous uploader client (C4): produces the three document shapes,
//! computes the payload telemetry content address, drives the conflict-merge
//! retry loop, and answers the two read-only aggregate queries.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::document::{
    now_rfc3339, FlightWithPayloads, ListenerDoc, PayloadTelemetryData, PayloadTelemetrySubmission,
    ReceiverRecord, TYPE_LISTENER_INFORMATION, TYPE_LISTENER_TELEMETRY,
};
use crate::store::{DocumentStore, StoreError, ViewQuery};

pub const DEFAULT_COUCH_URI: &str = "http://habitat.habhub.org/";
pub const DEFAULT_COUCH_DB: &str = "habitat";
/// One initial attempt plus this many retries before giving up on a conflict.
pub const DEFAULT_RETRY_BUDGET: u32 = 15;

/// Computes the content address (lowercase hex SHA-256) of raw sentence bytes.
/// This is always the payload telemetry document id.
pub fn content_address(raw: &[u8]) -> String {
    let digest = Sha256::digest(raw);
    hex::encode(digest)
}

#[derive(Debug)]
pub enum UploadError {
    /// The conflict-merge loop exhausted its retry budget.
    Unmergeable { attempts: u32, cause: Box<StoreError> },
    /// A non-conflict store error occurred while writing a listener document.
    Store(StoreError),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Unmergeable { attempts, cause } => {
                write!(f, "unmergeable after {attempts} attempts: {cause}")
            }
            UploadError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        UploadError::Store(err)
    }
}

/// Construction parameters for [`Uploader`]. `couch_uri`/`couch_db` default to
/// the public habitat instance, matching the reference implementation.
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub callsign: String,
    pub couch_uri: String,
    pub couch_db: String,
    /// One initial attempt plus this many retries on conflict before failing
    /// with [`UploadError::Unmergeable`]. Configurable per the Open Question
    /// in the spec; defaults to [`DEFAULT_RETRY_BUDGET`].
    pub retry_budget: u32,
}

impl UploaderSettings {
    pub fn new(callsign: impl Into<String>) -> Self {
        UploaderSettings {
            callsign: callsign.into(),
            couch_uri: DEFAULT_COUCH_URI.to_string(),
            couch_db: DEFAULT_COUCH_DB.to_string(),
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

/// The uploader client. Not thread-safe by itself — callers that need
/// concurrent access should go through [`crate::worker::UploaderWorker`],
/// which serializes access from a single dedicated thread.
pub struct Uploader {
    callsign: String,
    retry_budget: u32,
    store: Arc<dyn DocumentStore>,
    latest_listener_telemetry: Option<String>,
    latest_listener_information: Option<String>,
}

impl Uploader {
    /// Opens a handle to `settings.couch_db` through `store`. A failed handle
    /// is a fatal startup error, matching the reference implementation's
    /// behavior of failing immediately if the named database can't be
    /// reached.
    pub fn new(settings: UploaderSettings, store: Arc<dyn DocumentStore>) -> Result<Self, StoreError> {
        store.open(&settings.couch_db)?;
        Ok(Uploader {
            callsign: settings.callsign,
            retry_budget: settings.retry_budget.max(1),
            store,
            latest_listener_telemetry: None,
            latest_listener_information: None,
        })
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// Submits a listener telemetry fix. `data` must not already contain a
    /// `callsign` key — the uploader stamps its own.
    pub fn listener_telemetry(
        &mut self,
        mut data: Map<String, Value>,
        time_created: Option<String>,
    ) -> Result<String, UploadError> {
        data.insert("callsign".to_string(), Value::from(self.callsign.clone()));
        let doc = ListenerDoc::new(
            TYPE_LISTENER_TELEMETRY,
            data,
            time_created.unwrap_or_else(now_rfc3339),
        );
        let id = self.store.save(&serde_json::to_value(&doc).unwrap())?;
        self.latest_listener_telemetry = Some(id.clone());
        Ok(id)
    }

    /// Submits free-form listener information (radio, vehicle, ...).
    pub fn listener_information(
        &mut self,
        mut data: Map<String, Value>,
        time_created: Option<String>,
    ) -> Result<String, UploadError> {
        data.insert("callsign".to_string(), Value::from(self.callsign.clone()));
        let doc = ListenerDoc::new(
            TYPE_LISTENER_INFORMATION,
            data,
            time_created.unwrap_or_else(now_rfc3339),
        );
        let id = self.store.save(&serde_json::to_value(&doc).unwrap())?;
        self.latest_listener_information = Some(id.clone());
        Ok(id)
    }

    /// Submits a received sentence's raw bytes plus this receiver's metadata,
    /// retrying through the conflict-merge loop on a document conflict and
    /// failing with [`UploadError::Unmergeable`] after the retry budget (or
    /// immediately on any non-conflict error).
    pub fn payload_telemetry(
        &mut self,
        raw: &[u8],
        metadata: Map<String, Value>,
        time_created: Option<String>,
    ) -> Result<String, UploadError> {
        let id = content_address(raw);
        let raw_base64 = BASE64.encode(raw);
        let time_created = time_created.unwrap_or_else(now_rfc3339);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let record = ReceiverRecord {
                time_created: time_created.clone(),
                time_uploaded: now_rfc3339(),
                latest_listener_telemetry: self.latest_listener_telemetry.clone(),
                latest_listener_information: self.latest_listener_information.clone(),
                metadata: metadata.clone(),
            };
            let mut receivers = std::collections::BTreeMap::new();
            receivers.insert(self.callsign.clone(), record);
            let submission = PayloadTelemetrySubmission {
                data: PayloadTelemetryData {
                    raw: raw_base64.clone(),
                },
                receivers,
            };
            let body = serde_json::to_value(&submission).unwrap();

            match self.store.add_listener(&id, &body) {
                Ok(()) => return Ok(id),
                Err(StoreError::Conflict) if attempts < self.retry_budget => continue,
                Err(cause) => {
                    return Err(UploadError::Unmergeable {
                        attempts,
                        cause: Box::new(cause),
                    })
                }
            }
        }
    }

    /// Queries `flight/end_start_including_payloads` and assembles each
    /// flight with the payload documents it references, in row order,
    /// skipping rows whose `doc` is null (deleted or unreadable payloads).
    pub fn flights(&self) -> Result<Vec<FlightWithPayloads>, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let query = ViewQuery {
            startkey: Some(Value::Array(vec![Value::from(now)])),
            include_docs: true,
        };
        let rows = self
            .store
            .view("flight", "end_start_including_payloads", &query)?;

        let mut flights = Vec::new();
        let mut current: Option<FlightWithPayloads> = None;
        for row in rows {
            let ends_in_zero = row
                .key
                .as_array()
                .and_then(|k| k.last())
                .and_then(Value::as_i64)
                == Some(0);
            if ends_in_zero {
                if let Some(flight) = current.take() {
                    flights.push(flight);
                }
                if let Some(doc) = row.doc {
                    current = Some(FlightWithPayloads {
                        flight: doc,
                        payload_docs: Vec::new(),
                    });
                }
            } else if let Some(flight) = current.as_mut() {
                if let Some(doc) = row.doc {
                    flight.payload_docs.push(doc);
                }
            }
        }
        if let Some(flight) = current.take() {
            flights.push(flight);
        }
        Ok(flights)
    }

    /// Queries `payload_configuration/name_time_created` and returns the docs
    /// in row order.
    pub fn payloads(&self) -> Result<Vec<Value>, StoreError> {
        let query = ViewQuery {
            startkey: None,
            include_docs: true,
        };
        let rows = self
            .store
            .view("payload_configuration", "name_time_created", &query)?;
        Ok(rows.into_iter().filter_map(|row| row.doc).collect())
    }
}
