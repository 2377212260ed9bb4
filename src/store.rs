//! The `DocumentStore` trait boundary standing in for the document database,
//! plus a blocking HTTP-backed implementation and an in-memory fake used by
//! this crate's own tests and available to embedders for integration tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use crate::document::{PayloadTelemetryDoc, PayloadTelemetrySubmission};
use crate::validators::{self, ValidationError};

#[derive(Debug)]
pub enum StoreError {
    /// The store reported a document conflict (HTTP 409); the caller may retry.
    Conflict,
    /// The store doesn't have a document at the given id.
    NotFound,
    /// A validation rule in [`crate::validators`] rejected the document.
    Validation(ValidationError),
    /// The HTTP transport itself failed (DNS, TCP, TLS, timeout, ...).
    Http(reqwest::Error),
    /// The store responded, but not with success and not with a conflict.
    Status { code: u16, body: String },
    /// The store's response body didn't parse the way this client expects.
    Malformed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict => write!(f, "document conflict"),
            StoreError::NotFound => write!(f, "document not found"),
            StoreError::Validation(e) => write!(f, "validation failed: {e}"),
            StoreError::Http(e) => write!(f, "http error: {e}"),
            StoreError::Status { code, body } => write!(f, "store returned {code}: {body}"),
            StoreError::Malformed(msg) => write!(f, "malformed store response: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err)
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::Validation(err)
    }
}

/// Parameters for a view query against `ddoc/_view/view`.
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub startkey: Option<Value>,
    pub include_docs: bool,
}

/// One row of a view result.
#[derive(Debug, Clone)]
pub struct ViewRow {
    pub key: Value,
    pub doc: Option<Value>,
}

/// The document store boundary. Implemented by [`HttpDocumentStore`] for
/// production use and [`FakeDocumentStore`] for tests.
pub trait DocumentStore: Send + Sync {
    /// Opens (or probes the existence of) the named database. A failure here
    /// is meant to be fatal at `Uploader` construction time.
    fn open(&self, db: &str) -> Result<(), StoreError>;

    /// Saves an arbitrary document, returning the store-assigned id.
    fn save(&self, doc: &Value) -> Result<String, StoreError>;

    /// Invokes the `add_listener` update handler for the payload telemetry
    /// document at `id`, merging `record` under `receivers.<callsign>`.
    fn add_listener(&self, id: &str, body: &Value) -> Result<(), StoreError>;

    /// Queries a view, returning its rows in order.
    fn view(&self, design_doc: &str, view: &str, query: &ViewQuery) -> Result<Vec<ViewRow>, StoreError>;
}

/// A blocking HTTP client speaking the document store's thin REST contract.
pub struct HttpDocumentStore {
    base_url: String,
    db: String,
    client: reqwest::blocking::Client,
}

impl HttpDocumentStore {
    pub fn new(couch_uri: &str, couch_db: &str) -> Result<Self, StoreError> {
        let store = HttpDocumentStore {
            base_url: couch_uri.trim_end_matches('/').to_string(),
            db: couch_db.to_string(),
            client: reqwest::blocking::Client::new(),
        };
        store.open(couch_db)?;
        Ok(store)
    }

    fn db_url(&self) -> String {
        format!("{}/{}", self.base_url, self.db)
    }
}

impl DocumentStore for HttpDocumentStore {
    fn open(&self, db: &str) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.base_url, db);
        let resp = self.client.get(&url).send()?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Status {
                code: resp.status().as_u16(),
                body: resp.text().unwrap_or_default(),
            })
        }
    }

    fn save(&self, doc: &Value) -> Result<String, StoreError> {
        let resp = self.client.post(self.db_url()).json(doc).send()?;
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                code: resp.status().as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        let body: Value = resp.json()?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Malformed("response missing \"id\"".to_string()))
    }

    fn add_listener(&self, id: &str, body: &Value) -> Result<(), StoreError> {
        let url = format!(
            "{}/_design/payload_telemetry/_update/add_listener/{}",
            self.db_url(),
            id
        );
        let resp = self.client.put(&url).json(body).send()?;
        match resp.status().as_u16() {
            200..=299 => Ok(()),
            409 => Err(StoreError::Conflict),
            code => Err(StoreError::Status {
                code,
                body: resp.text().unwrap_or_default(),
            }),
        }
    }

    fn view(&self, design_doc: &str, view: &str, query: &ViewQuery) -> Result<Vec<ViewRow>, StoreError> {
        let mut url = format!(
            "{}/_design/{}/_view/{}?include_docs={}",
            self.db_url(),
            design_doc,
            view,
            query.include_docs
        );
        if let Some(startkey) = &query.startkey {
            let encoded = serde_json::to_string(startkey)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            url.push_str(&format!("&startkey={}", urlencode(&encoded)));
        }
        let resp = self.client.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                code: resp.status().as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        let body: Value = resp.json()?;
        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Malformed("response missing \"rows\"".to_string()))?;
        rows.iter()
            .map(|row| {
                let key = row.get("key").cloned().unwrap_or(Value::Null);
                let doc = row.get("doc").cloned().filter(|d| !d.is_null());
                Ok(ViewRow { key, doc })
            })
            .collect()
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// An in-memory store implementing the identical validate/merge contract as
/// the real server, so tests exercise the real semantics rather than a stub.
/// Useful both for this crate's own test suite and for embedders' integration
/// tests.
pub struct FakeDocumentStore {
    docs: Mutex<HashMap<String, Value>>,
    next_id: AtomicU64,
    /// Number of upcoming `add_listener` calls that should fail with
    /// `StoreError::Conflict` regardless of the merge outcome, simulating a
    /// concurrent writer racing on the same document.
    force_conflicts: AtomicU64,
    is_admin: bool,
}

impl Default for FakeDocumentStore {
    fn default() -> Self {
        FakeDocumentStore {
            docs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            force_conflicts: AtomicU64::new(0),
            is_admin: false,
        }
    }
}

impl FakeDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arranges for the next `n` `add_listener` calls to fail with a
    /// conflict, exercising the uploader's retry loop.
    pub fn force_conflicts(&self, n: u64) {
        self.force_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    fn fresh_id(&self) -> String {
        format!("fake-{:016x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn take_forced_conflict(&self) -> bool {
        let mut remaining = self.force_conflicts.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.force_conflicts.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => remaining = actual,
            }
        }
        false
    }
}

impl DocumentStore for FakeDocumentStore {
    fn open(&self, _db: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn save(&self, doc: &Value) -> Result<String, StoreError> {
        let doc_type = doc.get("type").and_then(Value::as_str).unwrap_or("");
        match doc_type {
            "flight" | "payload_configuration" | "habitat" => {
                validators::validate_admin_only(
                    match doc_type {
                        "flight" => "flight",
                        "payload_configuration" => "payload_configuration",
                        _ => "habitat",
                    },
                    self.is_admin,
                )?;
            }
            "listener_telemetry" => {
                let listener_doc: crate::document::ListenerDoc =
                    serde_json::from_value(doc.clone())
                        .map_err(|e| StoreError::Malformed(e.to_string()))?;
                validators::validate_listener_telemetry(&listener_doc)?;
            }
            "listener_information" => {
                let listener_doc: crate::document::ListenerDoc =
                    serde_json::from_value(doc.clone())
                        .map_err(|e| StoreError::Malformed(e.to_string()))?;
                validators::validate_listener_information(&listener_doc)?;
            }
            _ => {}
        }

        let id = self.fresh_id();
        let mut stored = doc.clone();
        if let Value::Object(ref mut map) = stored {
            map.insert("_id".to_string(), Value::from(id.clone()));
        }
        self.docs.lock().unwrap().insert(id.clone(), stored);
        Ok(id)
    }

    fn add_listener(&self, id: &str, body: &Value) -> Result<(), StoreError> {
        if self.take_forced_conflict() {
            return Err(StoreError::Conflict);
        }

        let incoming: PayloadTelemetrySubmission =
            serde_json::from_value(body.clone()).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let (callsign, record) = incoming
            .receivers
            .into_iter()
            .next()
            .ok_or(StoreError::Malformed("add_listener body has no receiver".to_string()))?;

        let mut docs = self.docs.lock().unwrap();
        let existing: Option<PayloadTelemetryDoc> = docs
            .get(id)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e: serde_json::Error| StoreError::Malformed(e.to_string()))?;

        let merged = validators::merge_add_listener(existing, id, &incoming.data.raw, &callsign, record);
        validators::validate_payload_telemetry(&merged)?;
        docs.insert(id.to_string(), serde_json::to_value(merged).unwrap());
        Ok(())
    }

    fn view(&self, _design_doc: &str, _view: &str, _query: &ViewQuery) -> Result<Vec<ViewRow>, StoreError> {
        // The fake store has no flight/payload_configuration fixtures of its
        // own; embedders seed them directly via `get`/internal state in their
        // own test doubles. Returning an empty result is the correct
        // behavior for a store with no matching documents.
        Ok(Vec::new())
    }
}
