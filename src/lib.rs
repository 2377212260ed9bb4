//! `habitat` turns a raw byte stream from a radio receiver into validated,
//! deduplicated, conflict-merged documents in a shared store.
//!
//! A typical wiring: bytes from a demodulator are fed one at a time into an
//! [`manager::ExtractorManager`], which multiplexes them to one or more
//! registered [`extractor::Extractor`]s (currently just
//! [`extractor::UkhasExtractor`]). When an extractor completes a sentence, the
//! manager hands the raw bytes to a [`worker::UploaderWorker`], which owns an
//! [`uploader::Uploader`] on a dedicated thread so the real-time receive path
//! never blocks on network I/O. The uploader computes the payload's content
//! address, retries through a conflict-merge loop against a
//! [`store::DocumentStore`], and exposes the two read-only aggregate queries
//! (`flights`, `payloads`) the rest of the system needs.
//!
//! ```text
//! radio bytes -> ExtractorManager -> UkhasExtractor -> (sentence) -> UploaderWorker -> Uploader -> DocumentStore
//! ```
//!
//! Module map:
//!
//! - [`sensors`]: typed parsers for individual UKHAS field values (C1).
//! - [`extractor`]: the byte-driven sentence framing state machine (C2).
//! - [`manager`]: multiplexes bytes to registered extractors (C3).
//! - [`document`]: the persisted document shapes.
//! - [`validators`]: document validation and the conflict-merge rule.
//! - [`store`]: the `DocumentStore` trait plus HTTP and in-memory implementations.
//! - [`uploader`]: the synchronous uploader client (C4).
//! - [`worker`]: the background uploader thread (C5).
//!
//! # Logging
//!
//! This crate only emits log records through the [`log`] facade; it never
//! installs a logger itself. Binaries embedding it should initialize one
//! (e.g. `env_logger::init()`) if they want to see them.
//!
//! # Error handling
//!
//! Every fallible operation returns a `Result` with a crate-defined error
//! enum ([`sensors::SensorError`], [`validators::ValidationError`],
//! [`store::StoreError`], [`uploader::UploadError`], [`worker::WorkerError`]).
//! None of them panic on bad input; `unwrap`/`expect` are confined to tests.

pub mod document;
pub mod extractor;
pub mod manager;
pub mod sensors;
pub mod store;
pub mod uploader;
pub mod validators;
pub mod worker;
