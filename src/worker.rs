//! The background uploader worker (C5): owns an [`Uploader`] on a dedicated
//! thread and serializes submissions behind a FIFO queue so the real-time
//! receive path never blocks on network I/O.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde_json::{Map, Value};

use crate::document::FlightWithPayloads;
use crate::store::{DocumentStore, StoreError};
use crate::uploader::{UploadError, Uploader, UploaderSettings};

/// Builds the `DocumentStore` a freshly (re)configured `Uploader` should use.
/// Production code points this at [`crate::store::HttpDocumentStore::new`];
/// tests point it at an in-memory [`crate::store::FakeDocumentStore`].
pub type StoreFactory = Box<dyn Fn(&UploaderSettings) -> Result<Arc<dyn DocumentStore>, StoreError> + Send>;

/// Everything that can go wrong inside the worker loop, surfaced to
/// [`WorkerHooks::caught_exception`].
#[derive(Debug)]
pub enum WorkerError {
    /// A call came in before `settings()` was ever sent, or after `reset()`.
    Unconfigured,
    Upload(UploadError),
    Store(StoreError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Unconfigured => write!(f, "Uploader settings were not initialised"),
            WorkerError::Upload(e) => write!(f, "{e}"),
            WorkerError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<UploadError> for WorkerError {
    fn from(err: UploadError) -> Self {
        WorkerError::Upload(err)
    }
}

impl From<StoreError> for WorkerError {
    fn from(err: StoreError) -> Self {
        WorkerError::Store(err)
    }
}

/// User-overridable hooks. All methods have a no-op default except
/// `caught_exception`, which the worker always needs a real sink for.
pub trait WorkerHooks: Send + Sync {
    /// Status strings, e.g. before/after a network call.
    fn log(&self, msg: &str) {
        log::info!("{msg}");
    }

    /// Invoked from within the worker's error handling with the live error
    /// value. The default just logs it.
    fn caught_exception(&self, err: &WorkerError) {
        log::error!("upload failed: {err}");
    }

    fn got_flights(&self, _flights: Vec<FlightWithPayloads>) {}

    fn got_payloads(&self, _payloads: Vec<Value>) {}
}

/// A `WorkerHooks` that does nothing beyond the trait's defaults; useful when
/// a caller doesn't care about any of the callbacks.
#[derive(Default)]
pub struct NullHooks;
impl WorkerHooks for NullHooks {}

enum Command {
    Settings(UploaderSettings),
    Reset,
    PayloadTelemetry {
        raw: Vec<u8>,
        metadata: Map<String, Value>,
        time_created: Option<String>,
    },
    ListenerTelemetry {
        data: Map<String, Value>,
        time_created: Option<String>,
    },
    ListenerInformation {
        data: Map<String, Value>,
        time_created: Option<String>,
    },
    Flights,
    Payloads,
    Shutdown,
}

/// The background worker. Enqueue methods never block on the network; they
/// only block as long as it takes to push an item onto the channel.
pub struct UploaderWorker {
    sender: mpsc::Sender<Command>,
    handle: Option<JoinHandle<Result<(), WorkerError>>>,
}

impl UploaderWorker {
    /// Spawns the worker thread immediately. It sits idle, failing every
    /// request with `Unconfigured`, until the first `settings()` call.
    pub fn spawn(hooks: Arc<dyn WorkerHooks>, store_factory: StoreFactory, allow_exceptions: bool) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || run(receiver, hooks, store_factory, allow_exceptions));
        UploaderWorker {
            sender,
            handle: Some(handle),
        }
    }

    /// Enqueues a reconfiguration: the worker constructs a fresh `Uploader`
    /// with these settings, replacing any previous one.
    pub fn settings(&self, settings: UploaderSettings) {
        self.send(Command::Settings(settings));
    }

    /// Enqueues dropping the current `Uploader`. Subsequent calls fail with
    /// `Unconfigured` until the next `settings()`.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn payload_telemetry(
        &self,
        raw: impl Into<Vec<u8>>,
        metadata: Map<String, Value>,
        time_created: Option<String>,
    ) {
        self.send(Command::PayloadTelemetry {
            raw: raw.into(),
            metadata,
            time_created,
        });
    }

    pub fn listener_telemetry(&self, data: Map<String, Value>, time_created: Option<String>) {
        self.send(Command::ListenerTelemetry { data, time_created });
    }

    pub fn listener_information(&self, data: Map<String, Value>, time_created: Option<String>) {
        self.send(Command::ListenerInformation { data, time_created });
    }

    /// Enqueues a `flights()` query; the result arrives via
    /// `WorkerHooks::got_flights`.
    pub fn flights(&self) {
        self.send(Command::Flights);
    }

    /// Enqueues a `payloads()` query; the result arrives via
    /// `WorkerHooks::got_payloads`.
    pub fn payloads(&self) {
        self.send(Command::Payloads);
    }

    fn send(&self, cmd: Command) {
        // The only way this fails is if the worker thread has already
        // terminated (only possible with `allow_exceptions = true`); there's
        // nothing useful to do with a dropped item in that case.
        let _ = self.sender.send(cmd);
    }

    /// Signals termination and waits for the queue to drain; no enqueued
    /// item is abandoned. The outer `Result` is the thread join outcome
    /// (`Err` only on panic); the inner `Result` carries the error that made
    /// the worker terminate early when `allow_exceptions` is true, and is
    /// always `Ok(())` when the worker ran to a clean `Shutdown`.
    pub fn join(mut self) -> thread::Result<Result<(), WorkerError>> {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(Ok(()))
        }
    }
}

impl Drop for UploaderWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl crate::manager::PayloadSink for UploaderWorker {
    /// Lets an [`crate::manager::ExtractorManager`] enqueue extracted
    /// sentences without knowing it's talking to a worker rather than a bare
    /// `Uploader`.
    fn payload_telemetry(&self, raw: &[u8]) {
        UploaderWorker::payload_telemetry(self, raw.to_vec(), Map::new(), None);
    }
}

fn run(
    receiver: mpsc::Receiver<Command>,
    hooks: Arc<dyn WorkerHooks>,
    store_factory: StoreFactory,
    allow_exceptions: bool,
) -> Result<(), WorkerError> {
    let mut uploader: Option<Uploader> = None;

    for cmd in receiver {
        let result = match cmd {
            Command::Shutdown => break,
            Command::Settings(settings) => {
                hooks.log(&format!("configuring uploader for {}", settings.callsign));
                match store_factory(&settings) {
                    Ok(store) => match Uploader::new(settings, store) {
                        Ok(u) => {
                            uploader = Some(u);
                            Ok(())
                        }
                        Err(e) => Err(WorkerError::from(e)),
                    },
                    Err(e) => Err(WorkerError::from(e)),
                }
            }
            Command::Reset => {
                uploader = None;
                Ok(())
            }
            Command::PayloadTelemetry {
                raw,
                metadata,
                time_created,
            } => with_uploader(&mut uploader, |u| {
                u.payload_telemetry(&raw, metadata, time_created)
                    .map(|_| ())
                    .map_err(WorkerError::from)
            }),
            Command::ListenerTelemetry { data, time_created } => with_uploader(&mut uploader, |u| {
                u.listener_telemetry(data, time_created)
                    .map(|_| ())
                    .map_err(WorkerError::from)
            }),
            Command::ListenerInformation { data, time_created } => with_uploader(&mut uploader, |u| {
                u.listener_information(data, time_created)
                    .map(|_| ())
                    .map_err(WorkerError::from)
            }),
            Command::Flights => with_uploader(&mut uploader, |u| {
                let flights = u.flights().map_err(WorkerError::from)?;
                hooks.got_flights(flights);
                Ok(())
            }),
            Command::Payloads => with_uploader(&mut uploader, |u| {
                let payloads = u.payloads().map_err(WorkerError::from)?;
                hooks.got_payloads(payloads);
                Ok(())
            }),
        };

        if let Err(err) = result {
            hooks.caught_exception(&err);
            if allow_exceptions {
                return Err(err);
            }
        }
    }

    Ok(())
}

fn with_uploader(
    uploader: &mut Option<Uploader>,
    f: impl FnOnce(&mut Uploader) -> Result<(), WorkerError>,
) -> Result<(), WorkerError> {
    match uploader {
        Some(u) => f(u),
        None => Err(WorkerError::Unconfigured),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeDocumentStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        exceptions: Mutex<Vec<String>>,
    }

    impl WorkerHooks for RecordingHooks {
        fn caught_exception(&self, err: &WorkerError) {
            self.exceptions.lock().unwrap().push(err.to_string());
        }
    }

    fn fake_factory() -> StoreFactory {
        Box::new(|_settings: &UploaderSettings| {
            Ok(Arc::new(FakeDocumentStore::new()) as Arc<dyn DocumentStore>)
        })
    }

    #[test]
    fn fails_with_unconfigured_before_settings() {
        let hooks = Arc::new(RecordingHooks::default());
        let worker = UploaderWorker::spawn(hooks.clone(), fake_factory(), false);
        worker.payload_telemetry(b"x".to_vec(), Map::new(), None);
        assert!(worker.join().unwrap().is_ok());
        let exceptions = hooks.exceptions.lock().unwrap();
        assert_eq!(exceptions.len(), 1);
        assert!(exceptions[0].contains("not initialised"));
    }

    #[test]
    fn settings_then_payload_then_reconfigure_executes_in_order() {
        let hooks = Arc::new(RecordingHooks::default());
        let worker = UploaderWorker::spawn(hooks.clone(), fake_factory(), false);
        worker.settings(UploaderSettings::new("CALL1"));
        worker.payload_telemetry(b"x".to_vec(), Map::new(), None);
        worker.settings(UploaderSettings::new("CALL2"));
        worker.payload_telemetry(b"y".to_vec(), Map::new(), None);
        assert!(worker.join().unwrap().is_ok());
        assert!(hooks.exceptions.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_requires_settings_again() {
        let hooks = Arc::new(RecordingHooks::default());
        let worker = UploaderWorker::spawn(hooks.clone(), fake_factory(), false);
        worker.settings(UploaderSettings::new("CALL1"));
        worker.reset();
        worker.payload_telemetry(b"x".to_vec(), Map::new(), None);
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(hooks.exceptions.lock().unwrap().len(), 1);
    }

    #[test]
    fn allow_exceptions_terminates_thread_and_join_carries_the_error() {
        let hooks = Arc::new(RecordingHooks::default());
        let worker = UploaderWorker::spawn(hooks.clone(), fake_factory(), true);
        worker.payload_telemetry(b"x".to_vec(), Map::new(), None);
        match worker.join().unwrap() {
            Err(WorkerError::Unconfigured) => {}
            other => panic!("expected Err(Unconfigured), got {other:?}"),
        }
        assert_eq!(hooks.exceptions.lock().unwrap().len(), 1);
    }
}
