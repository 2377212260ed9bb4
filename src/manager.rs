//! The extractor manager (C3): multiplexes incoming bytes to every registered
//! extractor and forwards the events they raise to the uploader and to an
//! observer the embedding application supplies.
//!
//! The reference design gives each extractor a persistent back-pointer to its
//! manager. Rust makes that awkward without `Rc<RefCell<_>>` or unsafe code,
//! and a persistent handle would let an extractor re-enter the manager while
//! the manager is already mid-call (the manager owns the extractor list, so
//! iterating it requires a mutable borrow of `self`, and a stored back-pointer
//! would need that same borrow again from inside the callback). Instead the
//! manager builds a short-lived [`ManagerSink`] for each byte it feeds an
//! extractor and passes it in as a plain argument. The extractor never stores
//! it, so there is nothing left to dangle if the manager is later dropped, and
//! "no back-pointer to reassign" is exactly how this crate satisfies "disallow
//! extractor re-registration": an extractor is moved into the manager's `Vec`
//! at registration, so ownership makes re-registering it elsewhere impossible.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::extractor::{Extractor, ManagerSink, PushOptions};

/// Where extracted payload telemetry bytes go. Implemented by
/// [`crate::worker::UploaderWorker`] so the manager never talks to the
/// network directly; implemented by hand in tests.
pub trait PayloadSink: Send + Sync {
    fn payload_telemetry(&self, raw: &[u8]);
}

/// Status and parsed-sentence notifications for whatever owns the manager
/// (typically a UI or a logger). Both methods have no-op defaults so a caller
/// that only cares about one can ignore the other.
pub trait ExtractorObserver: Send + Sync {
    fn status(&self, _msg: &'static str) {}
    /// `event` always contains `_sentence`; a successful UKHAS parse adds
    /// `callsign`, `fields`, and (if present) `checksum`.
    fn data(&self, _event: Map<String, Value>) {}
}

/// An `ExtractorObserver` that discards everything.
#[derive(Default)]
pub struct NullObserver;
impl ExtractorObserver for NullObserver {}

struct ForwardingSink<'a> {
    uploader: &'a dyn PayloadSink,
    observer: &'a dyn ExtractorObserver,
}

impl<'a> ManagerSink for ForwardingSink<'a> {
    fn status(&mut self, msg: &'static str) {
        self.observer.status(msg);
    }

    fn data(&mut self, sentence: &[u8], fields: Option<Map<String, Value>>) {
        let mut event = fields.unwrap_or_default();
        event.insert(
            "_sentence".to_string(),
            Value::from(String::from_utf8_lossy(sentence).to_string()),
        );
        self.observer.data(event);
    }

    fn payload_telemetry(&mut self, raw: &[u8]) {
        self.uploader.payload_telemetry(raw);
    }
}

/// Owns the registered extractors and the two downstream sinks they report
/// to. Not `Clone`: a manager's identity is its extractor list.
pub struct ExtractorManager {
    extractors: Vec<Box<dyn Extractor>>,
    uploader: Arc<dyn PayloadSink>,
    observer: Arc<dyn ExtractorObserver>,
}

impl ExtractorManager {
    pub fn new(uploader: Arc<dyn PayloadSink>, observer: Arc<dyn ExtractorObserver>) -> Self {
        ExtractorManager {
            extractors: Vec::new(),
            uploader,
            observer,
        }
    }

    /// Registers an extractor. Takes ownership, which is what makes
    /// re-registering the same extractor with a second manager a compile
    /// error rather than a runtime hazard.
    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn extractor_count(&self) -> usize {
        self.extractors.len()
    }

    /// Feeds one byte to every registered extractor, in registration order.
    pub fn push(&mut self, byte: u8, opts: &PushOptions) {
        let mut sink = ForwardingSink {
            uploader: self.uploader.as_ref(),
            observer: self.observer.as_ref(),
        };
        for extractor in self.extractors.iter_mut() {
            extractor.push(byte, opts, &mut sink);
        }
    }

    /// Reports `n` bytes the demodulator could not decode to every extractor.
    pub fn skipped(&mut self, n: usize) {
        let mut sink = ForwardingSink {
            uploader: self.uploader.as_ref(),
            observer: self.observer.as_ref(),
        };
        for extractor in self.extractors.iter_mut() {
            extractor.skipped(n, &mut sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::UkhasExtractor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        uploads: Mutex<Vec<Vec<u8>>>,
    }
    impl PayloadSink for RecordingUploader {
        fn payload_telemetry(&self, raw: &[u8]) {
            self.uploads.lock().unwrap().push(raw.to_vec());
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        statuses: Mutex<Vec<&'static str>>,
        events: Mutex<Vec<Map<String, Value>>>,
    }
    impl ExtractorObserver for RecordingObserver {
        fn status(&self, msg: &'static str) {
            self.statuses.lock().unwrap().push(msg);
        }
        fn data(&self, event: Map<String, Value>) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn feed(manager: &mut ExtractorManager, bytes: &[u8]) {
        let opts = PushOptions::new();
        for &b in bytes {
            manager.push(b, &opts);
        }
    }

    #[test]
    fn forwards_extracted_sentence_to_uploader() {
        let uploader = Arc::new(RecordingUploader::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut manager = ExtractorManager::new(uploader.clone(), observer.clone());
        manager.register(Box::new(UkhasExtractor::new()));

        feed(&mut manager, b"$$TESTCALL,1,2*00\n");

        let uploads = uploader.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0], b"$$TESTCALL,1,2*00\n".to_vec());

        let events = observer.events.lock().unwrap();
        let event = events.last().unwrap();
        assert_eq!(event["callsign"], "TESTCALL");
        assert!(event.contains_key("_sentence"));
    }

    #[test]
    fn multiple_extractors_each_see_every_byte() {
        let uploader = Arc::new(RecordingUploader::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut manager = ExtractorManager::new(uploader.clone(), observer.clone());
        manager.register(Box::new(UkhasExtractor::new()));
        manager.register(Box::new(UkhasExtractor::new()));
        assert_eq!(manager.extractor_count(), 2);

        feed(&mut manager, b"$$A,1*00\n");

        assert_eq!(uploader.uploads.lock().unwrap().len(), 2);
    }

    #[test]
    fn skipped_bytes_reach_every_extractor() {
        let uploader = Arc::new(RecordingUploader::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut manager = ExtractorManager::new(uploader.clone(), observer.clone());
        manager.register(Box::new(UkhasExtractor::new()));

        feed(&mut manager, b"$$ab");
        manager.skipped(2);
        feed(&mut manager, b"cd*00\n");

        let uploads = uploader.uploads.lock().unwrap();
        assert_eq!(uploads[0], b"$$ab\x00\x00cd*00\n".to_vec());
    }
}
