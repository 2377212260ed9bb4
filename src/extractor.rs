//! The UKHAS frame extractor (C2): a byte-at-a-time state machine that locates
//! `$$`-delimited text sentences terminated by a newline, tolerating a bounded
//! amount of noise before giving up and waiting for the next line.

use serde_json::{Map, Value};

/// Bag of forward-compatible flags for [`Extractor::push`]. Modeled as a
/// `#[non_exhaustive]` struct rather than a fixed positional signature so that
/// future flags (the spec calls out a hypothetical `baudot_hack`) can be added
/// without breaking callers: an older caller simply never sets the new field,
/// which is exactly "unknown options silently ignored" expressed as Rust
/// struct-update syntax instead of a keyword-args dict.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct PushOptions {
    pub baudot_hack: bool,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The sink an extractor reports events through. The manager (C3) is the only
/// implementor; an extractor never holds one of these beyond the duration of
/// a single `push`/`skipped` call, so there is no persistent back-pointer to
/// dangle if the manager goes away — see the module-level design note on this
/// in `DESIGN.md`.
pub trait ManagerSink {
    fn status(&mut self, msg: &'static str);
    /// `fields` is `Some` when the best-effort UKHAS body parse succeeded.
    fn data(&mut self, sentence: &[u8], fields: Option<Map<String, Value>>);
    fn payload_telemetry(&mut self, raw: &[u8]);
}

/// A registered frame extractor. `UkhasExtractor` is the only implementation
/// this crate ships, but the trait lets a manager host other framing schemes
/// side by side.
pub trait Extractor: Send {
    fn push(&mut self, byte: u8, opts: &PushOptions, sink: &mut dyn ManagerSink);
    fn skipped(&mut self, n: usize, sink: &mut dyn ManagerSink);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SawOneDollar,
    InSentence,
    GivingUp,
}

/// The UKHAS sentence extractor. Bounds default to the reference
/// implementation's values (1024 bytes, 16 garbage bytes, 16 skipped bytes)
/// but are plain fields, not literals, so callers can tune them.
#[derive(Debug, Clone)]
pub struct UkhasExtractor {
    state: State,
    buffer: Vec<u8>,
    garbage: u32,
    skipped_total: u32,
    pub max_length: usize,
    pub max_garbage: u32,
    pub max_skipped: u32,
}

impl Default for UkhasExtractor {
    fn default() -> Self {
        UkhasExtractor {
            state: State::Idle,
            buffer: Vec::new(),
            garbage: 0,
            skipped_total: 0,
            max_length: 1024,
            max_garbage: 16,
            max_skipped: 16,
        }
    }
}

impl UkhasExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset_to_idle(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
        self.garbage = 0;
        self.skipped_total = 0;
    }

    fn start_sentence(&mut self, sink: &mut dyn ManagerSink) {
        self.buffer.clear();
        self.buffer.extend_from_slice(b"$$");
        self.garbage = 0;
        self.skipped_total = 0;
        self.state = State::InSentence;
        sink.status("start delim");
    }

    fn give_up(&mut self, sink: &mut dyn ManagerSink) {
        self.state = State::GivingUp;
        sink.status("giving up");
    }

    /// Appends `byte` to the buffer and checks the length/garbage bounds,
    /// transitioning to `GivingUp` if either is tripped. The length bound is
    /// reached-inclusive (hitting exactly `max_length` bytes gives up, not
    /// only exceeding it) to match the worked example of a `$$` + 1022 filler
    /// bytes (1024 total) sentence; the garbage bound is exceeded-exclusive
    /// (the 17th garbage byte, with a default of 16, trips it).
    fn append_and_check(&mut self, byte: u8, sink: &mut dyn ManagerSink) {
        self.buffer.push(byte);
        if !is_printable(byte) {
            self.garbage += 1;
        }
        if self.buffer.len() >= self.max_length {
            self.give_up(sink);
            return;
        }
        if self.garbage > self.max_garbage {
            self.give_up(sink);
        }
    }

    fn emit_sentence(&mut self, sink: &mut dyn ManagerSink) {
        self.buffer.push(b'\n');
        let sentence = std::mem::take(&mut self.buffer);
        sink.payload_telemetry(&sentence);
        sink.status("extracted");
        match parse_ukhas(&sentence) {
            Some(fields) => sink.data(&sentence, Some(fields)),
            None => {
                sink.status("parse failed");
                sink.data(&sentence, None);
            }
        }
        self.reset_to_idle();
    }
}

impl Extractor for UkhasExtractor {
    fn push(&mut self, byte: u8, _opts: &PushOptions, sink: &mut dyn ManagerSink) {
        match self.state {
            State::Idle => {
                if byte == b'$' {
                    self.state = State::SawOneDollar;
                }
            }
            State::SawOneDollar => {
                if byte == b'$' {
                    self.start_sentence(sink);
                } else {
                    self.state = State::Idle;
                }
            }
            State::InSentence => {
                if byte == b'$' {
                    // Restart eligibility is derived from the buffer itself
                    // (its last byte already being `$`) rather than tracked
                    // in a separate flag, so a restart's freshly-written
                    // "$$" immediately re-arms for a further restart — this
                    // is what makes three or more consecutive `$` bytes
                    // (even split across `push` calls) chain correctly
                    // instead of only restarting once.
                    if self.buffer.last() == Some(&b'$') {
                        self.start_sentence(sink);
                    } else {
                        self.append_and_check(byte, sink);
                    }
                    return;
                }
                if byte == b'\n' {
                    self.emit_sentence(sink);
                    return;
                }
                self.append_and_check(byte, sink);
            }
            State::GivingUp => {
                if byte == b'\n' {
                    self.reset_to_idle();
                }
            }
        }
    }

    fn skipped(&mut self, n: usize, sink: &mut dyn ManagerSink) {
        if self.state != State::InSentence || n == 0 {
            return;
        }
        self.buffer.extend(std::iter::repeat(0u8).take(n));
        self.skipped_total += n as u32;
        if self.buffer.len() >= self.max_length {
            self.give_up(sink);
            return;
        }
        if self.skipped_total > self.max_skipped {
            self.give_up(sink);
        }
    }
}

fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\t' | b'\r' | b'\n')
}

/// Best-effort parse of `$$CALLSIGN,field,field,...*CHECKSUM`. Returns `None`
/// on anything that doesn't look like a UKHAS sentence; the raw bytes are
/// uploaded regardless of whether this succeeds.
fn parse_ukhas(sentence: &[u8]) -> Option<Map<String, Value>> {
    let text = String::from_utf8_lossy(sentence);
    let trimmed = text.trim_end_matches(['\n', '\r']);
    let body = trimmed.strip_prefix("$$")?;
    if body.is_empty() {
        return None;
    }
    let (fields_part, checksum) = match body.rsplit_once('*') {
        Some((f, c)) => (f, Some(c.to_string())),
        None => (body, None),
    };
    let mut parts = fields_part.split(',');
    let callsign = parts.next()?;
    if callsign.is_empty() {
        return None;
    }
    let fields: Vec<Value> = parts.map(|f| Value::from(f.to_string())).collect();

    let mut map = Map::new();
    map.insert("callsign".to_string(), Value::from(callsign));
    map.insert("fields".to_string(), Value::Array(fields));
    if let Some(checksum) = checksum {
        map.insert("checksum".to_string(), Value::from(checksum));
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<&'static str>,
        payloads: Vec<Vec<u8>>,
        data_events: Vec<(Vec<u8>, Option<Map<String, Value>>)>,
    }

    impl ManagerSink for Recorder {
        fn status(&mut self, msg: &'static str) {
            self.statuses.push(msg);
        }
        fn data(&mut self, sentence: &[u8], fields: Option<Map<String, Value>>) {
            self.data_events.push((sentence.to_vec(), fields));
        }
        fn payload_telemetry(&mut self, raw: &[u8]) {
            self.payloads.push(raw.to_vec());
        }
    }

    fn feed(extractor: &mut UkhasExtractor, rec: &mut Recorder, bytes: &[u8]) {
        let opts = PushOptions::new();
        for &b in bytes {
            extractor.push(b, &opts, rec);
        }
    }

    #[test]
    fn simple_sentence_emits_one_upload() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$hello,world*1A\n");
        assert_eq!(rec.payloads, vec![b"$$hello,world*1A\n".to_vec()]);
        assert_eq!(rec.statuses[0], "start delim");
        assert!(rec.statuses.contains(&"extracted"));
    }

    #[test]
    fn no_sentence_emitted_before_first_double_dollar() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"garbage before\n$$ok,1*00\n");
        assert_eq!(rec.payloads.len(), 1);
        assert_eq!(rec.payloads[0], b"$$ok,1*00\n".to_vec());
    }

    #[test]
    fn length_bound_triggers_giving_up_at_exactly_max_length() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        let mut sentence = b"$$".to_vec();
        sentence.extend(std::iter::repeat(b'a').take(1022));
        assert_eq!(sentence.len(), 1024);
        feed(&mut extractor, &mut rec, &sentence);
        assert!(rec.statuses.contains(&"giving up"));
        assert!(rec.payloads.is_empty());

        // A trailing newline after giving up yields no upload.
        feed(&mut extractor, &mut rec, b"\n");
        assert!(rec.payloads.is_empty());

        // The next sentence works normally.
        feed(&mut extractor, &mut rec, b"$$recovered,1*00\n");
        assert_eq!(rec.payloads, vec![b"$$recovered,1*00\n".to_vec()]);
    }

    #[test]
    fn garbage_bound_triggers_giving_up() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        let mut sentence = b"$$".to_vec();
        sentence.extend(std::iter::repeat(0x01u8).take(17));
        feed(&mut extractor, &mut rec, &sentence);
        assert!(rec.statuses.contains(&"giving up"));
        assert!(rec.payloads.is_empty());
    }

    #[test]
    fn skipped_bytes_become_nul_placeholders() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$ab");
        extractor.skipped(3, &mut rec);
        feed(&mut extractor, &mut rec, b"cd*00\n");
        let expected = b"$$ab\x00\x00\x00cd*00\n".to_vec();
        assert_eq!(rec.payloads, vec![expected]);
    }

    #[test]
    fn excess_skipped_bytes_gives_up() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$");
        extractor.skipped(17, &mut rec);
        assert!(rec.statuses.contains(&"giving up"));
    }

    #[test]
    fn mid_sentence_double_dollar_restarts() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$first,field");
        feed(&mut extractor, &mut rec, b"$$second,field*00\n");
        assert_eq!(rec.payloads, vec![b"$$second,field*00\n".to_vec()]);
        assert_eq!(
            rec.statuses.iter().filter(|s| **s == "start delim").count(),
            2
        );
    }

    #[test]
    fn chained_restart_across_three_dollars_spanning_two_pushes() {
        // Mirrors test_can_restart: a sentence already in progress picks up
        // "...it $" (ending on a single stray `$`), then the next push opens
        // with "$$helloworld\n" — three consecutive `$` bytes span the two
        // calls. The second and third `$` each see the buffer already
        // ending in `$` and restart, so exactly two "start delim" events
        // fire during the second push and the earlier buffered garbage
        // (including the stray `$`) never leaks into the final sentence.
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$some extra $s to con$fuse it $");
        rec.statuses.clear();
        rec.payloads.clear();

        feed(&mut extractor, &mut rec, b"$$helloworld\n");

        assert_eq!(rec.payloads, vec![b"$$helloworld\n".to_vec()]);
        assert_eq!(
            rec.statuses.iter().filter(|s| **s == "start delim").count(),
            2
        );
    }

    #[test]
    fn parse_failure_still_uploads_raw_bytes() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$\n");
        assert_eq!(rec.payloads, vec![b"$$\n".to_vec()]);
        assert!(rec.statuses.contains(&"parse failed"));
        let (_, fields) = rec.data_events.last().unwrap();
        assert!(fields.is_none());
    }

    #[test]
    fn parse_success_reports_callsign_and_fields() {
        let mut extractor = UkhasExtractor::new();
        let mut rec = Recorder::default();
        feed(&mut extractor, &mut rec, b"$$CALLSIGN,123,456*AB\n");
        let (_, fields) = rec.data_events.last().unwrap();
        let fields = fields.as_ref().unwrap();
        assert_eq!(fields["callsign"], "CALLSIGN");
        assert_eq!(fields["fields"], serde_json::json!(["123", "456"]));
        assert_eq!(fields["checksum"], "AB");
    }
}
