// crates/mediaout-core/src/signal.rs
//
// The observer-bus event set (spec §4.1). Styled after the teacher's
// `EditorCommand` (`velocut-core/src/commands.rs`) — one flat, exhaustively
// documented enum rather than a trait per event — but made an injected
// collaborator (`SignalSink`) per spec §9's design note, instead of a
// process-wide singleton: production wires a real bus, tests wire
// `RecordingSignalSink`.

use crate::stopcode::StopCode;

#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    /// About to call the sink's `start` (or enter delayed-start).
    Starting,
    /// Sink `start` succeeded; output is now active.
    Start,
    /// About to call the sink's `stop`.
    Stopping,
    /// Sink has fully stopped. `last_error` mirrors `Output::last_error` at
    /// the moment of the signal (spec §7).
    Stop {
        code: StopCode,
        last_error: Option<String>,
    },
    /// `active` just became `true` (spec §5: "signals observe happens-before
    /// w.r.t. the state flag they report").
    Activate,
    Deactivate,
    /// A reconnect attempt has been scheduled `timeout_sec` from now.
    Reconnect { timeout_sec: u32 },
    ReconnectSuccess,
    Pause,
    Unpause,
    /// Per-packet/frame bookkeeping signals — high frequency, emit at debug
    /// log level if at all; most sinks don't need them.
    Writing,
    Wrote,
    WritingError { msg: String },
}

/// Injected collaborator for signal emission (spec §9's design note). A
/// production build wires this to whatever UI/process-wide bus exists;
/// tests wire `RecordingSignalSink`.
pub trait SignalSink: Send + Sync {
    fn emit(&self, output_id: &str, signal: Signal);
}

/// A `SignalSink` that records every emission, in order, for assertions in
/// tests. Not behind `#[cfg(test)]` — downstream crates building their own
/// integration tests need it from outside this crate's test binary.
#[derive(Default)]
pub struct RecordingSignalSink {
    events: std::sync::Mutex<Vec<(String, Signal)>>,
}

impl RecordingSignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Signal)> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl SignalSink for RecordingSignalSink {
    fn emit(&self, output_id: &str, signal: Signal) {
        self.events.lock().unwrap().push((output_id.to_string(), signal));
    }
}

/// A `SignalSink` that discards everything — useful as a default when a
/// caller genuinely doesn't care about signals (spec never requires one).
pub struct NullSignalSink;

impl SignalSink for NullSignalSink {
    fn emit(&self, _output_id: &str, _signal: Signal) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSignalSink::new();
        sink.emit("a", Signal::Starting);
        sink.emit("a", Signal::Start);
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, Signal::Starting);
        assert_eq!(events[1].1, Signal::Start);
    }
}
