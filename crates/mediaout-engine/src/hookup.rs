// crates/mediaout-engine/src/hookup.rs
//
// Data-capture connect/disconnect (spec §4.7). Grounded on `worker.rs`'s
// `start_encode`/`cancel_encode` register-before-spawn discipline: the
// cancel flag (here, the encoder binding) is installed before anything is
// started, so a concurrent stop can never race a not-yet-registered
// encoder.

use mediaout_core::packet::MAX_MIXES;
use mediaout_core::OutputCaps;

use crate::sink::{Encoder, PairError};

/// Which callback an activated output's encoders/raw sources feed (spec
/// §4.7): the packet interleaver when a single muxed stream is wanted, or
/// the sink's per-type callback otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalCallback {
    Interleaver,
    PerTypeDefault,
}

pub fn terminal_callback(caps: OutputCaps) -> TerminalCallback {
    if caps.wants_interleaver() {
        TerminalCallback::Interleaver
    } else {
        TerminalCallback::PerTypeDefault
    }
}

/// Owns the encoder bindings for one `Output`. Binding is a set-one
/// operation guarded by the caller's init mutex (spec §9's "set-one-unset-
/// other" note) — `Hookup` itself holds no lock; `Output` serializes calls
/// into it.
#[derive(Default)]
pub struct Hookup {
    video_encoder: Option<Box<dyn Encoder>>,
    audio_encoders: Vec<Box<dyn Encoder>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HookupError {
    TooManyAudioTracks,
    Pair(PairError),
}

impl Hookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_video(&mut self, encoder: Box<dyn Encoder>) {
        self.video_encoder = Some(encoder);
    }

    pub fn bind_audio(&mut self, encoder: Box<dyn Encoder>) -> Result<usize, HookupError> {
        if self.audio_encoders.len() >= MAX_MIXES {
            return Err(HookupError::TooManyAudioTracks);
        }
        self.audio_encoders.push(encoder);
        Ok(self.audio_encoders.len() - 1)
    }

    pub fn has_video(&self) -> bool {
        self.video_encoder.is_some()
    }

    pub fn audio_track_count(&self) -> usize {
        self.audio_encoders.len()
    }

    /// Pair exactly one inactive unpaired audio encoder with the video
    /// encoder before start (spec §4.7). Resolved per SPEC_FULL.md's Open
    /// Question (c): fails loudly (`Err`) rather than silently proceeding
    /// unpaired when either side is already paired.
    pub fn pair(&self) -> Result<(), HookupError> {
        let Some(video) = self.video_encoder.as_ref() else {
            return Ok(()); // raw or audio-only output — nothing to pair
        };
        let Some(audio) = self.audio_encoders.first() else {
            return Ok(());
        };
        if video.is_paired() || audio.is_paired() {
            return Err(HookupError::Pair(PairError));
        }
        // Lock order per spec §5: audio before video inside pairing.
        audio.pair_with("video").map_err(HookupError::Pair)?;
        video.pair_with("audio").map_err(HookupError::Pair)?;
        Ok(())
    }

    /// Start encoders in pairing order: video first (the paired audio
    /// encoder buffers internally until the video encoder's first frame,
    /// per spec §4.7), then every bound audio encoder.
    pub fn start_encoders(&self) -> Result<(), mediaout_core::StopCode> {
        if let Some(video) = &self.video_encoder {
            video.start()?;
        }
        for audio in &self.audio_encoders {
            audio.start()?;
        }
        Ok(())
    }

    pub fn stop_encoders(&self) {
        if let Some(video) = &self.video_encoder {
            video.stop();
        }
        for audio in &self.audio_encoders {
            audio.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeEncoder {
        paired: AtomicBool,
        started: Arc<AtomicBool>,
    }

    impl Encoder for FakeEncoder {
        fn start(&self) -> Result<(), mediaout_core::StopCode> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&self) {
            self.started.store(false, Ordering::SeqCst);
        }
        fn is_paired(&self) -> bool {
            self.paired.load(Ordering::SeqCst)
        }
        fn pair_with(&self, _other_id: &str) -> Result<(), PairError> {
            self.paired.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn terminal_callback_selects_interleaver_for_encoded_video_audio() {
        let caps = OutputCaps::ENCODED | OutputCaps::VIDEO | OutputCaps::AUDIO;
        assert_eq!(terminal_callback(caps), TerminalCallback::Interleaver);
        assert_eq!(terminal_callback(OutputCaps::VIDEO), TerminalCallback::PerTypeDefault);
    }

    #[test]
    fn bind_audio_rejects_past_max_mixes() {
        let mut h = Hookup::new();
        for _ in 0..MAX_MIXES {
            h.bind_audio(Box::new(FakeEncoder {
                paired: AtomicBool::new(false),
                started: Arc::new(AtomicBool::new(false)),
            }))
            .unwrap();
        }
        let err = h.bind_audio(Box::new(FakeEncoder {
            paired: AtomicBool::new(false),
            started: Arc::new(AtomicBool::new(false)),
        }));
        assert_eq!(err, Err(HookupError::TooManyAudioTracks));
    }

    #[test]
    fn pairing_fails_loudly_when_already_paired() {
        let mut h = Hookup::new();
        h.bind_video(Box::new(FakeEncoder {
            paired: AtomicBool::new(true),
            started: Arc::new(AtomicBool::new(false)),
        }));
        h.bind_audio(Box::new(FakeEncoder {
            paired: AtomicBool::new(false),
            started: Arc::new(AtomicBool::new(false)),
        }))
        .unwrap();
        assert!(h.pair().is_err());
    }

    #[test]
    fn pairing_succeeds_for_unpaired_encoders() {
        let mut h = Hookup::new();
        h.bind_video(Box::new(FakeEncoder {
            paired: AtomicBool::new(false),
            started: Arc::new(AtomicBool::new(false)),
        }));
        h.bind_audio(Box::new(FakeEncoder {
            paired: AtomicBool::new(false),
            started: Arc::new(AtomicBool::new(false)),
        }))
        .unwrap();
        assert!(h.pair().is_ok());
    }

    #[test]
    fn start_encoders_starts_video_before_audio() {
        let mut h = Hookup::new();
        let video_started = Arc::new(AtomicBool::new(false));
        let audio_started = Arc::new(AtomicBool::new(false));
        h.bind_video(Box::new(FakeEncoder {
            paired: AtomicBool::new(false),
            started: Arc::clone(&video_started),
        }));
        h.bind_audio(Box::new(FakeEncoder {
            paired: AtomicBool::new(false),
            started: Arc::clone(&audio_started),
        }))
        .unwrap();
        h.start_encoders().unwrap();
        assert!(video_started.load(Ordering::SeqCst));
        assert!(audio_started.load(Ordering::SeqCst));
    }
}
