// crates/mediaout-engine/src/sink.rs
//
// External collaborator traits (spec §1 Out of scope, §6 External
// Interfaces): the file muxer, network streamer, or test double this
// engine drives. Styled after the teacher's `VideoTransition` trait
// (`transitions/mod.rs`) — a `dyn`-safe `Send + Sync` trait object the
// state machine holds behind a `Box`, with doc comments carrying the
// contract spec.md states in prose.

use std::time::Duration;

use mediaout_core::{EncoderPacket, OutputCaps, StopCode};

/// The pluggable consumer of finished packets/frames (spec GLOSSARY).
///
/// Implementations declare their capabilities via [`Sink::caps`]; the
/// engine only calls the methods that capability set implies it will use
/// (e.g. `encoded_packet` only for `ENCODED` sinks).
pub trait Sink: Send + Sync {
    fn caps(&self) -> OutputCaps;

    /// Called once from `Output::create` (spec §4.1: "call sink's `create`
    /// with settings. May fail; partial state cleaned up."). Default no-op
    /// for sinks with nothing to validate up front.
    fn create(&self, config: &mediaout_core::OutputConfig) -> Result<(), StopCode> {
        let _ = config;
        Ok(())
    }

    /// Preconditions: not already started. `settings` is opaque to the
    /// engine — sinks parse their own configuration blob.
    fn start(&self) -> Result<(), StopCode>;

    /// `end_ts_ns` lets the sink flush to a wall-clock boundary (spec
    /// §4.1's `stop()`); `0` means stop immediately (`force_stop()`).
    fn stop(&self, end_ts_ns: i64);

    /// `Err` surfaces as `Signal::WritingError` rather than silently
    /// dropping the packet (spec §4.1's signal list).
    fn encoded_packet(&self, packet: &EncoderPacket) -> Result<(), StopCode> {
        let _ = packet;
        Ok(())
    }

    fn raw_video(&self, data: &[u8], width: u32, height: u32, pts_ns: i64) -> Result<(), StopCode> {
        let _ = (data, width, height, pts_ns);
        Ok(())
    }

    fn raw_audio(&self, mix_idx: usize, data: &[u8], pts_ns: i64) -> Result<(), StopCode> {
        let _ = (mix_idx, data, pts_ns);
        Ok(())
    }

    /// 0.0..=1.0, never outside that range (spec §6).
    fn get_congestion(&self) -> f64 {
        0.0
    }

    fn get_total_bytes(&self) -> u64 {
        0
    }

    fn get_dropped_frames(&self) -> u64 {
        0
    }

    fn get_connect_time(&self) -> Option<Duration> {
        None
    }

    fn is_ready_to_update(&self) -> bool {
        true
    }
}

/// Network endpoint metadata (spec §6's Service contract). Only consulted
/// when the bound sink declares `OutputCaps::SERVICE`.
pub trait Service: Send + Sync {
    fn initialize(&self) -> Result<(), StopCode>;
    fn activate(&self);
    fn deactivate(&self);
    fn url(&self) -> &str;
}

/// Per-track packet source (spec §1's "Encoders" out-of-scope collaborator).
/// `Output` owns zero audio `Encoder`s plus one optional video `Encoder`
/// through `hookup::Hookup`.
pub trait Encoder: Send + Sync {
    fn start(&self) -> Result<(), StopCode>;
    fn stop(&self);

    /// Whether this encoder is bound to another encoder via pairing (spec
    /// §4.7: "exactly one inactive unpaired audio encoder is paired with
    /// the video encoder before start").
    fn is_paired(&self) -> bool;
    fn pair_with(&self, other_id: &str) -> Result<(), PairError>;
}

#[derive(Debug, PartialEq, Eq)]
pub struct PairError;
