// crates/mediaout-demo/src/main.rs
//
// A runnable smoke test for the engine, in the spirit of the teacher's own
// top-level binary: wires a console `Sink`/`SignalSink` pair, starts an
// output with a bound video and audio track, feeds it a handful of packets
// plus a caption line, and logs every lifecycle signal through `env_logger`
// the way `other_examples/`'s CLI demos do (`env_logger::init()` in `main`).
//
// Not part of the library surface — this binary exists to give the engine
// an end-to-end run outside of unit tests, not to be depended on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mediaout_core::signal::{Signal, SignalSink};
use mediaout_core::{EncoderPacket, OutputCaps, PacketType, StopCode};
use mediaout_engine::{Output, Sink};

struct ConsoleSink {
    caps: OutputCaps,
    started: AtomicBool,
}

impl Sink for ConsoleSink {
    fn caps(&self) -> OutputCaps {
        self.caps
    }

    fn start(&self) -> Result<(), StopCode> {
        self.started.store(true, Ordering::SeqCst);
        log::info!("console sink: started");
        Ok(())
    }

    fn stop(&self, end_ts_ns: i64) {
        self.started.store(false, Ordering::SeqCst);
        log::info!("console sink: stopped (end_ts_ns={end_ts_ns})");
    }

    fn encoded_packet(&self, packet: &EncoderPacket) -> Result<(), StopCode> {
        log::info!(
            "console sink: wrote {:?} packet dts_usec={} keyframe={}",
            packet.kind,
            packet.dts_usec(),
            packet.keyframe
        );
        Ok(())
    }
}

struct LoggingSignalSink;

impl SignalSink for LoggingSignalSink {
    fn emit(&self, output_id: &str, signal: Signal) {
        log::info!("output {output_id}: signal {signal:?}");
    }
}

fn video_packet(dts: i64, keyframe: bool) -> EncoderPacket {
    EncoderPacket::new(PacketType::Video, 0, dts, dts, 1, 30, keyframe, 0, Arc::from(vec![0u8; 16]))
}

fn audio_packet(dts: i64) -> EncoderPacket {
    EncoderPacket::new(PacketType::Audio, 0, dts, dts, 1, 1_000, false, 0, Arc::from(vec![0u8; 8]))
}

fn main() {
    env_logger::init();

    let caps = OutputCaps::VIDEO | OutputCaps::AUDIO | OutputCaps::ENCODED | OutputCaps::CAN_PAUSE;
    let config = mediaout_core::OutputConfig::new("demo-output", "Demo Stream", caps);
    let sink = ConsoleSink {
        caps,
        started: AtomicBool::new(false),
    };

    let output = Output::create(config, Box::new(sink), None, Arc::new(LoggingSignalSink))
        .expect("sink accepted create");

    output.start().expect("sink accepted start");
    output.push_caption_text_with_duration("HELLO FROM MEDIAOUT", 2.0);

    for i in 0..4i64 {
        output.push_encoded_packet(video_packet(i * 33, i == 0));
        output.push_encoded_packet(audio_packet(i * 30));
    }

    log::info!(
        "frames this session: video={} audio={}",
        output.frames_this_session(),
        output.audio_frames_this_session()
    );

    output.stop();
    output.wait_for_stop();
}
