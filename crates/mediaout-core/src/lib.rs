// crates/mediaout-core/src/lib.rs
//
// Pure data types and algorithms for the media output engine. No threads,
// no mutexes of its own — callers (mediaout-engine) hold whatever lock is
// appropriate and call into these structs under it. Nothing here reaches
// outside the process; encoders, sinks, and services are traits defined in
// mediaout-engine, which this crate knows nothing about.

pub mod caps;
pub mod caption;
pub mod config;
pub mod delay;
pub mod interleaver;
pub mod packet;
pub mod pause;
pub mod refcount;
pub mod signal;
pub mod stopcode;
pub mod time;

pub use caps::OutputCaps;
pub use caption::CaptionQueue;
pub use config::{DelayConfig, OutputConfig, ReconnectConfig};
pub use delay::DelayBuffer;
pub use interleaver::InterleaverState;
pub use packet::{EncoderPacket, PacketType};
pub use pause::PauseState;
pub use refcount::{StrongRef, WeakRef};
pub use signal::{NullSignalSink, RecordingSignalSink, Signal, SignalSink};
pub use stopcode::StopCode;
