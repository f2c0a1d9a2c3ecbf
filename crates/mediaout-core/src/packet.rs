// crates/mediaout-core/src/packet.rs
//
// `EncoderPacket` — one compressed audio or video access unit, as produced
// by an external encoder (spec §3). Deliberately dumb: no FFmpeg handle, no
// codec knowledge beyond the NAL-boundary byte slice the caption injector
// appends to. `data` is `Arc<[u8]>`, the Rust-native stand-in for the
// reference-counted byte buffer spec §3/§4.5 describes — cloning a packet
// never copies the payload, and dropping the last clone frees it, so there
// is no hand-rolled "leading 4-byte reference count" to maintain (see
// DESIGN.md).

use std::sync::Arc;

/// Maximum number of simultaneously bound audio encoders (spec §3).
pub const MAX_MIXES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Video,
    Audio,
}

/// One encoded packet flowing from an encoder into the interleaver.
///
/// Invariants (spec §3): `dts <= pts`; `dts_usec` is always in sync with
/// `dts` — there is no public setter for `dts` that skips recomputing it.
#[derive(Clone, Debug)]
pub struct EncoderPacket {
    pub kind: PacketType,
    /// 0..MAX_MIXES for audio; ignored (always 0) for video.
    pub track_idx: usize,
    pts: i64,
    dts: i64,
    timebase_num: i32,
    timebase_den: i32,
    dts_usec: i64,
    pub keyframe: bool,
    /// Caption injection only runs on packets with priority <= 1 (spec §4.5).
    pub priority: u8,
    pub data: Arc<[u8]>,
}

impl EncoderPacket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: PacketType,
        track_idx: usize,
        pts: i64,
        dts: i64,
        timebase_num: i32,
        timebase_den: i32,
        keyframe: bool,
        priority: u8,
        data: Arc<[u8]>,
    ) -> Self {
        debug_assert!(dts <= pts, "encoder produced dts > pts ({dts} > {pts})");
        let dts_usec = compute_dts_usec(dts, timebase_num, timebase_den);
        Self {
            kind,
            track_idx,
            pts,
            dts,
            timebase_num,
            timebase_den,
            dts_usec,
            keyframe,
            priority,
            data,
        }
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn dts(&self) -> i64 {
        self.dts
    }

    pub fn dts_usec(&self) -> i64 {
        self.dts_usec
    }

    pub fn timebase(&self) -> (i32, i32) {
        (self.timebase_num, self.timebase_den)
    }

    /// Convert `pts` to seconds using this packet's timebase.
    pub fn pts_secs(&self) -> f64 {
        self.pts as f64 * self.timebase_num as f64 / self.timebase_den as f64
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Set `dts` and recompute `dts_usec` in lockstep — never skip the second half.
    pub fn set_dts(&mut self, dts: i64) {
        self.dts = dts;
        self.dts_usec = compute_dts_usec(self.dts, self.timebase_num, self.timebase_den);
    }

    /// Subtract a per-track rebase offset from both timestamps (spec §4.2 step 4).
    /// `offset` is expressed in this packet's own timebase units — video offsets
    /// are PTS values, audio offsets are DTS values, per spec §3.
    pub fn rebase(&mut self, offset: i64) {
        self.set_pts(self.pts - offset);
        self.set_dts(self.dts - offset);
    }
}

/// `dts * 1e6 * num / den`, the cross-track ordering key (spec GLOSSARY).
/// Computed in `i128` to avoid overflow before the final division.
pub fn compute_dts_usec(dts: i64, timebase_num: i32, timebase_den: i32) -> i64 {
    ((dts as i128) * 1_000_000i128 * timebase_num as i128 / timebase_den as i128) as i64
}
