// crates/mediaout-core/src/pause.rs
//
// Pause/unpause bookkeeping (spec §3's `PauseState`, §4.3). `Output` holds
// one `PauseState` per encoded pause target (the video encoder, and
// separately each audio encoder for the atomic encoded-pause path) behind
// `pause.mutex` (spec §5); for raw outputs a single `PauseState` gates the
// frame callback via `pause_check`.
//
// Quantization note: §4.3's prose formula `last + floor((now-last+2I)/I)*I`
// does not reproduce the worked example in §8 S4 (`last=1_000_000_000`,
// `I=33_333_333`, `now=1_050_000_000` ⇒ expected `ts_start = last + 2I`;
// the prose formula yields `last + 3I`). The §3 invariant instead describes
// "snapped to the nearest future multiple of the video frame interval above
// `last_video_ts`", which *does* match S4 when read as "the smallest
// multiple of I past `last` that is strictly greater than `now`" —
// `last + (floor((now-last)/I) + 1) * I`. This module implements that
// reading; see DESIGN.md.

use parking_lot::Mutex;

pub struct PauseState {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    ts_start: i64,
    ts_end: i64,
    ts_offset: i64,
    last_video_ts: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PauseStateError;

impl PauseState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Updates the rolling reference point used by `quantize` (spec §3:
    /// snapping happens "above `last_video_ts`"). Called whenever a video
    /// frame/packet passes through the output.
    pub fn set_last_video_ts(&self, ts: i64) {
        self.inner.lock().last_video_ts = ts;
    }

    pub fn is_paused(&self) -> bool {
        let inner = self.inner.lock();
        inner.ts_start != 0 && inner.ts_end == 0
    }

    pub fn ts_offset(&self) -> i64 {
        self.inner.lock().ts_offset
    }

    /// Begin a pause interval. Allowed only when neither a pause is active
    /// nor pending reset (spec §4.3: `ts_start == 0 ∧ ts_end == 0`). Returns
    /// the quantized start timestamp.
    pub fn begin(&self, now: i64, frame_interval: i64) -> Result<i64, PauseStateError> {
        let mut inner = self.inner.lock();
        if inner.ts_start != 0 || inner.ts_end != 0 {
            return Err(PauseStateError);
        }
        let ts_start = quantize(inner.last_video_ts, now, frame_interval);
        inner.ts_start = ts_start;
        Ok(ts_start)
    }

    /// End a pause interval. Allowed only while paused (`ts_start != 0 ∧
    /// ts_end == 0`). Advances `ts_offset` by the interval length, then
    /// resets `(ts_start, ts_end)` for the next cycle (spec §4.3's
    /// `pause_reset`). Returns the quantized end timestamp.
    pub fn end(&self, now: i64, frame_interval: i64) -> Result<i64, PauseStateError> {
        let mut inner = self.inner.lock();
        if inner.ts_start == 0 || inner.ts_end != 0 {
            return Err(PauseStateError);
        }
        let ts_end = quantize(inner.last_video_ts, now, frame_interval);
        inner.ts_offset += ts_end - inner.ts_start;
        inner.ts_start = 0;
        inner.ts_end = 0;
        Ok(ts_end)
    }

    /// For raw outputs: whether a frame at `frame_ts` falls inside the
    /// currently-open pause window and should be dropped (spec §4.3).
    pub fn pause_check(&self, frame_ts: i64) -> bool {
        let inner = self.inner.lock();
        inner.ts_start != 0 && inner.ts_end == 0 && frame_ts >= inner.ts_start
    }
}

impl Default for PauseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest multiple of `interval`, counted from `last`, that is strictly
/// greater than `now` (spec §3/§4.3, resolved per the module doc comment).
fn quantize(last: i64, now: i64, interval: i64) -> i64 {
    assert!(interval > 0, "frame interval must be positive");
    let n = (now - last).div_euclid(interval) + 1;
    last + n * interval
}
