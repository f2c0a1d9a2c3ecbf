// crates/mediaout-core/src/time.rs
//
// Rational timebase arithmetic shared by the interleaver, pause quantizer
// and caption scheduler. Distinct from `helpers::time`'s human-readable
// `format_time`/`format_duration` — this module is about converting between
// timebase units and microseconds, not presentation.

/// One frame's duration in microseconds for a video track running at
/// `timebase_num/timebase_den` seconds per tick with `ticks_per_frame` ticks
/// (usually 1 for a CFR encoder emitting one packet per frame).
pub fn frame_interval_usec(timebase_num: i32, timebase_den: i32, ticks_per_frame: i64) -> i64 {
    ((ticks_per_frame as i128) * 1_000_000i128 * timebase_num as i128 / timebase_den as i128) as i64
}

/// Convert a timestamp in timebase units to microseconds.
pub fn timebase_to_usec(ts: i64, timebase_num: i32, timebase_den: i32) -> i64 {
    crate::packet::compute_dts_usec(ts, timebase_num, timebase_den)
}

pub fn secs_to_usec(secs: f64) -> i64 {
    (secs * 1_000_000.0).round() as i64
}

pub fn usec_to_secs(usec: i64) -> f64 {
    usec as f64 / 1_000_000.0
}
