// crates/mediaout-core/src/caps.rs
//
// Capability flags a sink/output declares (spec §3, §6). Kept as a single
// bitflags type rather than a handful of bools so `Output::start` and
// `hookup` can test combinations (`ENCODED | VIDEO | AUDIO`) the way
// spec §4.7 describes callback selection.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OutputCaps: u32 {
        const VIDEO         = 1 << 0;
        const AUDIO         = 1 << 1;
        const ENCODED       = 1 << 2;
        const MULTI_TRACK   = 1 << 3;
        const SERVICE       = 1 << 4;
        const CAN_PAUSE     = 1 << 5;
        const FORCE_ENCODER = 1 << 6;
    }
}

impl OutputCaps {
    /// True when the data-capture hookup should route through the packet
    /// interleaver rather than a per-type default callback (spec §4.7).
    pub fn wants_interleaver(self) -> bool {
        self.contains(OutputCaps::ENCODED | OutputCaps::VIDEO | OutputCaps::AUDIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaver_requires_encoded_video_and_audio() {
        let both = OutputCaps::ENCODED | OutputCaps::VIDEO | OutputCaps::AUDIO;
        assert!(both.wants_interleaver());
        assert!(!(OutputCaps::ENCODED | OutputCaps::VIDEO).wants_interleaver());
        assert!(!(OutputCaps::VIDEO | OutputCaps::AUDIO).wants_interleaver());
    }
}
