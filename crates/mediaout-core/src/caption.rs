// crates/mediaout-core/src/caption.rs
//
// Closed-caption injection (spec §4.5). `Output` holds one `CaptionQueue`
// behind `caption_mutex` (spec §5) and calls `maybe_inject` from the
// interleaver's emit step for every video packet with `priority <= 1`.
//
// Two independent sources feed one SEI per eligible frame: a raw CEA-708
// triple queue (already-encoded `cc_data` entries, e.g. relayed from an
// upstream decoder) and a line-oriented text queue (rendered into a
// CEA-708 popon frame here). The raw queue takes priority when both are
// non-empty in the same frame, matching spec §4.5 step ordering.

use std::collections::VecDeque;

use crate::packet::{EncoderPacket, PacketType};

/// Reserved payload size for the `user_data_registered_itu_t_t35` SEI
/// message this injector emits (spec §4.5 step 1).
const CEA608_MAX_SIZE: usize = 31;

const SEI_START_CODE: [u8; 4] = [0, 0, 0, 1];
/// `user_data_registered_itu_t_t35`, ITU-T H.264/H.265 Annex D payload type.
const SEI_PAYLOAD_TYPE: u8 = 4;

const DEFAULT_DISPLAY_DURATION_SECS: f64 = 2.0;

struct TextCue {
    text: String,
    display_duration: f64,
}

pub struct CaptionQueue {
    text_queue: VecDeque<TextCue>,
    raw_queue: VecDeque<[u8; 3]>,
    /// When the currently-displayed text cue finishes (spec §4.5 step 2).
    caption_timestamp: f64,
    /// Per-output (not process-wide, see DESIGN.md) pacing scalar for raw
    /// triple injection.
    last_raw_pace_ts: f64,
}

impl CaptionQueue {
    pub fn new() -> Self {
        Self {
            text_queue: VecDeque::new(),
            raw_queue: VecDeque::new(),
            caption_timestamp: 0.0,
            last_raw_pace_ts: 0.0,
        }
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.push_text_with_duration(text, DEFAULT_DISPLAY_DURATION_SECS);
    }

    pub fn push_text_with_duration(&mut self, text: impl Into<String>, display_duration: f64) {
        self.text_queue.push_back(TextCue {
            text: text.into(),
            display_duration,
        });
    }

    /// Queue one CEA-708 `cc_data` triple (spec §3's "byte triple queue").
    pub fn push_raw_triple(&mut self, triple: [u8; 3]) {
        self.raw_queue.push_back(triple);
    }

    pub fn is_empty(&self) -> bool {
        self.text_queue.is_empty() && self.raw_queue.is_empty()
    }

    /// Run injection for one video packet (spec §4.5), mutating `pkt.data`
    /// in place when a caption is emitted. `frame_ts` is the packet's PTS in
    /// seconds. Returns whether an SEI was appended.
    pub fn maybe_inject(&mut self, pkt: &mut EncoderPacket, frame_ts: f64) -> bool {
        if pkt.kind != PacketType::Video || pkt.priority > 1 {
            return false;
        }

        let sei_payload = if !self.raw_queue.is_empty() {
            Some(self.build_raw_sei())
        } else if !self.text_queue.is_empty() && self.caption_timestamp <= frame_ts {
            Some(self.build_text_sei(frame_ts))
        } else {
            None
        };

        let Some(payload) = sei_payload else { return false };
        self.append_sei(pkt, payload);
        true
    }

    /// Drain the raw triple queue into a CEA-708 popon frame, validating
    /// each triple per spec §4.5 step 1: skip unless the low 2 bits of the
    /// type byte are zero, skip padding (`0x8080`), skip zero data, skip
    /// parity-invalid words.
    fn build_raw_sei(&mut self) -> Vec<u8> {
        let mut cc_data = Vec::new();
        while let Some(triple) = self.raw_queue.pop_front() {
            let [type_byte, hi, lo] = triple;
            if type_byte & 0b11 != 0 {
                continue; // not a CEA-608-compatible entry
            }
            let word = ((hi as u16) << 8) | lo as u16;
            if word == 0x8080 || word == 0 {
                continue; // padding or zero data
            }
            if !has_valid_parity(hi) || !has_valid_parity(lo) {
                continue;
            }
            cc_data.push((true, type_byte, word));
        }
        encode_cea708_popon(&cc_data)
    }

    fn build_text_sei(&mut self, frame_ts: f64) -> Vec<u8> {
        let cue = self.text_queue.pop_front().expect("checked non-empty by caller");
        self.caption_timestamp = frame_ts + cue.display_duration;
        encode_text_frame(&cue.text)
    }

    /// Wrap `payload` in a start code and append it after the packet's
    /// existing NAL data (spec §4.5: "appends after ... implementations may
    /// improve this" — see SPEC_FULL.md's Open Question resolution).
    fn append_sei(&self, pkt: &mut EncoderPacket, payload: Vec<u8>) {
        let mut sei = Vec::with_capacity(SEI_START_CODE.len() + 2 + payload.len());
        sei.extend_from_slice(&SEI_START_CODE);
        sei.push(SEI_PAYLOAD_TYPE);
        sei.push(payload.len().min(255) as u8);
        sei.extend_from_slice(&payload);

        let mut data = Vec::with_capacity(pkt.data.len() + sei.len());
        data.extend_from_slice(&pkt.data);
        data.extend_from_slice(&sei);
        pkt.data = std::sync::Arc::from(data);
    }
}

impl Default for CaptionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Odd parity: CEA-608 bytes carry their parity bit in bit 7, valid when
/// the total population count of set bits is odd.
fn has_valid_parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 1
}

/// Pack validated CEA-708 pairs into a `user_data_registered_itu_t_t35`
/// payload, padded/truncated to `CEA608_MAX_SIZE`.
fn encode_cea708_popon(pairs: &[(bool, u8, u16)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CEA608_MAX_SIZE);
    out.push(0x47); // itu_t_t35_country_code: United States
    out.push(0x03); // cc_count placeholder context byte (profile-dependent, fixed here)
    for &(one_pair, type_byte, word) in pairs {
        if !one_pair {
            continue;
        }
        out.push(type_byte);
        out.push((word >> 8) as u8);
        out.push((word & 0xff) as u8);
    }
    out.resize(CEA608_MAX_SIZE, 0);
    out
}

/// Render a line of text into a minimal CEA-708 "popon" caption frame: one
/// pair per character as a simplified stand-in for a full PAC/EOD sequence.
fn encode_text_frame(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(CEA608_MAX_SIZE);
    out.push(0x47);
    out.push(0x02);
    for chunk in text.as_bytes().chunks(2) {
        let hi = chunk[0];
        let lo = *chunk.get(1).unwrap_or(&0);
        out.push(0x04); // CEA-608 type byte, low 2 bits zero
        out.push(hi);
        out.push(lo);
        if out.len() >= CEA608_MAX_SIZE {
            break;
        }
    }
    out.resize(CEA608_MAX_SIZE, 0);
    out
}
