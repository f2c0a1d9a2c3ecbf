// crates/mediaout-core/src/interleaver.rs
//
// The packet interleaver (spec §4.2) — the biggest single algorithm in this
// crate. Pure: no mutex of its own. `mediaout-engine::Output` holds
// `interleaved_mutex` (spec §5) across the whole call into `push_packet`,
// exactly as the teacher holds one mutex across a whole callback handler
// rather than taking and releasing several small locks.
//
// Preconditions this type assumes its caller has already handled (spec
// §4.2 step 1, "Tag track"): `track_idx` on every audio packet has already
// been resolved against the output's bound audio encoders. Track-identity
// resolution needs to know which encoder produced the packet, which this
// crate has no concept of — that's `mediaout-engine`'s job.

use std::collections::VecDeque;

use crate::packet::{EncoderPacket, PacketType, MAX_MIXES};

/// Buffered interleaver state for one `Output` (spec §3).
pub struct InterleaverState {
    buffer: VecDeque<EncoderPacket>,
    /// Number of audio tracks this interleaver expects to see before
    /// initialization can complete (spec §4.2 step 7: "if any track has no
    /// audio, fail initialization"). Precondition: this interleaver is only
    /// used for ENCODED+VIDEO+AUDIO outputs (spec §4.7), so this is always
    /// >= 1.
    num_audio_tracks: usize,

    received_video: bool,
    received_audio: bool,
    /// Set once initialization (pruning + offset capture) has completed.
    /// Before this, packets are buffered and reception is tracked but no
    /// rebase is applied; after, every inserted packet is rebased on arrival.
    init_done: bool,

    highest_video_ts: i64,
    highest_audio_ts: i64,

    video_offset: i64,
    audio_offsets: [i64; MAX_MIXES],

    /// (num, den) of the first video packet's timebase, captured on first
    /// reception — needed for the `one_video_frame_usec` pruning threshold
    /// (spec §4.2 step 7) and for the keyframe-gate cutoff.
    video_timebase: Option<(i32, i32)>,
    /// (num, den) of each audio track's first packet timebase, captured the
    /// same way as `video_timebase`. Audio tracks can legitimately run a
    /// different timebase than video (spec §8 S1: 1/30 video vs 1/1000
    /// audio) and from each other, so `highest_audio_ts`'s rebase must use
    /// track 0's own timebase rather than reusing `video_timebase`.
    audio_timebase: [Option<(i32, i32)>; MAX_MIXES],

    pub total_frames: u64,
    pub total_audio_frames: u64,
}

impl InterleaverState {
    pub fn new(num_audio_tracks: usize) -> Self {
        assert!(
            (1..=MAX_MIXES).contains(&num_audio_tracks),
            "interleaver requires 1..={MAX_MIXES} audio tracks, got {num_audio_tracks}"
        );
        Self {
            buffer: VecDeque::new(),
            num_audio_tracks,
            received_video: false,
            received_audio: false,
            init_done: false,
            highest_video_ts: i64::MIN,
            highest_audio_ts: i64::MIN,
            video_offset: 0,
            audio_offsets: [0; MAX_MIXES],
            video_timebase: None,
            audio_timebase: [None; MAX_MIXES],
            total_frames: 0,
            total_audio_frames: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.init_done
    }

    /// Feed one packet through the full algorithm (spec §4.2 steps 2-8) and
    /// return the packets now ready for caption injection / sink handoff, in
    /// emission order. Step 1 (track tagging) and step 3 (clone-vs-move, a
    /// C-ism that doesn't apply to an owned `EncoderPacket`) are the
    /// caller's responsibility; everything else happens here.
    pub fn push_packet(&mut self, pkt: EncoderPacket) -> Vec<EncoderPacket> {
        // Step 2: keyframe gate. Drop buffered audio older than a non-
        // keyframe video packet seen before any video has been received,
        // and drop the packet itself.
        if !self.received_video && pkt.kind == PacketType::Video && !pkt.keyframe {
            let cutoff = pkt.dts_usec();
            self.buffer
                .retain(|p| !(p.kind == PacketType::Audio && p.dts_usec() < cutoff));
            return Vec::new();
        }

        let mut pkt = pkt;

        // Step 4: rebase (steady state) or mark reception (still warming up).
        if self.init_done {
            self.apply_offset(&mut pkt);
        } else {
            match pkt.kind {
                PacketType::Video => {
                    if !self.received_video {
                        self.video_timebase = Some(pkt.timebase());
                    }
                    self.received_video = true;
                }
                PacketType::Audio => {
                    if pkt.track_idx < MAX_MIXES && self.audio_timebase[pkt.track_idx].is_none() {
                        self.audio_timebase[pkt.track_idx] = Some(pkt.timebase());
                    }
                    self.received_audio = true;
                }
            }
        }

        // Step 5 + 6: ordered insert, high-water mark tracking.
        self.ordered_insert(pkt);

        // Step 7: initialization transition, on the first instant both are true.
        if !self.init_done && self.received_video && self.received_audio {
            self.try_initialize();
        }

        // Step 8: emit everything the monotonicity guard now allows.
        self.drain_ready()
    }

    fn apply_offset(&self, pkt: &mut EncoderPacket) {
        let offset = match pkt.kind {
            PacketType::Video => self.video_offset,
            PacketType::Audio => self.audio_offsets[pkt.track_idx],
        };
        pkt.rebase(offset);
    }

    fn ordered_insert(&mut self, pkt: EncoderPacket) {
        match pkt.kind {
            PacketType::Video => self.highest_video_ts = self.highest_video_ts.max(pkt.dts_usec()),
            PacketType::Audio => self.highest_audio_ts = self.highest_audio_ts.max(pkt.dts_usec()),
        }

        // Leftmost position where `pkt` sorts strictly before `cur`, with
        // the video-before-audio tie-break at equal dts_usec (spec §4.2
        // step 5, §8 S3).
        let pos = self
            .buffer
            .iter()
            .position(|cur| {
                pkt.dts_usec() < cur.dts_usec()
                    || (pkt.dts_usec() == cur.dts_usec()
                        && pkt.kind == PacketType::Video
                        && cur.kind == PacketType::Audio)
            })
            .unwrap_or(self.buffer.len());
        self.buffer.insert(pos, pkt);
    }

    /// Prune premature packets and capture rebase offsets (spec §4.2 step 7).
    fn try_initialize(&mut self) {
        let Some(video_idx) = self.buffer.iter().position(|p| p.kind == PacketType::Video) else {
            return;
        };

        let mut first_audio_idx = vec![None; self.num_audio_tracks];
        for (i, p) in self.buffer.iter().enumerate() {
            if p.kind == PacketType::Audio && p.track_idx < self.num_audio_tracks {
                let slot = &mut first_audio_idx[p.track_idx];
                if slot.is_none() {
                    *slot = Some(i);
                }
            }
        }

        if first_audio_idx.iter().any(|x| x.is_none()) {
            // A bound track hasn't produced a single packet yet — can't align.
            log::debug!("interleaver: initialization deferred, missing audio track");
            self.received_audio = false;
            return;
        }
        let first_audio_idx: Vec<usize> = first_audio_idx.into_iter().map(|x| x.unwrap()).collect();

        let video_first_usec = self.buffer[video_idx].dts_usec();
        let max_diff = first_audio_idx
            .iter()
            .map(|&i| self.buffer[i].dts_usec() - video_first_usec)
            .fold(i64::MIN, i64::max);

        let one_video_frame_usec = self
            .video_timebase
            .map(|(num, den)| (num as i64) * 1_000_000 / den.max(1) as i64)
            .unwrap_or(0);

        if max_diff > one_video_frame_usec {
            // Audio drifted too far ahead of (or behind) video — discard
            // everything up to and including the last first-per-track index.
            log::warn!(
                "interleaver: discarding premature packets, max_diff={max_diff}us > {one_video_frame_usec}us"
            );
            let discard_upto = first_audio_idx.iter().copied().chain(std::iter::once(video_idx)).max().unwrap();
            self.buffer.drain(..=discard_upto);
        } else {
            // Close enough — align on the closest audio packet to the first
            // video packet. That pair is the alignment anchor, so it is kept:
            // only what comes strictly before it is discarded.
            let closest_audio_idx = self
                .buffer
                .iter()
                .enumerate()
                .filter(|(_, p)| p.kind == PacketType::Audio)
                .min_by_key(|(_, p)| (p.dts_usec() - video_first_usec).abs())
                .map(|(i, _)| i)
                .expect("received_audio implies at least one audio packet");
            let discard_upto = video_idx.min(closest_audio_idx);
            self.buffer.drain(..discard_upto);
        }

        let has_video = self.buffer.iter().any(|p| p.kind == PacketType::Video);
        let has_all_audio = (0..self.num_audio_tracks)
            .all(|t| self.buffer.iter().any(|p| p.kind == PacketType::Audio && p.track_idx == t));
        if !has_video || !has_all_audio {
            log::warn!("interleaver: pruning left an incomplete track set, aborting init");
            self.received_video = false;
            self.received_audio = false;
            return;
        }

        let video_offset = self.buffer.iter().find(|p| p.kind == PacketType::Video).unwrap().pts();
        let mut audio_offsets = [0i64; MAX_MIXES];
        for t in 0..self.num_audio_tracks {
            audio_offsets[t] = self
                .buffer
                .iter()
                .find(|p| p.kind == PacketType::Audio && p.track_idx == t)
                .unwrap()
                .dts();
        }

        self.video_offset = video_offset;
        self.audio_offsets = audio_offsets;

        for p in self.buffer.iter_mut() {
            let offset = match p.kind {
                PacketType::Video => video_offset,
                PacketType::Audio => audio_offsets[p.track_idx],
            };
            p.rebase(offset);
        }
        self.resort();

        // Rebase the running high-water marks too (spec §4.2 step 7). With
        // per-track audio offsets that may legitimately differ, track 0's
        // offset is the canonical choice for the single scalar
        // `highest_audio_ts` — see DESIGN.md. Each rebase uses its own
        // track's timebase: video and audio (and different audio tracks)
        // can run different timebases, so reusing `video_timebase` for the
        // audio conversion would produce a wrong value whenever they differ
        // (spec §8 S1: 1/30 video vs 1/1000 audio).
        if let Some((num, den)) = self.video_timebase {
            self.highest_video_ts -= crate::packet::compute_dts_usec(video_offset, num, den);
        }
        if let Some((num, den)) = self.audio_timebase[0] {
            self.highest_audio_ts -= crate::packet::compute_dts_usec(audio_offsets[0], num, den);
        }

        self.init_done = true;
        log::info!(
            "interleaver: initialized, video_offset={video_offset} audio_offsets[0]={}",
            audio_offsets[0]
        );
    }

    fn resort(&mut self) {
        let mut items: Vec<EncoderPacket> = self.buffer.drain(..).collect();
        items.sort_by(|a, b| {
            a.dts_usec().cmp(&b.dts_usec()).then_with(|| {
                // video before audio at equal dts_usec
                match (a.kind, b.kind) {
                    (PacketType::Video, PacketType::Audio) => std::cmp::Ordering::Less,
                    (PacketType::Audio, PacketType::Video) => std::cmp::Ordering::Greater,
                    _ => std::cmp::Ordering::Equal,
                }
            })
        });
        self.buffer = items.into();
    }

    /// Emit every packet whose ordering is now settled: while the head has
    /// an opposing-type packet strictly later in the buffer, no earlier
    /// opposing-type packet can still arrive to precede it (spec §4.2 step 8).
    fn drain_ready(&mut self) -> Vec<EncoderPacket> {
        let mut out = Vec::new();
        while let Some(head) = self.buffer.front() {
            let head_kind = head.kind;
            let head_ts = head.dts_usec();
            let opposing_later = self
                .buffer
                .iter()
                .skip(1)
                .any(|p| p.kind != head_kind && p.dts_usec() > head_ts);
            if !opposing_later {
                break;
            }
            let popped = self.buffer.pop_front().unwrap();
            match popped.kind {
                PacketType::Video => self.total_frames += 1,
                PacketType::Audio => self.total_audio_frames += 1,
            }
            out.push(popped);
        }
        out
    }
}
