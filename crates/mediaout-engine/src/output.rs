// crates/mediaout-engine/src/output.rs
//
// The `Output` state machine (spec §3, §4.1) — the orchestrator that owns
// encoders/service/sink, runs the encoded-packet pipeline, and emits
// lifecycle signals. Grounded on `worker.rs`'s `MediaWorker`: its
// `Arc<AtomicBool>` cancel flags and register-before-spawn discipline
// generalized from "one encode job" to "one Output's full lifecycle", now
// reused for the reconnect worker.
//
// Phase + boolean side-table (spec §9's "Boolean-soup state" note): the
// coarse lifecycle is an explicit enum; the orthogonal flags spec.md lists
// (`reconnecting`, `delay_active`, `delay_capturing`, `data_active`,
// `paused`) are atomics alongside it rather than folded into a combinatorial
// enum, since several are legitimately true at once (e.g. `reconnecting ∧
// delay_active ∧ ¬data_active`).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use parking_lot::Mutex as PlMutex;

use mediaout_core::caption::CaptionQueue;
use mediaout_core::config::OutputConfig;
use mediaout_core::delay::DelayBuffer;
use mediaout_core::interleaver::InterleaverState;
use mediaout_core::pause::PauseState;
use mediaout_core::signal::{Signal, SignalSink};
use mediaout_core::{EncoderPacket, OutputCaps, StopCode, StrongRef, WeakRef};

use crate::hookup::{terminal_callback, Hookup, TerminalCallback};
use crate::reconnect::{compute_backoff_ms, jittered_exponent, ReconnectWorker};
use crate::sink::{Service, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Active,
    Stopping,
    Reconnecting,
    DelayedStarting,
    DelayedActive,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CreateError {
    SinkRejected,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PauseError {
    NotCapable,
    NotActive,
    AlreadyInRequestedState,
}

pub struct Output {
    pub id: String,
    pub name: String,
    caps: OutputCaps,
    config: OutputConfig,

    sink: Box<dyn Sink>,
    service: Option<Box<dyn Service>>,
    signal_sink: Arc<dyn SignalSink>,

    hookup: Mutex<Hookup>,

    phase: Mutex<Phase>,

    active: AtomicBool,
    reconnecting: AtomicBool,
    delay_active: AtomicBool,
    delay_capturing: AtomicBool,
    data_active: AtomicBool,
    paused: AtomicBool,
    valid: AtomicBool,

    /// Manual-reset event external callers can wait on for teardown to
    /// finish (spec §5's "Suspension points"). `true` once set.
    stopping_event: (Mutex<bool>, Condvar),

    last_error: Mutex<Option<String>>,
    stop_code: Mutex<StopCode>,

    reconnect_retries: AtomicU32,
    reconnect_jittered_exponent: f64,
    reconnect_worker: Mutex<Option<ReconnectWorker>>,
    /// Set once, right after construction, so `schedule_reconnect` can hand
    /// the timeout callback a handle back to this `Output` without ever
    /// owning a strong cycle (spec §9's cyclic-back-reference note).
    self_weak: Mutex<Option<WeakRef<Output>>>,

    pause_state: PauseState,
    caption_queue: PlMutex<CaptionQueue>,
    delay_buffer: PlMutex<DelayBuffer>,
    interleaver: PlMutex<InterleaverState>,

    total_frames: AtomicU64,
    total_audio_frames: AtomicU64,
    /// `total_frames`/`total_audio_frames` as of the most recent successful
    /// `start`/reconnect (spec §3's "starting frame counts"), so callers can
    /// report frames produced *this session* by subtracting these from the
    /// running totals without the output needing to reset the totals
    /// themselves on every reconnect.
    starting_frames: AtomicU64,
    starting_audio_frames: AtomicU64,
}

impl Output {
    /// Allocate and initialize (spec §4.1's `create`). Calls the sink's own
    /// `create` with `config` up front; on rejection, nothing is allocated
    /// (spec §7: "partially initialized output is fully torn down" — there
    /// is nothing to tear down because nothing was built yet). `start`'s own
    /// preconditions are checked later, in `start()`.
    pub fn create(
        config: OutputConfig,
        sink: Box<dyn Sink>,
        service: Option<Box<dyn Service>>,
        signal_sink: Arc<dyn SignalSink>,
    ) -> Result<StrongRef<Self>, CreateError> {
        if let Err(code) = sink.create(&config) {
            log::warn!("output {}: sink rejected create ({code})", config.id);
            return Err(CreateError::SinkRejected);
        }

        let caps = config.caps;
        let audio_tracks = config.audio_track_count().max(1);
        let output = Self {
            id: config.id.clone(),
            name: config.name.clone(),
            caps,
            reconnect_jittered_exponent: jittered_exponent(config.reconnect.exponent),
            hookup: Mutex::new(Hookup::new()),
            phase: Mutex::new(Phase::Idle),
            active: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            delay_active: AtomicBool::new(false),
            delay_capturing: AtomicBool::new(false),
            data_active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            stopping_event: (Mutex::new(false), Condvar::new()),
            last_error: Mutex::new(None),
            stop_code: Mutex::new(StopCode::Success),
            reconnect_retries: AtomicU32::new(0),
            reconnect_worker: Mutex::new(None),
            self_weak: Mutex::new(None),
            pause_state: PauseState::new(),
            caption_queue: PlMutex::new(CaptionQueue::new()),
            delay_buffer: PlMutex::new(DelayBuffer::new(config.delay.clone())),
            interleaver: PlMutex::new(InterleaverState::new(audio_tracks)),
            total_frames: AtomicU64::new(0),
            total_audio_frames: AtomicU64::new(0),
            starting_frames: AtomicU64::new(0),
            starting_audio_frames: AtomicU64::new(0),
            sink,
            service,
            signal_sink,
            config,
        };
        let strong = StrongRef::new(output);
        *strong.self_weak.lock().unwrap() = Some(strong.downgrade());
        Ok(strong)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub fn hookup(&self) -> std::sync::MutexGuard<'_, Hookup> {
        self.hookup.lock().unwrap()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn total_audio_frames(&self) -> u64 {
        self.total_audio_frames.load(Ordering::Acquire)
    }

    /// Video frames produced since the most recent `start`/reconnect (spec
    /// §3's "starting frame counts").
    pub fn frames_this_session(&self) -> u64 {
        self.total_frames().saturating_sub(self.starting_frames.load(Ordering::Acquire))
    }

    pub fn audio_frames_this_session(&self) -> u64 {
        self.total_audio_frames().saturating_sub(self.starting_audio_frames.load(Ordering::Acquire))
    }

    fn capture_starting_frame_counts(&self) {
        self.starting_frames.store(self.total_frames(), Ordering::Release);
        self.starting_audio_frames.store(self.total_audio_frames(), Ordering::Release);
    }

    /// Packets currently held in the delay window, not yet forwarded to the
    /// sink (spec §3's `DelayBuffer`). Exposed the way a sink exposes
    /// `get_total_bytes`/`get_dropped_frames` — an observable queue depth
    /// for callers (a UI, a metrics exporter) rather than an internal.
    pub fn delayed_packet_count(&self) -> usize {
        self.delay_buffer.lock().len()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    fn set_last_error(&self, err: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(err.into());
    }

    fn emit(&self, signal: Signal) {
        self.signal_sink.emit(&self.id, signal);
    }

    /// Spec §4.1 `start()`.
    pub fn start(&self) -> Result<(), StopCode> {
        if self.active.load(Ordering::Acquire) {
            log::warn!("output {}: start() called while already active", self.id);
            return Err(StopCode::Error); // caller misuse: already active
        }

        if self.caps.contains(OutputCaps::SERVICE) {
            if let Some(service) = &self.service {
                service.initialize().map_err(|code| {
                    log::warn!("output {}: service initialize failed ({code})", self.id);
                    self.set_last_error("service initialize failed");
                    code
                })?;
            }
        }

        {
            let hookup = self.hookup.lock().unwrap();
            hookup.pair().map_err(|err| {
                log::warn!("output {}: encoder pairing failed ({err:?})", self.id);
                self.set_last_error("encoder pairing failed");
                StopCode::Error
            })?;
            // Size the interleaver from the encoders actually bound through
            // this hookup, not `OutputConfig::audio_track_count()` (the
            // format-override list length, which can disagree with the
            // real bind count) — a mismatch here would silently leave
            // extra tracks unrebased (spec §3's "zero rebase" invariant).
            if self.terminal_callback() == TerminalCallback::Interleaver {
                let audio_tracks = hookup.audio_track_count().max(1);
                *self.interleaver.lock() = InterleaverState::new(audio_tracks);
            }
            hookup.start_encoders()?;
        }

        let delayed = self.caps.contains(OutputCaps::ENCODED) && self.config.delay.is_active();
        if delayed {
            *self.phase.lock().unwrap() = Phase::DelayedStarting;
            self.delay_active.store(true, Ordering::Release);
            self.sink.start()?;
            self.emit(Signal::Starting);
            return Ok(());
        }

        self.emit(Signal::Starting);
        self.sink.start().map_err(|code| {
            log::warn!("output {}: sink start rejected ({code})", self.id);
            self.set_last_error("sink start rejected");
            code
        })?;

        *self.phase.lock().unwrap() = Phase::Active;
        self.capture_starting_frame_counts();
        self.active.store(true, Ordering::Release);
        self.data_active.store(true, Ordering::Release);
        self.activate_service();
        self.emit(Signal::Activate);
        self.emit(Signal::Start);
        log::info!("output {}: active", self.id);
        Ok(())
    }

    /// Promote a delayed-start output once the delay window has produced
    /// its first forwarded packet (spec §4.4).
    pub fn begin_delayed_capture(&self) {
        if *self.phase.lock().unwrap() != Phase::DelayedStarting {
            return;
        }
        *self.phase.lock().unwrap() = Phase::DelayedActive;
        self.capture_starting_frame_counts();
        self.delay_capturing.store(true, Ordering::Release);
        self.active.store(true, Ordering::Release);
        self.data_active.store(true, Ordering::Release);
        self.activate_service();
        self.emit(Signal::Activate);
        self.emit(Signal::Start);
    }

    /// Spec §6's Service contract: `activate`/`deactivate` bracket the
    /// output's own `data_active` window, mirrored around every
    /// `Signal::Activate`/`Signal::Deactivate` emission (spec §5: "signals
    /// observe happens-before w.r.t. the state flag they report").
    fn activate_service(&self) {
        if let Some(service) = &self.service {
            service.activate();
        }
    }

    fn deactivate_service(&self) {
        if let Some(service) = &self.service {
            service.deactivate();
        }
    }

    /// Spec §4.1 `stop()`.
    pub fn stop(&self) {
        let mut phase = self.phase.lock().unwrap();
        if *phase == Phase::Stopping {
            return; // already stopping: no-op
        }
        if self.reconnecting.load(Ordering::Acquire) {
            drop(phase);
            self.force_stop();
            return;
        }
        // Encoded-with-active-delay queues a delayed-stop (spec §4.1):
        // drain whatever is still sitting in the delay window before
        // telling the sink to stop, rather than dropping it on the floor.
        let delayed_stop = self.caps.contains(OutputCaps::ENCODED) && self.delay_active.load(Ordering::Acquire);
        *phase = Phase::Stopping;
        drop(phase);

        self.emit(Signal::Stopping);
        if delayed_stop {
            self.flush_delay_buffer();
        }
        self.sink.stop(now_ns());
        self.finalize_stop(StopCode::Success);
    }

    /// Forcibly drain every packet still held in the delay window and hand
    /// it to the sink, regardless of age (spec §4.1's delayed-stop path).
    fn flush_delay_buffer(&self) {
        let pending = self.delay_buffer.lock().drain_all();
        for pkt in pending {
            self.forward_to_sink(pkt);
        }
    }

    /// Spec §4.1 `force_stop()` — unconditional, non-blocking w.r.t. reconnect.
    pub fn force_stop(&self) {
        if let Some(worker) = self.reconnect_worker.lock().unwrap().take() {
            worker.cancel(); // abandoned, not joined — spec §9
        }
        self.reconnecting.store(false, Ordering::Release);

        if self.delay_active.swap(false, Ordering::AcqRel) {
            self.end_data_capture();
        }

        *self.phase.lock().unwrap() = Phase::Stopping;
        self.emit(Signal::Stopping);
        self.sink.stop(0);
        self.finalize_stop(StopCode::Success);
    }

    fn end_data_capture(&self) {
        let hookup = self.hookup.lock().unwrap();
        hookup.stop_encoders();
        self.data_active.store(false, Ordering::Release);
        self.deactivate_service();
        self.emit(Signal::Deactivate);
    }

    /// Terminal step of every stop path (`stop()`, `force_stop()`, a
    /// non-retryable `signal_stop()`, a reconnect budget exhausted in
    /// `schedule_reconnect`). Tears down data capture here if an earlier
    /// step on this particular path hasn't already done so (`signal_stop`'s
    /// retryable branch and `force_stop`'s delay-active branch both call
    /// `end_data_capture` themselves first, so `data_active` is already
    /// false by the time either reaches here) — every stop ends with
    /// encoders stopped and the service deactivated, not just the ones that
    /// happened to go through delay or reconnect first.
    fn finalize_stop(&self, code: StopCode) {
        if self.data_active.load(Ordering::Acquire) {
            self.end_data_capture();
        }
        log::info!("output {}: stopped ({code})", self.id);
        *self.stop_code.lock().unwrap() = code;
        self.active.store(false, Ordering::Release);
        self.data_active.store(false, Ordering::Release);
        self.delay_active.store(false, Ordering::Release);
        *self.phase.lock().unwrap() = Phase::Idle;
        self.emit(Signal::Stop {
            code,
            last_error: self.last_error(),
        });
        let (lock, cvar) = &self.stopping_event;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Blocks until a `stop()`/`force_stop()` call finishes tearing down
    /// (spec §5's suspension point).
    pub fn wait_for_stop(&self) {
        let (lock, cvar) = &self.stopping_event;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }

    /// Spec §4.1 `pause(bool)`.
    pub fn pause(&self, want_paused: bool) -> Result<(), PauseError> {
        if !self.caps.contains(OutputCaps::CAN_PAUSE) {
            return Err(PauseError::NotCapable);
        }
        if !self.active.load(Ordering::Acquire) {
            return Err(PauseError::NotActive);
        }
        if self.paused.load(Ordering::Acquire) == want_paused {
            return Err(PauseError::AlreadyInRequestedState);
        }

        let now = now_ns();
        let frame_interval = self.video_frame_interval_ns();
        if want_paused {
            self.pause_state.begin(now, frame_interval).map_err(|_| PauseError::AlreadyInRequestedState)?;
        } else {
            self.pause_state.end(now, frame_interval).map_err(|_| PauseError::AlreadyInRequestedState)?;
        }
        self.paused.store(want_paused, Ordering::Release);
        self.emit(if want_paused { Signal::Pause } else { Signal::Unpause });
        Ok(())
    }

    fn video_frame_interval_ns(&self) -> i64 {
        // Bound outputs always have a known video timebase once started;
        // 30fps is the engine-wide default absent a bound video encoder.
        mediaout_core::time::frame_interval_usec(1, 30, 1) * 1000
    }

    /// Whether `code` permits a reconnect attempt (spec §4.1's `can_reconnect`).
    pub fn can_reconnect(&self, code: StopCode) -> bool {
        let already_reconnecting = self.reconnecting.load(Ordering::Acquire);
        (code.is_disconnect() && self.config.reconnect.max_retries > 0)
            || (already_reconnecting && code != StopCode::Success)
    }

    /// Spec §4.1 `signal_stop(code)` — called by the sink on disconnect or
    /// normal completion.
    pub fn signal_stop(&self, code: StopCode) {
        if self.can_reconnect(code) {
            if self.delay_active.load(Ordering::Acquire) {
                self.delay_capturing.store(false, Ordering::Release);
                // Spec §4.4: PRESERVE keeps the buffer across reconnect (a
                // no-op here); otherwise it's flushed and discarded so the
                // delay window restarts empty once capture resumes.
                let dropped = self.delay_buffer.lock().drain_on_disconnect();
                if !dropped.is_empty() {
                    log::debug!(
                        "output {}: dropped {} delayed packet(s) on disconnect (preserve disabled)",
                        self.id,
                        dropped.len()
                    );
                }
            }
            self.end_data_capture();
            self.schedule_reconnect();
        } else {
            *self.phase.lock().unwrap() = Phase::Stopping;
            self.finalize_stop(code);
        }
    }

    fn schedule_reconnect(&self) {
        let attempt = self.reconnect_retries.load(Ordering::Acquire);
        if attempt >= self.config.reconnect.max_retries {
            log::warn!("output {}: reconnect budget exhausted, giving up", self.id);
            self.reconnecting.store(false, Ordering::Release);
            self.delay_active.store(false, Ordering::Release);
            self.finalize_stop(StopCode::Disconnected);
            return;
        }

        self.reconnecting.store(true, Ordering::Release);
        *self.phase.lock().unwrap() = Phase::Reconnecting;
        self.reconnect_retries.fetch_add(1, Ordering::AcqRel);

        let delay_ms = compute_backoff_ms(
            attempt,
            self.config.reconnect.base_delay_secs,
            self.reconnect_jittered_exponent,
        );
        log::info!("output {}: reconnecting in {delay_ms:.0}ms (attempt {attempt})", self.id);
        self.emit(Signal::Reconnect {
            timeout_sec: (delay_ms / 1000.0).round() as u32,
        });

        let weak = self
            .self_weak
            .lock()
            .unwrap()
            .clone()
            .expect("self_weak set by Output::create before any caller sees this Output");
        let worker = ReconnectWorker::spawn(delay_ms, move || {
            if let Some(output) = weak.upgrade() {
                let _ = output.start_actual();
            }
        });
        *self.reconnect_worker.lock().unwrap() = Some(worker);
    }

    /// Internal restart path used by the reconnect worker's timeout
    /// callback (spec §4.6's `start_actual`): bypasses the delayed-start
    /// re-entry check since a reconnecting output was already active once.
    pub fn start_actual(&self) -> Result<(), StopCode> {
        if !self.reconnecting.load(Ordering::Acquire) {
            return Ok(()); // already cancelled/stopped
        }
        let result = {
            let hookup = self.hookup.lock().unwrap();
            hookup.start_encoders()
        };
        match result {
            Ok(()) => match self.sink.start() {
                Ok(()) => {
                    log::info!("output {}: reconnected", self.id);
                    self.reconnecting.store(false, Ordering::Release);
                    self.reconnect_retries.store(0, Ordering::Release);
                    *self.phase.lock().unwrap() = Phase::Active;
                    self.capture_starting_frame_counts();
                    self.active.store(true, Ordering::Release);
                    self.data_active.store(true, Ordering::Release);
                    self.activate_service();
                    self.emit(Signal::ReconnectSuccess);
                    self.emit(Signal::Activate);
                    Ok(())
                }
                Err(code) => {
                    log::warn!("output {}: reconnect attempt failed ({code})", self.id);
                    self.schedule_reconnect();
                    Err(code)
                }
            },
            Err(code) => {
                log::warn!("output {}: reconnect encoder restart failed ({code})", self.id);
                self.schedule_reconnect();
                Err(code)
            }
        }
    }

    /// Encoded-packet ingestion (spec §4.2 + §4.5 + §4.4 pipeline, driven
    /// from an encoder callback thread). `pkt` must already be tagged with
    /// its resolved `track_idx` (spec §4.2 step 1 — the caller's hookup
    /// layer owns encoder identity, this type does not).
    ///
    /// Only routes through the packet interleaver when the output's
    /// terminal callback is `Interleaver` (spec §4.7: encoded+video+audio).
    /// A single-track encoded output (e.g. video-only) has no opposing
    /// track to wait for, so it would never emit anything if it went
    /// through the cross-track alignment algorithm — it takes the per-type
    /// default path straight to caption injection / delay / sink instead.
    pub fn push_encoded_packet(&self, pkt: EncoderPacket) {
        match self.terminal_callback() {
            TerminalCallback::Interleaver => {
                let ready = self.interleaver.lock().push_packet(pkt);
                for pkt in ready {
                    self.emit_encoded_packet(pkt);
                }
            }
            TerminalCallback::PerTypeDefault => self.emit_encoded_packet(pkt),
        }
    }

    /// Shared tail of the encoded pipeline once a packet's cross-track
    /// ordering (if any) is settled: bookkeeping, caption injection, the
    /// delay window, then the sink (spec §4.2 step 8, §4.4, §4.5).
    fn emit_encoded_packet(&self, mut pkt: EncoderPacket) {
        let is_video = pkt.kind == mediaout_core::PacketType::Video;
        if is_video {
            self.total_frames.fetch_add(1, Ordering::AcqRel);
            self.pause_state.set_last_video_ts(pkt.dts_usec());
        } else {
            self.total_audio_frames.fetch_add(1, Ordering::AcqRel);
        }

        let frame_ts = pkt.pts_secs();
        self.caption_queue.lock().maybe_inject(&mut pkt, frame_ts);

        if self.delay_active.load(Ordering::Acquire) {
            let forwarded = self.delay_buffer.lock().push(pkt);
            if !forwarded.is_empty() {
                // First packet to clear the delay window promotes a
                // `DelayedStarting` output to `DelayedActive` (spec §4.4):
                // a no-op once already promoted, since `begin_delayed_capture`
                // checks the phase itself.
                self.begin_delayed_capture();
            }
            for pkt in forwarded {
                self.forward_to_sink(pkt);
            }
        } else {
            self.forward_to_sink(pkt);
        }
    }

    fn forward_to_sink(&self, pkt: EncoderPacket) {
        self.emit(Signal::Writing);
        match self.sink.encoded_packet(&pkt) {
            Ok(()) => self.emit(Signal::Wrote),
            Err(code) => self.report_write_error(code),
        }
    }

    fn report_write_error(&self, code: StopCode) {
        log::warn!("output {}: sink write failed ({code})", self.id);
        self.set_last_error(format!("sink write failed: {code}"));
        self.emit(Signal::WritingError { msg: code.to_string() });
    }

    /// Raw video ingestion (spec §2's raw path: `Source → per-frame
    /// callback → Pause filter → Sink`). `ts_offset` (spec §3/§8 property 4)
    /// is added to the raw timestamp before it reaches the sink so that
    /// frames after a pause/resume cycle land at `raw_ts + ts_offset`, not
    /// at their original wall-clock position.
    pub fn push_raw_video(&self, data: &[u8], width: u32, height: u32, pts_ns: i64) {
        self.pause_state.set_last_video_ts(pts_ns);
        if self.pause_state.pause_check(pts_ns) {
            return;
        }
        let adjusted_ts = pts_ns + self.pause_state.ts_offset();
        if let Err(code) = self.sink.raw_video(data, width, height, adjusted_ts) {
            self.report_write_error(code);
        }
    }

    /// Raw audio ingestion (spec §4.7): only mixes set in the output's
    /// `mixer_mask` are forwarded. Sinks declaring `MULTI_TRACK` see the
    /// originating mix index; single-track sinks only ever receive mix 0
    /// (spec §6's `raw_audio`/`raw_audio[2]` distinction). Timestamps get
    /// the same pause `ts_offset` adjustment as raw video (spec §8
    /// property 4).
    pub fn push_raw_audio(&self, mix_idx: usize, data: &[u8], pts_ns: i64) {
        if !self.config.wants_mix(mix_idx) {
            return;
        }
        if self.pause_state.pause_check(pts_ns) {
            return;
        }
        let routed_idx = if self.caps.contains(OutputCaps::MULTI_TRACK) { mix_idx } else { 0 };
        let adjusted_ts = pts_ns + self.pause_state.ts_offset();
        if let Err(code) = self.sink.raw_audio(routed_idx, data, adjusted_ts) {
            self.report_write_error(code);
        }
    }

    pub fn terminal_callback(&self) -> TerminalCallback {
        terminal_callback(self.caps)
    }

    /// Queue a caption line for display on the next eligible video frame,
    /// with the default 2-second display duration (spec §6's "Caption
    /// input": line-oriented text API).
    pub fn push_caption_text(&self, text: impl Into<String>) {
        self.caption_queue.lock().push_text(text);
    }

    pub fn push_caption_text_with_duration(&self, text: impl Into<String>, display_duration_secs: f64) {
        self.caption_queue.lock().push_text_with_duration(text, display_duration_secs);
    }

    /// Queue one already-encoded CEA-708 `cc_data` triple (spec §6's
    /// "Caption input": byte triple queue).
    pub fn push_caption_triple(&self, triple: [u8; 3]) {
        self.caption_queue.lock().push_raw_triple(triple);
    }
}

fn now_ns() -> i64 {
    // Caller-supplied clock per DESIGN.md: `std::time::Instant`/`SystemTime`
    // are not available in a way that round-trips through tests
    // deterministically, and this engine never needs wall-clock semantics
    // beyond "pass the current instant through to the sink" — callers that
    // need simulated time inject it by constructing packets/calls directly
    // rather than going through this helper.
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaout_core::signal::{NullSignalSink, RecordingSignalSink};
    use std::sync::Arc;

    struct FakeSink {
        caps: OutputCaps,
        started: std::sync::atomic::AtomicBool,
    }

    impl Sink for FakeSink {
        fn caps(&self) -> OutputCaps {
            self.caps
        }
        fn start(&self) -> Result<(), StopCode> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&self, _end_ts_ns: i64) {
            self.started.store(false, Ordering::SeqCst);
        }
    }

    fn make_output(caps: OutputCaps, signal_sink: Arc<dyn SignalSink>) -> StrongRef<Output> {
        let config = OutputConfig::new("out-1", "test", caps);
        Output::create(
            config,
            Box::new(FakeSink {
                caps,
                started: std::sync::atomic::AtomicBool::new(false),
            }),
            None,
            signal_sink,
        )
        .unwrap()
    }

    #[test]
    fn start_transitions_to_active_and_emits_signals() {
        let sink = Arc::new(RecordingSignalSink::new());
        let out = make_output(OutputCaps::VIDEO, sink.clone());
        out.start().unwrap();
        assert!(out.is_active());
        assert_eq!(out.phase(), Phase::Active);
        let events = sink.events();
        assert!(events.iter().any(|(_, s)| *s == Signal::Start));
    }

    #[test]
    fn double_start_is_rejected() {
        let out = make_output(OutputCaps::VIDEO, Arc::new(NullSignalSink));
        out.start().unwrap();
        assert!(out.start().is_err());
    }

    #[test]
    fn stop_is_idempotent() {
        let out = make_output(OutputCaps::VIDEO, Arc::new(NullSignalSink));
        out.start().unwrap();
        out.stop();
        assert!(!out.is_active());
        out.stop(); // no-op, not a panic
    }

    #[test]
    fn pause_requires_can_pause_cap() {
        let out = make_output(OutputCaps::VIDEO, Arc::new(NullSignalSink));
        out.start().unwrap();
        assert_eq!(out.pause(true), Err(PauseError::NotCapable));
    }

    #[test]
    fn pause_requires_active_output() {
        let out = make_output(OutputCaps::VIDEO | OutputCaps::CAN_PAUSE, Arc::new(NullSignalSink));
        assert_eq!(out.pause(true), Err(PauseError::NotActive));
    }

    #[test]
    fn pause_then_unpause_round_trips() {
        let out = make_output(OutputCaps::VIDEO | OutputCaps::CAN_PAUSE, Arc::new(NullSignalSink));
        out.start().unwrap();
        out.pause(true).unwrap();
        assert!(out.is_paused());
        out.pause(false).unwrap();
        assert!(!out.is_paused());
    }

    struct RawVideoRecordingSink {
        caps: OutputCaps,
        received: Arc<Mutex<Vec<i64>>>,
    }

    impl Sink for RawVideoRecordingSink {
        fn caps(&self) -> OutputCaps {
            self.caps
        }
        fn start(&self) -> Result<(), StopCode> {
            Ok(())
        }
        fn stop(&self, _end_ts_ns: i64) {}
        fn raw_video(&self, _data: &[u8], _width: u32, _height: u32, pts_ns: i64) -> Result<(), StopCode> {
            self.received.lock().unwrap().push(pts_ns);
            Ok(())
        }
    }

    /// Spec §8 property 4: a raw frame pushed after a pause/resume cycle
    /// must reach the sink at `raw_ts + ts_offset`, not at its original
    /// timestamp. Drives `pause_state` directly with fixed `now` values
    /// (rather than `Output::pause`, which reads the real clock) so the
    /// accumulated offset is deterministic.
    #[test]
    fn raw_video_timestamp_carries_pause_offset() {
        let caps = OutputCaps::VIDEO | OutputCaps::CAN_PAUSE;
        let received = Arc::new(Mutex::new(Vec::new()));
        let out = Output::create(
            OutputConfig::new("out-1", "test", caps),
            Box::new(RawVideoRecordingSink { caps, received: received.clone() }),
            None,
            Arc::new(NullSignalSink),
        )
        .unwrap();
        out.start().unwrap();

        out.pause_state.set_last_video_ts(0);
        out.pause_state.begin(0, 1000).unwrap();
        out.pause_state.end(5_000, 1000).unwrap();
        let offset = out.pause_state.ts_offset();
        assert!(offset > 0);

        out.push_raw_video(&[], 1, 1, 10_000);
        assert_eq!(received.lock().unwrap()[0], 10_000 + offset);
    }

    #[test]
    fn disconnected_without_reconnect_budget_finalizes_stop() {
        let sink = Arc::new(RecordingSignalSink::new());
        let mut config = OutputConfig::new("out-1", "test", OutputCaps::VIDEO);
        config.reconnect.max_retries = 0;
        let out = Output::create(
            config,
            Box::new(FakeSink {
                caps: OutputCaps::VIDEO,
                started: std::sync::atomic::AtomicBool::new(false),
            }),
            None,
            sink.clone(),
        )
        .unwrap();
        out.start().unwrap();
        out.signal_stop(StopCode::Disconnected);
        assert!(!out.is_active());
        assert!(!out.is_reconnecting());
    }

    /// S5-adjacent property (spec §8 property 5): with an active delay and
    /// `PRESERVE_ON_DISCONNECT`, a disconnect leaves buffered packets intact
    /// for delivery after reconnect; without it, they're flushed.
    #[test]
    fn delay_buffer_preserve_on_disconnect_keeps_packets() {
        let mut config = OutputConfig::new("out-1", "test", OutputCaps::VIDEO | OutputCaps::ENCODED);
        config.delay.seconds = 10;
        config.delay.preserve_on_disconnect = true;
        let out = Output::create(
            config,
            Box::new(FakeSink { caps: OutputCaps::VIDEO | OutputCaps::ENCODED, started: std::sync::atomic::AtomicBool::new(false) }),
            None,
            Arc::new(NullSignalSink),
        )
        .unwrap();
        out.start().unwrap(); // delayed-start path: delay_active true, not yet capturing

        let pkt = |usec: i64| {
            EncoderPacket::new(mediaout_core::PacketType::Video, 0, usec, usec, 1, 1_000_000, true, 0, Arc::from(vec![0u8]))
        };
        out.push_encoded_packet(pkt(0));
        out.push_encoded_packet(pkt(1_000_000));
        assert_eq!(out.delayed_packet_count(), 2);

        out.signal_stop(StopCode::Disconnected);
        assert!(out.is_reconnecting());
        assert_eq!(out.delayed_packet_count(), 2, "preserve_on_disconnect must keep buffered packets");
    }

    #[test]
    fn delay_buffer_without_preserve_flushes_on_disconnect() {
        let mut config = OutputConfig::new("out-1", "test", OutputCaps::VIDEO | OutputCaps::ENCODED);
        config.delay.seconds = 10;
        config.delay.preserve_on_disconnect = false;
        let out = Output::create(
            config,
            Box::new(FakeSink { caps: OutputCaps::VIDEO | OutputCaps::ENCODED, started: std::sync::atomic::AtomicBool::new(false) }),
            None,
            Arc::new(NullSignalSink),
        )
        .unwrap();
        out.start().unwrap();

        let pkt = |usec: i64| {
            EncoderPacket::new(mediaout_core::PacketType::Video, 0, usec, usec, 1, 1_000_000, true, 0, Arc::from(vec![0u8]))
        };
        out.push_encoded_packet(pkt(0));
        out.push_encoded_packet(pkt(1_000_000));
        assert_eq!(out.delayed_packet_count(), 2);

        out.signal_stop(StopCode::Disconnected);
        assert!(out.is_reconnecting());
        assert_eq!(out.delayed_packet_count(), 0, "without preserve the buffer must flush on disconnect");
    }

    #[test]
    fn session_frame_counts_reset_on_reconnect() {
        let out = make_output(OutputCaps::VIDEO | OutputCaps::ENCODED, Arc::new(NullSignalSink));
        out.start().unwrap();
        let pkt = |dts: i64| {
            EncoderPacket::new(mediaout_core::PacketType::Video, 0, dts, dts, 1, 30, true, 0, Arc::from(vec![0u8]))
        };
        out.push_encoded_packet(pkt(0));
        out.push_encoded_packet(pkt(33));
        assert_eq!(out.total_frames(), 2);
        assert_eq!(out.frames_this_session(), 2);

        out.signal_stop(StopCode::Disconnected);
        assert!(out.is_reconnecting());
        out.start_actual().unwrap();
        // total_frames carries across reconnect; the session counter resets.
        assert_eq!(out.total_frames(), 2);
        assert_eq!(out.frames_this_session(), 0);
    }

    struct RecordingService {
        activated: Arc<AtomicBool>,
        deactivated: Arc<AtomicBool>,
    }

    impl Service for RecordingService {
        fn initialize(&self) -> Result<(), StopCode> {
            Ok(())
        }
        fn activate(&self) {
            self.activated.store(true, Ordering::SeqCst);
        }
        fn deactivate(&self) {
            self.deactivated.store(true, Ordering::SeqCst);
        }
        fn url(&self) -> &str {
            "test://"
        }
    }

    #[test]
    fn service_activate_and_deactivate_bracket_data_capture() {
        let caps = OutputCaps::VIDEO | OutputCaps::SERVICE;
        let activated = Arc::new(AtomicBool::new(false));
        let deactivated = Arc::new(AtomicBool::new(false));
        let out = Output::create(
            OutputConfig::new("out-1", "test", caps),
            Box::new(FakeSink { caps, started: std::sync::atomic::AtomicBool::new(false) }),
            Some(Box::new(RecordingService { activated: activated.clone(), deactivated: deactivated.clone() })),
            Arc::new(NullSignalSink),
        )
        .unwrap();

        out.start().unwrap();
        assert!(activated.load(Ordering::SeqCst));
        assert!(!deactivated.load(Ordering::SeqCst));

        out.force_stop();
        assert!(deactivated.load(Ordering::SeqCst));
    }

    struct EncodedPacketRecordingSink {
        caps: OutputCaps,
        received: Arc<Mutex<Vec<EncoderPacket>>>,
    }

    impl Sink for EncodedPacketRecordingSink {
        fn caps(&self) -> OutputCaps {
            self.caps
        }
        fn start(&self) -> Result<(), StopCode> {
            Ok(())
        }
        fn stop(&self, _end_ts_ns: i64) {}
        fn encoded_packet(&self, packet: &EncoderPacket) -> Result<(), StopCode> {
            self.received.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    #[test]
    fn pushed_caption_text_is_injected_into_next_video_packet() {
        let caps = OutputCaps::VIDEO | OutputCaps::ENCODED;
        let received = Arc::new(Mutex::new(Vec::new()));
        let out = Output::create(
            OutputConfig::new("out-1", "test", caps),
            Box::new(EncodedPacketRecordingSink { caps, received: received.clone() }),
            None,
            Arc::new(NullSignalSink),
        )
        .unwrap();
        out.start().unwrap();
        out.push_caption_text_with_duration("HELLO", 2.0);

        let pkt = EncoderPacket::new(mediaout_core::PacketType::Video, 0, 10, 10, 1, 1, true, 0, Arc::from(vec![1u8, 2, 3]));
        let original_len = pkt.data.len();
        out.push_encoded_packet(pkt);

        let forwarded = received.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].data.len() > original_len, "caption SEI must be appended to the packet");
    }

    #[test]
    fn encoded_video_and_audio_output_routes_through_interleaver() {
        let caps = OutputCaps::VIDEO | OutputCaps::AUDIO | OutputCaps::ENCODED;
        let out = make_output(caps, Arc::new(NullSignalSink));
        assert_eq!(out.terminal_callback(), TerminalCallback::Interleaver);
        out.start().unwrap();

        let video = |dts: i64| {
            EncoderPacket::new(mediaout_core::PacketType::Video, 0, dts, dts, 1, 30, dts == 0, 0, Arc::from(vec![0u8]))
        };
        let audio = |dts: i64| {
            EncoderPacket::new(mediaout_core::PacketType::Audio, 0, dts, dts, 1, 1000, false, 0, Arc::from(vec![0u8]))
        };

        // Nothing emitted until both streams have been observed (spec §8
        // property 7) — only video so far.
        out.push_encoded_packet(video(0));
        out.push_encoded_packet(video(33));
        assert_eq!(out.total_frames(), 0);

        out.push_encoded_packet(audio(0));
        // Third packet forces emission of the earlier, now-settled ones.
        out.push_encoded_packet(video(66));
        assert!(out.total_frames() > 0 || out.total_audio_frames() > 0);
    }

    #[test]
    fn disconnect_with_reconnect_budget_enters_reconnecting_phase() {
        let out = make_output(OutputCaps::VIDEO, Arc::new(NullSignalSink));
        out.start().unwrap();
        out.signal_stop(StopCode::Disconnected);
        assert!(out.is_reconnecting());
        assert_eq!(out.phase(), Phase::Reconnecting);
        out.force_stop();
        assert!(!out.is_reconnecting());
    }

    struct SharedRawAudioSink {
        caps: OutputCaps,
        received: Arc<Mutex<Vec<(usize, i64)>>>,
    }

    impl Sink for SharedRawAudioSink {
        fn caps(&self) -> OutputCaps {
            self.caps
        }
        fn start(&self) -> Result<(), StopCode> {
            Ok(())
        }
        fn stop(&self, _end_ts_ns: i64) {}
        fn raw_audio(&self, mix_idx: usize, _data: &[u8], pts_ns: i64) -> Result<(), StopCode> {
            self.received.lock().unwrap().push((mix_idx, pts_ns));
            Ok(())
        }
    }

    #[test]
    fn single_track_sink_collapses_mix_index_to_zero() {
        let caps = OutputCaps::AUDIO; // no MULTI_TRACK
        let mut config = OutputConfig::new("out-1", "test", caps);
        config.mixer_mask = 0b0000_0101; // mixes 0 and 2
        let received = Arc::new(Mutex::new(Vec::new()));
        let out = Output::create(
            config,
            Box::new(SharedRawAudioSink { caps, received: received.clone() }),
            None,
            Arc::new(NullSignalSink),
        )
        .unwrap();

        out.push_raw_audio(0, &[0u8], 0);
        out.push_raw_audio(1, &[0u8], 1); // dropped: not in mixer_mask
        out.push_raw_audio(2, &[0u8], 2);

        let calls = received.lock().unwrap().clone();
        assert_eq!(calls, vec![(0, 0), (0, 2)]); // both routed to mix 0
    }

    #[test]
    fn multi_track_sink_preserves_mix_index() {
        let caps = OutputCaps::AUDIO | OutputCaps::MULTI_TRACK;
        let mut config = OutputConfig::new("out-1", "test", caps);
        config.mixer_mask = 0b0000_0101; // mixes 0 and 2
        let received = Arc::new(Mutex::new(Vec::new()));
        let out = Output::create(
            config,
            Box::new(SharedRawAudioSink { caps, received: received.clone() }),
            None,
            Arc::new(NullSignalSink),
        )
        .unwrap();

        out.push_raw_audio(0, &[0u8], 0);
        out.push_raw_audio(1, &[0u8], 1); // dropped: not in mixer_mask
        out.push_raw_audio(2, &[0u8], 2);

        let calls = received.lock().unwrap().clone();
        assert_eq!(calls, vec![(0, 0), (2, 2)]);
    }
}
