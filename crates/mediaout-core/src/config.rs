// crates/mediaout-core/src/config.rs
//
// Serialized configuration types, in the same role `ProjectState` and
// `TimelineClip` play in the teacher (`velocut-core/src/state.rs`):
// `#[serde(default = "...")]` on fields that gained a default after the
// initial shape, `#[serde(skip)]` on fields that are runtime-only and never
// round-trip through settings.

use serde::{Deserialize, Serialize};

use crate::caps::OutputCaps;
use crate::packet::MAX_MIXES;

/// Exponential-backoff cap (spec §4.6): 15 minutes.
pub const RECONNECT_DELAY_CAP_SECS: f64 = 15.0 * 60.0;

fn default_exponent() -> f64 {
    1.5
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 0 disables reconnection entirely (spec §4.1's `can_reconnect`).
    pub max_retries: u32,
    pub base_delay_secs: f64,
    #[serde(default = "default_exponent")]
    pub exponent: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            base_delay_secs: 2.0,
            exponent: default_exponent(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub seconds: u32,
    pub preserve_on_disconnect: bool,
}

impl DelayConfig {
    pub fn is_active(&self) -> bool {
        self.seconds > 0
    }
}

/// Per-track format conversion override (spec §3's "video/audio format
/// conversion overrides"). `None` fields mean "use the encoder's native
/// format"; only non-default fields are set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatOverride {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
}

/// The serializable shape of an `Output` (spec §3). Runtime-only fields
/// (counters, last error, current bound handles) live on the `Output`
/// struct in `mediaout-engine`, not here — this is what a caller passes to
/// `Output::create` and what a settings UI would persist.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    pub id: String,
    pub name: String,
    pub caps: OutputCaps,
    #[serde(default)]
    pub scaled_size: Option<(u32, u32)>,
    #[serde(default)]
    pub video_override: FormatOverride,
    #[serde(default)]
    pub audio_overrides: Vec<FormatOverride>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    /// Bitmask of audio mixer indices this output should pull raw audio
    /// from (spec §4.7: "Raw audio uses the configured per-mixer bitmask").
    /// Bit `i` set means mix `i` is fed to the sink. Defaults to mix 0 only.
    #[serde(default = "default_mixer_mask")]
    pub mixer_mask: u32,
}

fn default_mixer_mask() -> u32 {
    1
}

impl OutputConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, caps: OutputCaps) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            caps,
            scaled_size: None,
            video_override: FormatOverride::default(),
            audio_overrides: Vec::new(),
            reconnect: ReconnectConfig::default(),
            delay: DelayConfig::default(),
            mixer_mask: default_mixer_mask(),
        }
    }

    /// Whether raw audio from mix `idx` should be pulled into this output
    /// (spec §4.7's `mixer_mask`).
    pub fn wants_mix(&self, idx: usize) -> bool {
        idx < 32 && self.mixer_mask & (1 << idx) != 0
    }

    /// Number of bound audio mixes this config expects, clamped to `MAX_MIXES`.
    pub fn audio_track_count(&self) -> usize {
        self.audio_overrides.len().min(MAX_MIXES)
    }
}
