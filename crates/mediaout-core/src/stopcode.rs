// crates/mediaout-core/src/stopcode.rs
//
// Stop codes a sink reports through `signal_stop` (spec §4.1, §6).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCode {
    Success,
    BadPath,
    ConnectFailed,
    InvalidStream,
    Error,
    Disconnected,
    Unsupported,
    NoSpace,
    EncodeError,
    HdrDisabled,
}

impl StopCode {
    /// Whether this code, on its own (ignoring `reconnect_max` and whether a
    /// reconnect attempt is already underway), is the kind that ever permits
    /// a retry. Spec §4.1's `can_reconnect` combines this with
    /// `reconnect_max > 0` and the "already reconnecting" carve-out — those
    /// live in `Output::can_reconnect` since they need config/state this
    /// type doesn't carry.
    pub fn is_disconnect(self) -> bool {
        matches!(self, StopCode::Disconnected)
    }
}

impl std::fmt::Display for StopCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
