// crates/mediaout-core/src/delay.rs
//
// Time-windowed delay buffer (spec §4.4). Sits downstream of the
// interleaver: every packet handed to the sink passes through here first,
// held until its age exceeds `DelayConfig::seconds`.

use std::collections::VecDeque;

use crate::config::DelayConfig;
use crate::packet::EncoderPacket;

pub struct DelayBuffer {
    config: DelayConfig,
    buffer: VecDeque<EncoderPacket>,
    window_usec: i64,
}

impl DelayBuffer {
    pub fn new(config: DelayConfig) -> Self {
        let window_usec = config.seconds as i64 * 1_000_000;
        Self {
            config,
            buffer: VecDeque::new(),
            window_usec,
        }
    }

    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// Push one packet in and pop every packet whose age now exceeds the
    /// configured window, oldest first. With delay disabled, the packet
    /// passes straight through.
    pub fn push(&mut self, pkt: EncoderPacket) -> Vec<EncoderPacket> {
        if !self.is_active() {
            return vec![pkt];
        }
        let newest_ts = pkt.dts_usec();
        self.buffer.push_back(pkt);

        let mut ready = Vec::new();
        while let Some(front) = self.buffer.front() {
            if newest_ts - front.dts_usec() >= self.window_usec {
                ready.push(self.buffer.pop_front().unwrap());
            } else {
                break;
            }
        }
        ready
    }

    /// Drain the buffer on disconnect (spec §4.4): if `preserve_on_disconnect`
    /// is set, the buffered packets are returned so the caller can hand them
    /// to the sink before stopping (preserving the promised delay on
    /// reconnect); otherwise they are discarded and the delay restarts empty.
    pub fn drain_on_disconnect(&mut self) -> Vec<EncoderPacket> {
        if self.config.preserve_on_disconnect {
            self.buffer.drain(..).collect()
        } else {
            self.buffer.clear();
            Vec::new()
        }
    }

    /// Forcibly flush every buffered packet regardless of age (spec §4.1's
    /// delayed-stop path: `stop()` drains the window before calling the
    /// sink's `stop` rather than discarding whatever hasn't aged out yet).
    pub fn drain_all(&mut self) -> Vec<EncoderPacket> {
        self.buffer.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use std::sync::Arc;

    fn pkt(usec: i64) -> EncoderPacket {
        EncoderPacket::new(PacketType::Video, 0, usec, usec, 1, 1_000_000, true, 0, Arc::from(vec![0u8]))
    }

    #[test]
    fn inactive_delay_passes_through_immediately() {
        let mut d = DelayBuffer::new(DelayConfig { seconds: 0, preserve_on_disconnect: false });
        assert!(!d.is_active());
        let out = d.push(pkt(0));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn active_delay_holds_until_window_elapses() {
        let mut d = DelayBuffer::new(DelayConfig { seconds: 2, preserve_on_disconnect: false });
        assert!(d.push(pkt(0)).is_empty());
        assert!(d.push(pkt(1_000_000)).is_empty());
        let out = d.push(pkt(2_000_000));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dts_usec(), 0);
    }

    #[test]
    fn disconnect_without_preserve_discards_buffer() {
        let mut d = DelayBuffer::new(DelayConfig { seconds: 5, preserve_on_disconnect: false });
        d.push(pkt(0));
        d.push(pkt(1_000_000));
        let drained = d.drain_on_disconnect();
        assert!(drained.is_empty());
        assert!(d.is_empty());
    }

    #[test]
    fn disconnect_with_preserve_returns_buffered_packets() {
        let mut d = DelayBuffer::new(DelayConfig { seconds: 5, preserve_on_disconnect: true });
        d.push(pkt(0));
        d.push(pkt(1_000_000));
        let drained = d.drain_on_disconnect();
        assert_eq!(drained.len(), 2);
        assert!(d.is_empty());
    }

    #[test]
    fn drain_all_flushes_regardless_of_preserve_flag() {
        let mut d = DelayBuffer::new(DelayConfig { seconds: 5, preserve_on_disconnect: false });
        d.push(pkt(0));
        d.push(pkt(1_000_000));
        let drained = d.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(d.is_empty());
    }
}
