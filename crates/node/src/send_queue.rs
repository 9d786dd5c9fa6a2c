//! Per-node upload slot.

use blocksim_core::OutboundBlock;
use std::collections::VecDeque;

/// Block uploads waiting for the node's single upload slot, plus the
/// in-flight count used when uploads share bandwidth instead.
#[derive(Debug, Clone, Default)]
pub struct SendQueue {
    pending: VecDeque<OutboundBlock>,
    sending: bool,
    in_flight: u32,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a serial upload.
    ///
    /// Returns the upload to start now if the slot was idle.
    pub fn push(&mut self, outbound: OutboundBlock) -> Option<OutboundBlock> {
        self.pending.push_back(outbound);
        if self.sending {
            None
        } else {
            self.next()
        }
    }

    /// Hand the slot to the next queued upload, or mark it idle.
    pub fn next(&mut self) -> Option<OutboundBlock> {
        let next = self.pending.pop_front();
        self.sending = next.is_some();
        next
    }

    /// Start a bandwidth-sharing upload. Returns how many are now in flight.
    pub fn start_shared(&mut self) -> u32 {
        self.in_flight += 1;
        self.in_flight
    }

    pub fn finish_shared(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }
}
