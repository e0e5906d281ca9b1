//! What the stack needs from the machine: a NIC that moves whole Ethernet
//! frames, and a millisecond clock.

use crate::protocol::ethernet::Address as MacAddress;
use crate::Result;

/// Largest frame the stack builds or accepts.
pub const MAX_PACKET_SIZE: usize = 2048;

/// A network interface moving raw Ethernet frames.
pub trait Device {
    /// Transmit `frame` as exactly one frame.
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;

    /// Wait for the next frame, copy it into `buffer` and return its length.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Whether a received frame is waiting, without blocking.
    fn available(&mut self) -> bool;

    /// The burned-in address of the interface.
    fn mac_address(&self) -> MacAddress;
}

/// A monotonically increasing millisecond counter.
///
/// The counter is allowed to wrap. Waits measure against an absolute
/// deadline, so a wait that spans the wrap ends early.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Absolute point in time at which a bounded wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(u32);

impl Deadline {
    pub fn after<C: Clock>(clock: &C, budget_ms: u32) -> Deadline {
        Deadline(clock.now_ms().wrapping_add(budget_ms))
    }

    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        clock.now_ms() >= self.0
    }
}
