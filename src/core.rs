//! Defines the "data contract" between the per-vehicle message tables and the
//! communication core.
//!
//! The tables are generated outside this crate: each transmitted message is a
//! [`PackEntry`], each received message an [`UnpackEntry`]. The transmit
//! scheduler and the receive dispatcher only ever see these descriptors.
use embedded_can::Id;

pub use crate::protocol::transport::can_frame::MessageId;

/// Fills a zeroed payload for the given rolling counter.
///
/// Returns `false` when the message is not sent this cycle (multiplexed
/// signals). The scheduler discards the payload in that case.
pub type PackFn = fn(payload: &mut [u8; 8], rolling_counter: u8) -> bool;

/// Consumes the payload of a received message.
pub type UnpackFn = fn(payload: &[u8; 8]);

/// One transmitted message of a periodic group.
#[derive(Clone, Copy, Debug)]
pub struct PackEntry {
    pub pack: PackFn,
    pub id: MessageId,
    /// Data Length Code, 0 to 8.
    pub len: u8,
}

impl PackEntry {
    pub const fn new(id: MessageId, len: u8, pack: PackFn) -> Self {
        Self { pack, id, len }
    }
}

/// One received message of a bus table.
#[derive(Clone, Copy, Debug)]
pub struct UnpackEntry {
    pub id: MessageId,
    pub unpack: UnpackFn,
}

impl UnpackEntry {
    pub const fn new(id: MessageId, unpack: UnpackFn) -> Self {
        Self { id, unpack }
    }
}

//==================================================================================SIGNAL_SINK
/// Destination of received non-diagnostic frames.
pub trait SignalSink {
    /// Apply the payload; `false` when no handler exists for `id`.
    fn unpack(&mut self, id: Id, payload: &[u8; 8]) -> bool;
}

/// Static lookup table generated for one bus.
#[derive(Clone, Copy)]
pub struct UnpackTable<'t> {
    entries: &'t [UnpackEntry],
}

impl<'t> UnpackTable<'t> {
    pub const fn new(entries: &'t [UnpackEntry]) -> Self {
        Self { entries }
    }

    /// Table without entries; every frame is dropped.
    pub const fn empty() -> Self {
        Self { entries: &[] }
    }

    pub fn find(&self, id: Id) -> Option<&'t UnpackEntry> {
        self.entries.iter().find(|entry| entry.id.matches(id))
    }
}

impl SignalSink for UnpackTable<'_> {
    fn unpack(&mut self, id: Id, payload: &[u8; 8]) -> bool {
        match self.find(id) {
            Some(entry) => {
                (entry.unpack)(payload);
                true
            }
            None => false,
        }
    }
}
