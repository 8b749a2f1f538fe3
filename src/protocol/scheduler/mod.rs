//! Periodic, table-driven transmit scheduling.
//!
//! Each bus owns an ordered list of [`PeriodicGroup`]s. On every invocation
//! (one deferred handler at the fastest periodic rate) the [`TxScheduler`]
//! walks the groups that are due, asks them for their next applicable
//! message and pushes it into a free hardware mailbox.
//!
//! Backpressure is the only retry mechanism: when every mailbox is busy the
//! group keeps its cursor on the failed entry and nothing else is sent on the
//! bus until the next invocation, so no frame is skipped and none is sent
//! twice. Later due groups still start their pass and count the periods they
//! spend waiting.
use crate::core::{PackEntry, SignalSink, UnpackTable};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::can_peripheral::{CanPeripheral, FrameTx};
use crate::protocol::transport::traits::clock::elapsed_ms;

//==================================================================================PERIODIC_GROUP
/// Messages sent together at a fixed period, with the runtime state of the
/// current pass.
#[derive(Debug)]
pub struct PeriodicGroup {
    entries: &'static [PackEntry],
    period_ms: u32,
    rolling_counter: u8,
    /// Next entry to try; equals `entries.len()` only transiently.
    cursor: usize,
    /// Time of the last complete drain; `None` until the first one.
    last_send_ms: Option<u32>,
    pass_started_ms: Option<u32>,
    overrun_flagged: bool,
    incomplete_periods: u32,
}

/// Entry selected by [`PeriodicGroup::next_message`] and its packed frame.
#[derive(Clone, Copy, Debug)]
pub struct MatchedEntry {
    pub index: usize,
    pub entry: &'static PackEntry,
    pub frame: CanFrame,
}

impl PeriodicGroup {
    pub const fn new(entries: &'static [PackEntry], period_ms: u32) -> Self {
        Self {
            entries,
            period_ms,
            rolling_counter: 0,
            cursor: 0,
            last_send_ms: None,
            pass_started_ms: None,
            overrun_flagged: false,
            incomplete_periods: 0,
        }
    }

    /// Empty groups are never due. Otherwise a group is due once `period_ms`
    /// has elapsed since its last complete drain; a pass cut short by
    /// backpressure therefore stays due until it drains.
    pub fn is_due(&self, now_ms: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        match self.last_send_ms {
            None => true,
            Some(last) => elapsed_ms(now_ms, last) >= self.period_ms,
        }
    }

    /// Scan from the cursor, packing each entry with the rolling counter, and
    /// return the first one whose pack function accepts this cycle.
    ///
    /// The cursor moves past every entry tried, matched or not. `None` means
    /// the pass is drained.
    pub fn next_message(&mut self) -> Option<MatchedEntry> {
        while self.cursor < self.entries.len() {
            let index = self.cursor;
            let entry = &self.entries[index];
            self.cursor += 1;

            let mut payload = [0u8; 8];
            if (entry.pack)(&mut payload, self.rolling_counter) {
                return Some(MatchedEntry {
                    index,
                    entry,
                    frame: CanFrame::from_payload(entry.id.to_id(), payload, entry.len as usize),
                });
            }
        }
        None
    }

    /// Put the cursor back on an entry whose frame could not be queued.
    fn rewind(&mut self, index: usize) {
        self.cursor = index;
    }

    /// Record the pass start, or flag it once if it outlived its period.
    fn track_pass(&mut self, now_ms: u32) -> bool {
        match self.pass_started_ms {
            None => {
                self.pass_started_ms = Some(now_ms);
                false
            }
            Some(started) => {
                if !self.overrun_flagged && elapsed_ms(now_ms, started) >= self.period_ms {
                    self.overrun_flagged = true;
                    self.incomplete_periods = self.incomplete_periods.saturating_add(1);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn complete_pass(&mut self, now_ms: u32) {
        self.last_send_ms = Some(now_ms);
        self.rolling_counter = self.rolling_counter.wrapping_add(1);
        self.cursor = 0;
        self.pass_started_ms = None;
        self.overrun_flagged = false;
    }

    pub fn entries(&self) -> &'static [PackEntry] {
        self.entries
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn rolling_counter(&self) -> u8 {
        self.rolling_counter
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_send_ms(&self) -> Option<u32> {
        self.last_send_ms
    }

    /// A pass has started and not drained yet.
    pub fn in_pass(&self) -> bool {
        self.pass_started_ms.is_some()
    }

    /// Passes that were still incomplete one period after they started.
    pub fn incomplete_periods(&self) -> u32 {
        self.incomplete_periods
    }
}

//==================================================================================BUS
/// One CAN bus: its peripheral, its periodic groups and its unpack table.
pub struct Bus<'g, P, S = UnpackTable<'static>> {
    pub peripheral: P,
    groups: &'g mut [PeriodicGroup],
    pub unpack: S,
    mailbox_preference: usize,
}

impl<'g, P: CanPeripheral, S: SignalSink> Bus<'g, P, S> {
    pub fn new(peripheral: P, groups: &'g mut [PeriodicGroup], unpack: S) -> Self {
        Self {
            peripheral,
            groups,
            unpack,
            mailbox_preference: 0,
        }
    }

    /// First mailbox tried by every send on this bus.
    pub fn with_mailbox_preference(mut self, mailbox: usize) -> Self {
        self.mailbox_preference = mailbox;
        self
    }

    pub fn groups(&self) -> &[PeriodicGroup] {
        &*self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [PeriodicGroup] {
        &mut *self.groups
    }

    /// Some group is in the middle of a pass.
    pub fn has_pending(&self) -> bool {
        self.groups.iter().any(PeriodicGroup::in_pass)
    }
}

impl<P: CanPeripheral, S> FrameTx for Bus<'_, P, S> {
    fn transmit(&mut self, frame: &CanFrame) -> bool {
        send_frame(&mut self.peripheral, self.mailbox_preference, frame)
    }
}

/// Bus send primitive: load `frame` into the first free mailbox, scanning all
/// of them once starting at `preference`. `false` when every mailbox is busy.
pub fn send_frame<P: CanPeripheral + ?Sized>(
    peripheral: &mut P,
    preference: usize,
    frame: &CanFrame,
) -> bool {
    let count = peripheral.mailbox_count();
    for step in 0..count {
        let mailbox = (preference + step) % count;
        if peripheral.mailbox_is_free(mailbox) && peripheral.load_mailbox(mailbox, frame) {
            return true;
        }
    }
    false
}

//==================================================================================TX_SCHEDULER
/// Counters accumulated over the scheduler's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxStats {
    pub frames_sent: u32,
    /// Invocations that stopped on a bus because every mailbox was busy.
    pub backpressure: u32,
    pub incomplete_periods: u32,
}

#[derive(Debug, Default)]
pub struct TxScheduler {
    stats: TxStats,
}

impl TxScheduler {
    pub const fn new() -> Self {
        Self {
            stats: TxStats {
                frames_sent: 0,
                backpressure: 0,
                incomplete_periods: 0,
            },
        }
    }

    pub fn stats(&self) -> TxStats {
        self.stats
    }

    /// One invocation over every bus. Returns the number of frames queued.
    pub fn run<P: CanPeripheral, S: SignalSink>(
        &mut self,
        buses: &mut [Bus<'_, P, S>],
        now_ms: u32,
    ) -> usize {
        buses.iter_mut().map(|bus| self.run_bus(bus, now_ms)).sum()
    }

    /// One invocation over a single bus. Buses with different peripheral
    /// types are driven one call each.
    pub fn run_bus<P: CanPeripheral, S: SignalSink>(
        &mut self,
        bus: &mut Bus<'_, P, S>,
        now_ms: u32,
    ) -> usize {
        let mut sent = 0;
        let mut blocked = false;
        let preference = bus.mailbox_preference;

        for group in bus.groups.iter_mut() {
            if !group.is_due(now_ms) {
                continue;
            }
            // Due groups behind a blocked one still start their pass.
            if group.track_pass(now_ms) {
                self.stats.incomplete_periods = self.stats.incomplete_periods.saturating_add(1);
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "tx group ({} ms) did not complete within its period",
                    group.period_ms
                );
            }
            if blocked {
                continue;
            }

            loop {
                let Some(matched) = group.next_message() else {
                    group.complete_pass(now_ms);
                    break;
                };

                if send_frame(&mut bus.peripheral, preference, &matched.frame) {
                    sent += 1;
                    self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                } else {
                    group.rewind(matched.index);
                    self.stats.backpressure = self.stats.backpressure.saturating_add(1);
                    #[cfg(feature = "defmt")]
                    defmt::debug!(
                        "tx backpressure: {=u32:#x} waits for a mailbox",
                        matched.frame.raw_id()
                    );
                    // Later groups would hit the same full mailboxes.
                    blocked = true;
                    break;
                }
            }
        }
        sent
    }
}

//==================================================================================TESTS
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
