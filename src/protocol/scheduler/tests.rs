//! Drain, multiplexing and backpressure behaviour of the transmit scheduler.
extern crate std;

use super::*;
use crate::core::{MessageId, UnpackTable};
use std::vec;
use std::vec::Vec;

/// Mailboxes stay busy until `complete` is called, like a bus that has not
/// yet acknowledged the frames.
struct Mailboxes {
    slots: Vec<Option<CanFrame>>,
    sent: Vec<CanFrame>,
}

impl Mailboxes {
    fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
            sent: Vec::new(),
        }
    }

    fn complete(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    fn sent_ids(&self) -> Vec<u32> {
        self.sent.iter().map(CanFrame::raw_id).collect()
    }
}

impl CanPeripheral for Mailboxes {
    fn mailbox_count(&self) -> usize {
        self.slots.len()
    }

    fn mailbox_is_free(&self, mailbox: usize) -> bool {
        self.slots[mailbox].is_none()
    }

    fn load_mailbox(&mut self, mailbox: usize, frame: &CanFrame) -> bool {
        self.slots[mailbox] = Some(*frame);
        self.sent.push(*frame);
        true
    }

    fn fifo_count(&self) -> usize {
        2
    }

    fn fifo_fill_level(&self, _fifo: usize) -> usize {
        0
    }

    fn receive(&mut self, _fifo: usize) -> Option<CanFrame> {
        None
    }

    fn rearm_notifications(&mut self, _fifo: usize) {}
}

fn pack_counter(payload: &mut [u8; 8], counter: u8) -> bool {
    payload[0] = counter;
    true
}

fn pack_even(payload: &mut [u8; 8], counter: u8) -> bool {
    if counter % 2 != 0 {
        return false;
    }
    payload[0] = 0xEE;
    true
}

fn pack_dirty_skip(payload: &mut [u8; 8], _counter: u8) -> bool {
    payload.fill(0xFF);
    false
}

fn pack_untouched(_payload: &mut [u8; 8], _counter: u8) -> bool {
    true
}

static THREE: [PackEntry; 3] = [
    PackEntry::new(MessageId::standard(0x100), 8, pack_counter),
    PackEntry::new(MessageId::standard(0x101), 8, pack_counter),
    PackEntry::new(MessageId::standard(0x102), 8, pack_counter),
];

static TWO: [PackEntry; 2] = [
    PackEntry::new(MessageId::standard(0x200), 8, pack_counter),
    PackEntry::new(MessageId::standard(0x201), 8, pack_counter),
];

static MULTIPLEXED: [PackEntry; 2] = [
    PackEntry::new(MessageId::standard(0x300), 8, pack_counter),
    PackEntry::new(MessageId::standard(0x301), 8, pack_even),
];

static SCRATCH: [PackEntry; 2] = [
    PackEntry::new(MessageId::standard(0x400), 8, pack_dirty_skip),
    PackEntry::new(MessageId::extended(0x18FF_0001), 4, pack_untouched),
];

#[test]
/// N always-matching entries: N frames per period, counter +1 per period.
fn drain_sends_every_entry_once_per_period() {
    let mut groups = [PeriodicGroup::new(&THREE, 10)];
    let mut bus = Bus::new(Mailboxes::new(3), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();

    for now in 0..30 {
        scheduler.run_bus(&mut bus, now);
        bus.peripheral.complete();
        if now == 0 {
            assert_eq!(bus.peripheral.sent.len(), 3);
        }
    }

    assert_eq!(bus.peripheral.sent.len(), 9);
    let counters: Vec<u8> = bus.peripheral.sent.iter().map(|f| f.data[0]).collect();
    assert_eq!(counters, [0, 0, 0, 1, 1, 1, 2, 2, 2]);
    let group = &bus.groups()[0];
    assert_eq!(group.rolling_counter(), 3);
    assert_eq!(group.cursor(), 0);
    assert_eq!(group.last_send_ms(), Some(20));
    assert_eq!(scheduler.stats().frames_sent, 9);
}

#[test]
/// An entry packed only on even counters goes out in half of the periods.
fn even_counter_entry_is_sent_every_other_period() {
    let mut groups = [PeriodicGroup::new(&MULTIPLEXED, 5)];
    let mut bus = Bus::new(Mailboxes::new(3), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();

    for now in 0..40 {
        scheduler.run_bus(&mut bus, now);
        bus.peripheral.complete();
    }

    let ids = bus.peripheral.sent_ids();
    assert_eq!(ids.iter().filter(|&&id| id == 0x300).count(), 8);
    assert_eq!(ids.iter().filter(|&&id| id == 0x301).count(), 4);
}

#[test]
/// One mailbox, two entries: the second waits without the first repeating.
fn backpressure_resumes_at_failed_entry() {
    let mut groups = [PeriodicGroup::new(&TWO, 100)];
    let mut bus = Bus::new(Mailboxes::new(1), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();

    assert_eq!(scheduler.run_bus(&mut bus, 0), 1);
    assert_eq!(bus.groups()[0].cursor(), 1);
    assert!(bus.has_pending());
    assert_eq!(scheduler.stats().backpressure, 1);

    bus.peripheral.complete();
    assert_eq!(scheduler.run_bus(&mut bus, 1), 1);
    assert_eq!(bus.peripheral.sent_ids(), [0x200, 0x201]);
    assert_eq!(bus.groups()[0].rolling_counter(), 1);
    assert_eq!(bus.groups()[0].last_send_ms(), Some(1));
    assert!(!bus.has_pending());

    bus.peripheral.complete();
    assert_eq!(scheduler.run_bus(&mut bus, 2), 0);
}

#[test]
/// A blocked bus sends nothing from its later groups, which only start their
/// pass.
fn blocked_bus_skips_remaining_groups() {
    let mut groups = [PeriodicGroup::new(&TWO, 10), PeriodicGroup::new(&THREE, 10)];
    let mut bus = Bus::new(Mailboxes::new(1), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();

    scheduler.run_bus(&mut bus, 0);
    assert_eq!(bus.peripheral.sent_ids(), [0x200]);
    assert!(bus.groups()[1].in_pass());
    assert_eq!(bus.groups()[1].cursor(), 0);
}

#[test]
/// A group kept waiting behind a stalled one is counted too.
fn group_behind_stall_counts_incomplete_period() {
    let mut groups = [PeriodicGroup::new(&TWO, 5), PeriodicGroup::new(&THREE, 5)];
    let mut bus = Bus::new(Mailboxes::new(1), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();

    for now in 0..12 {
        scheduler.run_bus(&mut bus, now);
    }
    assert_eq!(bus.peripheral.sent_ids(), [0x200]);
    assert_eq!(bus.groups()[0].incomplete_periods(), 1);
    assert_eq!(bus.groups()[1].incomplete_periods(), 1);
    assert_eq!(bus.groups()[1].cursor(), 0);
    assert_eq!(scheduler.stats().incomplete_periods, 2);

    bus.peripheral.complete();
    scheduler.run_bus(&mut bus, 12);
    bus.peripheral.complete();
    scheduler.run_bus(&mut bus, 13);
    assert_eq!(bus.peripheral.sent_ids(), [0x200, 0x201, 0x100]);
}

#[test]
/// A pass stuck for a full period is counted once, and the group is not reset.
fn stalled_pass_counts_one_incomplete_period() {
    let mut groups = [PeriodicGroup::new(&TWO, 5)];
    let mut bus = Bus::new(Mailboxes::new(1), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();

    for now in 0..12 {
        scheduler.run_bus(&mut bus, now);
    }
    assert_eq!(bus.groups()[0].incomplete_periods(), 1);
    assert_eq!(scheduler.stats().incomplete_periods, 1);
    assert_eq!(bus.groups()[0].cursor(), 1);
    assert_eq!(bus.groups()[0].rolling_counter(), 0);

    bus.peripheral.complete();
    scheduler.run_bus(&mut bus, 12);
    assert_eq!(bus.groups()[0].rolling_counter(), 1);
    assert_eq!(bus.peripheral.sent_ids(), [0x200, 0x201]);
}

#[test]
fn empty_group_is_never_due() {
    static NONE: [PackEntry; 0] = [];
    let group = PeriodicGroup::new(&NONE, 10);
    assert!(!group.is_due(0));
    assert!(!group.is_due(1_000));
}

#[test]
/// Every pack call gets a zeroed payload; a refused one leaves no trace.
fn skipped_entry_does_not_leak_into_next_frame() {
    let mut group = PeriodicGroup::new(&SCRATCH, 10);
    let matched = group.next_message().unwrap();
    assert_eq!(matched.index, 1);
    assert_eq!(matched.frame.bytes(), &[0, 0, 0, 0]);
    assert_eq!(matched.frame.raw_id(), 0x18FF_0001);
    assert_eq!(group.cursor(), 2);
    assert!(group.next_message().is_none());
}

#[test]
/// The mailbox scan wraps around from the preferred mailbox.
fn send_frame_scans_from_preference() {
    let mut mailboxes = Mailboxes::new(3);
    let frame = CanFrame::from_payload(MessageId::standard(0x10).to_id(), [0; 8], 1);
    mailboxes.slots[1] = Some(frame);
    mailboxes.slots[2] = Some(frame);

    assert!(send_frame(&mut mailboxes, 1, &frame));
    assert!(mailboxes.slots[0].is_some());
    assert!(!send_frame(&mut mailboxes, 2, &frame));
}

#[test]
/// The counter wraps from 255 to 0.
fn rolling_counter_wraps() {
    let mut groups = [PeriodicGroup::new(&TWO, 1)];
    let mut bus = Bus::new(Mailboxes::new(2), &mut groups, UnpackTable::empty());
    let mut scheduler = TxScheduler::new();
    for now in 0..257 {
        scheduler.run_bus(&mut bus, now);
        bus.peripheral.complete();
    }
    assert_eq!(bus.groups()[0].rolling_counter(), 1);
    assert_eq!(bus.peripheral.sent.len(), 514);
}
