//! Transmit scenario: two periodic groups on one bus driven through the
//! controller's transmit handler, with and without mailbox backpressure.
mod helpers;

use ecu_canio::{
    core::{MessageId, PackEntry, UnpackTable},
    infra::codec::signal::SignalSpec,
    protocol::{
        diagnostic::{DefaultHooks, DiagnosticConfig},
        receiver::FifoFlags,
        runtime::Controller,
        scheduler::{Bus, PeriodicGroup},
    },
};
use helpers::{ManualClock, MockPeripheral};

/// 10-bit pack voltage, 5 mV per bit, at bit 12.
const PACK_VOLTAGE: SignalSpec = SignalSpec::unsigned(12, 10).scaled(0.005, 0.0);

fn pack_status(payload: &mut [u8; 8], counter: u8) -> bool {
    payload[0] = counter;
    PACK_VOLTAGE.encode(payload, 3.3).is_ok()
}

fn pack_temperatures(payload: &mut [u8; 8], counter: u8) -> bool {
    // Two multiplexed halves, alternating.
    payload[0] = counter % 2;
    payload[1] = 25;
    true
}

fn pack_slow(payload: &mut [u8; 8], _counter: u8) -> bool {
    payload[0] = 0xA5;
    true
}

static FAST: [PackEntry; 2] = [
    PackEntry::new(MessageId::standard(0x100), 8, pack_status),
    PackEntry::new(MessageId::standard(0x101), 2, pack_temperatures),
];

static SLOW: [PackEntry; 1] = [PackEntry::new(MessageId::extended(0x18FF_5000), 1, pack_slow)];

const DIAG: DiagnosticConfig =
    DiagnosticConfig::new(MessageId::standard(0x7E0), MessageId::standard(0x7E8));

#[test]
/// Over 200 ms, the 10 ms group drains 20 times and the 100 ms group twice.
fn groups_are_sent_at_their_period() {
    let mut groups = [PeriodicGroup::new(&FAST, 10), PeriodicGroup::new(&SLOW, 100)];
    let mut buses = [Bus::new(MockPeripheral::new(3, 2), &mut groups, UnpackTable::empty())];
    let flags = FifoFlags::new();
    let clock = ManualClock::default();
    let mut controller: Controller<'_, '_, _, _, _, _> =
        Controller::new(&mut buses, &flags, 0, DIAG, DefaultHooks, clock.clone()).unwrap();

    for now in 0..200 {
        clock.set(now);
        controller.tx_tick();
        controller.buses_mut()[0].peripheral.complete();
    }

    let peripheral = &controller.buses()[0].peripheral;
    assert_eq!(peripheral.sent_on(0x100).len(), 20);
    assert_eq!(peripheral.sent_on(0x101).len(), 20);
    assert_eq!(peripheral.sent_on(0x18FF_5000), vec![vec![0xA5]; 2]);

    let status = &peripheral.sent_on(0x100)[3];
    assert_eq!(status[0], 3);
    let mut payload = [0u8; 8];
    payload.copy_from_slice(status);
    assert!((PACK_VOLTAGE.decode(&payload).unwrap() - 3.3).abs() < 0.005);

    let groups = controller.buses()[0].groups();
    assert_eq!(groups[0].rolling_counter(), 20);
    assert_eq!(groups[1].rolling_counter(), 2);
    assert_eq!(controller.tx_stats().frames_sent, 42);
    assert_eq!(controller.tx_stats().backpressure, 0);
}

#[test]
/// A single mailbox acknowledged every 3 ms: no frame is lost or repeated,
/// the order inside each pass is kept and the stalls are visible.
fn backpressure_delays_without_loss_or_duplicates() {
    let mut groups = [PeriodicGroup::new(&FAST, 4), PeriodicGroup::new(&SLOW, 10)];
    let mut buses = [Bus::new(MockPeripheral::new(1, 2), &mut groups, UnpackTable::empty())];
    let flags = FifoFlags::new();
    let clock = ManualClock::default();
    let mut controller: Controller<'_, '_, _, _, _, _> =
        Controller::new(&mut buses, &flags, 0, DIAG, DefaultHooks, clock.clone()).unwrap();

    for now in 0..60 {
        clock.set(now);
        controller.tx_tick();
        if now % 3 == 2 {
            controller.buses_mut()[0].peripheral.complete();
        }
    }

    let peripheral = &controller.buses()[0].peripheral;
    let status = peripheral.sent_on(0x100);
    let temperatures = peripheral.sent_on(0x101);

    // Each pass sends 0x100 then 0x101 with the same counter.
    let counters: Vec<u8> = status.iter().map(|p| p[0]).collect();
    let expected: Vec<u8> = (0..counters.len() as u8).collect();
    assert_eq!(counters, expected);
    assert!(temperatures.len() + 1 >= status.len());
    for (index, payload) in temperatures.iter().enumerate() {
        assert_eq!(payload[0], index as u8 % 2);
    }

    let ids = peripheral.sent_ids();
    for pair in ids.windows(2) {
        assert!(!(pair[0] == 0x101 && pair[1] == 0x101));
    }
    assert!(controller.tx_stats().backpressure > 0);
    assert!(controller.tx_stats().incomplete_periods > 0);
}
