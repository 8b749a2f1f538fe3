//! Receive side: FIFO notifications raised from interrupt context, drained
//! later by a deferred handler that routes every frame either to the
//! diagnostic server or to the bus's unpack table.
//!
//! Diagnostic frames the server cannot take yet are kept, in arrival order,
//! in a bounded retry ring replayed by the periodic pass.
use core::sync::atomic::{AtomicU32, Ordering};

use heapless::Deque;

use crate::core::{MessageId, SignalSink};
use crate::error::{DiagError, RxError};
use crate::infra::dispatch::DispatchHandle;
use crate::protocol::diagnostic::Intake;
use crate::protocol::scheduler::Bus;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::can_peripheral::{CanPeripheral, FrameTx};

/// FIFOs tracked per bus in the notification flag set.
pub const MAX_FIFOS_PER_BUS: usize = 4;

/// Buses tracked in the notification flag set.
pub const MAX_BUSES: usize = 32 / MAX_FIFOS_PER_BUS;

/// Default capacity of the diagnostic retry ring.
pub const DIAG_RETRY_CAPACITY: usize = 8;

//==================================================================================FIFO_FLAGS
/// One "has data" bit per (bus, FIFO), shared between the receive interrupts
/// and the dispatcher task.
pub struct FifoFlags {
    bits: AtomicU32,
}

impl FifoFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    #[inline]
    fn mask(bus: usize, fifo: usize) -> u32 {
        if bus < MAX_BUSES && fifo < MAX_FIFOS_PER_BUS {
            1 << (bus * MAX_FIFOS_PER_BUS + fifo)
        } else {
            0
        }
    }

    /// Set the flag; `true` if it was clear before.
    pub fn set(&self, bus: usize, fifo: usize) -> bool {
        let mask = Self::mask(bus, fifo);
        self.bits.fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    pub fn is_set(&self, bus: usize, fifo: usize) -> bool {
        self.bits.load(Ordering::Acquire) & Self::mask(bus, fifo) != 0
    }

    /// Clear the flag and report whether it was set.
    pub fn test_and_clear(&self, bus: usize, fifo: usize) -> bool {
        let mask = Self::mask(bus, fifo);
        self.bits.fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Any FIFO still flagged.
    pub fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }
}

impl Default for FifoFlags {
    fn default() -> Self {
        Self::new()
    }
}

//==================================================================================RX_NOTIFIER
/// Interrupt-side handle: flags a FIFO and raises the receive handler.
#[derive(Clone, Copy)]
pub struct RxNotifier<'a> {
    flags: &'a FifoFlags,
    handle: DispatchHandle<'a>,
}

impl<'a> RxNotifier<'a> {
    pub fn new(flags: &'a FifoFlags, handle: DispatchHandle<'a>) -> Self {
        Self { flags, handle }
    }

    /// Call from the FIFO interrupt. `true` asks for a context switch on exit.
    pub fn notify_from_interrupt(&self, bus: usize, fifo: usize) -> bool {
        self.flags.set(bus, fifo);
        self.handle.raise_from_interrupt()
    }

    /// Task-context variant, e.g. from a polling driver.
    pub fn notify(&self, bus: usize, fifo: usize) {
        self.flags.set(bus, fifo);
        self.handle.raise();
    }
}

//==================================================================================DIAGNOSTIC_INTAKE
/// Consumer of diagnostic request frames.
pub trait DiagnosticIntake {
    /// Take one raw frame payload. `Err(DiagError::NotReady)` asks the caller
    /// to hold the frame and offer it again later.
    fn intake<T: FrameTx>(
        &mut self,
        data: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<Intake, DiagError>;
}

//==================================================================================RX_STATS
/// Receive path counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStats {
    pub frames: u32,
    pub diagnostic: u32,
    pub unpacked: u32,
    /// Frames with no unpack handler, dropped.
    pub unmatched: u32,
    /// Diagnostic frames delivered from the retry ring.
    pub retried: u32,
    /// Diagnostic frames lost because the retry ring was full.
    pub retry_dropped: u32,
    /// Diagnostic frames refused by the transport (bad sequence, overflow...).
    pub transport_errors: u32,
    /// Hardware FIFO overruns reported by the peripheral.
    pub overruns: u32,
    /// Highest retry ring occupancy seen.
    pub retry_high_water: u8,
}

//==================================================================================RX_DISPATCHER
/// Drains flagged FIFOs and routes their frames.
pub struct RxDispatcher<'a, const RETRY: usize = DIAG_RETRY_CAPACITY> {
    flags: &'a FifoFlags,
    diag_bus: usize,
    diag_request_id: MessageId,
    retry: Deque<CanFrame, RETRY>,
    fifo_high_water: [u8; 32],
    stats: RxStats,
}

impl<'a, const RETRY: usize> RxDispatcher<'a, RETRY> {
    /// Diagnostic requests are only recognised on `diag_bus`.
    pub fn new(flags: &'a FifoFlags, diag_bus: usize, diag_request_id: MessageId) -> Self {
        Self {
            flags,
            diag_bus,
            diag_request_id,
            retry: Deque::new(),
            fifo_high_water: [0; 32],
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// Check that every FIFO of `buses` has a notification flag and that the
    /// diagnostic bus exists. A FIFO without a flag would never be drained.
    pub fn check_buses<P: CanPeripheral, S>(
        &self,
        buses: &[Bus<'_, P, S>],
    ) -> Result<(), RxError> {
        if buses.len() > MAX_BUSES {
            return Err(RxError::TooManyBuses {
                buses: buses.len(),
                max: MAX_BUSES,
            });
        }
        if self.diag_bus >= buses.len() {
            return Err(RxError::InvalidDiagnosticBus { bus: self.diag_bus });
        }
        for (bus, entry) in buses.iter().enumerate() {
            let fifos = entry.peripheral.fifo_count();
            if fifos > MAX_FIFOS_PER_BUS {
                return Err(RxError::TooManyFifos {
                    bus,
                    fifos,
                    max: MAX_FIFOS_PER_BUS,
                });
            }
        }
        Ok(())
    }

    /// Diagnostic frames waiting for the server.
    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    /// Highest fill level observed when draining `fifo` of `bus`.
    pub fn fifo_high_water(&self, bus: usize, fifo: usize) -> u8 {
        if bus < MAX_BUSES && fifo < MAX_FIFOS_PER_BUS {
            self.fifo_high_water[bus * MAX_FIFOS_PER_BUS + fifo]
        } else {
            0
        }
    }

    /// Some FIFO was notified and not serviced yet.
    pub fn has_pending_notifications(&self) -> bool {
        self.flags.any()
    }

    /// Deferred handler body: service every flagged FIFO of every bus.
    /// Bus indices are positions in `buses`.
    pub fn service<P, S, D>(&mut self, buses: &mut [Bus<'_, P, S>], diag: &mut D, now_ms: u32) -> usize
    where
        P: CanPeripheral,
        S: SignalSink,
        D: DiagnosticIntake,
    {
        buses
            .iter_mut()
            .enumerate()
            .map(|(index, bus)| self.service_bus(index, bus, diag, now_ms))
            .sum()
    }

    /// Service the flagged FIFOs of one bus. Returns the frames drained.
    pub fn service_bus<P, S, D>(
        &mut self,
        bus_index: usize,
        bus: &mut Bus<'_, P, S>,
        diag: &mut D,
        now_ms: u32,
    ) -> usize
    where
        P: CanPeripheral,
        S: SignalSink,
        D: DiagnosticIntake,
    {
        let mut drained = 0;
        let fifo_count = bus.peripheral.fifo_count().min(MAX_FIFOS_PER_BUS);

        for fifo in 0..fifo_count {
            // Cleared before draining so a notification raised meanwhile
            // schedules another pass instead of being lost.
            if !self.flags.test_and_clear(bus_index, fifo) {
                continue;
            }

            self.record_fill(bus_index, fifo, bus.peripheral.fifo_fill_level(fifo));
            if bus.peripheral.take_overrun(fifo) {
                self.stats.overruns = self.stats.overruns.saturating_add(1);
                #[cfg(feature = "defmt")]
                defmt::warn!("rx overrun on bus {} fifo {}", bus_index, fifo);
            }

            while !bus.peripheral.fifo_is_empty(fifo) {
                let Some(frame) = bus.peripheral.receive(fifo) else {
                    break;
                };
                drained += 1;
                self.route(bus_index, bus, &frame, diag, now_ms);
            }

            bus.peripheral.rearm_notifications(fifo);
        }
        drained
    }

    fn route<P, S, D>(
        &mut self,
        bus_index: usize,
        bus: &mut Bus<'_, P, S>,
        frame: &CanFrame,
        diag: &mut D,
        now_ms: u32,
    ) where
        P: CanPeripheral,
        S: SignalSink,
        D: DiagnosticIntake,
    {
        self.stats.frames = self.stats.frames.wrapping_add(1);

        if bus_index == self.diag_bus && self.diag_request_id.matches(frame.id) {
            self.stats.diagnostic = self.stats.diagnostic.wrapping_add(1);
            // Older frames still wait: keep arrival order.
            if !self.retry.is_empty() {
                self.hold(*frame);
                return;
            }
            match diag.intake(frame.bytes(), bus, now_ms) {
                Err(DiagError::NotReady) => self.hold(*frame),
                Err(_err) => {
                    self.stats.transport_errors = self.stats.transport_errors.wrapping_add(1);
                    #[cfg(feature = "defmt")]
                    defmt::warn!("diagnostic frame refused: {}", _err);
                }
                Ok(_) => {}
            }
            return;
        }

        if bus.unpack.unpack(frame.id, &frame.data) {
            self.stats.unpacked = self.stats.unpacked.wrapping_add(1);
        } else {
            self.stats.unmatched = self.stats.unmatched.wrapping_add(1);
        }
    }

    fn hold(&mut self, frame: CanFrame) {
        if self.retry.push_back(frame).is_err() {
            self.stats.retry_dropped = self.stats.retry_dropped.saturating_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!("diagnostic retry ring full, frame dropped");
            return;
        }
        let len = self.retry.len().min(u8::MAX as usize) as u8;
        if len > self.stats.retry_high_water {
            self.stats.retry_high_water = len;
        }
    }

    fn record_fill(&mut self, bus: usize, fifo: usize, level: usize) {
        if bus < MAX_BUSES && fifo < MAX_FIFOS_PER_BUS {
            let slot = &mut self.fifo_high_water[bus * MAX_FIFOS_PER_BUS + fifo];
            *slot = (*slot).max(level.min(u8::MAX as usize) as u8);
        }
    }

    /// Periodic pass: offer held diagnostic frames again, oldest first,
    /// stopping at the first one the server still refuses.
    pub fn retry_pending<D, T>(&mut self, diag: &mut D, tx: &mut T, now_ms: u32) -> usize
    where
        D: DiagnosticIntake,
        T: FrameTx,
    {
        let mut delivered = 0;
        while let Some(frame) = self.retry.front().copied() {
            match diag.intake(frame.bytes(), tx, now_ms) {
                Err(DiagError::NotReady) => break,
                result => {
                    self.retry.pop_front();
                    delivered += 1;
                    self.stats.retried = self.stats.retried.wrapping_add(1);
                    if result.is_err() {
                        self.stats.transport_errors = self.stats.transport_errors.wrapping_add(1);
                    }
                }
            }
        }
        delivered
    }
}
