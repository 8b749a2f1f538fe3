//! Runtime glue: the periodic tick source feeding the deferred dispatcher and
//! the [`Controller`] aggregate whose methods are the dispatcher's handler
//! bodies.
//!
//! A typical ECU registers three handlers: `tx_tick` and `diag_tick` on a
//! level raised by [`drive_periodic`] every millisecond, and `rx_service` on
//! a higher level raised by the FIFO interrupts through an
//! [`RxNotifier`](crate::protocol::receiver::RxNotifier).
use core::cell::RefCell;
use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Ticker};
use futures_util::future::{select, Either};
use futures_util::pin_mut;

use crate::core::SignalSink;
use crate::error::{DiagError, RxError};
use crate::infra::dispatch::{DispatchHandle, LevelWorker};
use crate::protocol::diagnostic::{DiagnosticConfig, DiagnosticHooks, DiagnosticServer};
use crate::protocol::receiver::{FifoFlags, RxDispatcher, RxStats, DIAG_RETRY_CAPACITY};
use crate::protocol::scheduler::{Bus, TxScheduler, TxStats};
use crate::protocol::transport::traits::can_peripheral::CanPeripheral;
use crate::protocol::transport::traits::clock::MonotonicClock;

/// Rate of the fastest periodic handlers.
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

//==================================================================================TICK_SOURCE
/// Raise every handle once per `period`, forever.
pub async fn drive_periodic(handles: &[DispatchHandle<'_>], period: Duration) -> Infallible {
    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        for handle in handles {
            handle.raise();
        }
    }
}

/// Run a level worker and the tick source of its periodic handlers in the
/// same task.
pub async fn run_level_with_ticks(
    worker: &mut LevelWorker<'_>,
    handles: &[DispatchHandle<'_>],
    period: Duration,
) -> Infallible {
    let work = worker.run();
    pin_mut!(work);
    let ticks = drive_periodic(handles, period);
    pin_mut!(ticks);

    match select(work, ticks).await {
        Either::Left((never, _)) => never,
        Either::Right((never, _)) => never,
    }
}

//==================================================================================CONTROLLER
/// Everything one ECU needs on its buses: the transmit scheduler, the
/// receive dispatcher and the diagnostic server.
pub struct Controller<'a, 'g, P, S, H, C, const RETRY: usize = DIAG_RETRY_CAPACITY> {
    buses: &'a mut [Bus<'g, P, S>],
    tx: TxScheduler,
    rx: RxDispatcher<'a, RETRY>,
    diag: DiagnosticServer<H>,
    diag_bus: usize,
    clock: C,
}

impl<'a, 'g, P, S, H, C, const RETRY: usize> Controller<'a, 'g, P, S, H, C, RETRY>
where
    P: CanPeripheral,
    S: SignalSink,
    H: DiagnosticHooks,
    C: MonotonicClock,
{
    /// Diagnostics run on `buses[diag_bus]`. The diagnostic server is
    /// initialised right away.
    ///
    /// Fails when a bus or FIFO falls outside the receive notification flags,
    /// or when `diag_bus` has no bus.
    pub fn new(
        buses: &'a mut [Bus<'g, P, S>],
        flags: &'a FifoFlags,
        diag_bus: usize,
        diag_config: DiagnosticConfig,
        hooks: H,
        clock: C,
    ) -> Result<Self, RxError> {
        let rx = RxDispatcher::new(flags, diag_bus, diag_config.request_id);
        if let Err(err) = rx.check_buses(buses) {
            #[cfg(feature = "defmt")]
            defmt::error!("controller rejected: {}", err);
            return Err(err);
        }

        let mut diag = DiagnosticServer::new(diag_config, hooks);
        diag.init(clock.now_ms());
        Ok(Self {
            buses,
            tx: TxScheduler::new(),
            rx,
            diag,
            diag_bus,
            clock,
        })
    }

    /// Transmit handler: one scheduler invocation over every bus.
    pub fn tx_tick(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.tx.run(self.buses, now)
    }

    /// Receive handler: drain every notified FIFO.
    pub fn rx_service(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.rx.service(self.buses, &mut self.diag, now)
    }

    /// Diagnostic handler: replay held request frames, then poll the server.
    pub fn diag_tick(&mut self) -> Result<(), DiagError> {
        let now = self.clock.now_ms();
        let Some(bus) = self.buses.get_mut(self.diag_bus) else {
            return Ok(());
        };
        self.rx.retry_pending(&mut self.diag, bus, now);
        self.diag.poll(bus, now)
    }

    pub fn buses(&self) -> &[Bus<'g, P, S>] {
        &*self.buses
    }

    pub fn buses_mut(&mut self) -> &mut [Bus<'g, P, S>] {
        &mut *self.buses
    }

    pub fn diagnostic(&self) -> &DiagnosticServer<H> {
        &self.diag
    }

    pub fn diagnostic_mut(&mut self) -> &mut DiagnosticServer<H> {
        &mut self.diag
    }

    pub fn tx_stats(&self) -> TxStats {
        self.tx.stats()
    }

    pub fn rx_stats(&self) -> RxStats {
        self.rx.stats()
    }

    pub fn rx(&self) -> &RxDispatcher<'a, RETRY> {
        &self.rx
    }
}

//==================================================================================SHARED
/// Controller shared by handlers living on different dispatch levels. Each
/// handler body runs inside a critical section.
pub struct SharedController<'a, 'g, P, S, H, C, const RETRY: usize = DIAG_RETRY_CAPACITY> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Controller<'a, 'g, P, S, H, C, RETRY>>>,
}

impl<'a, 'g, P, S, H, C, const RETRY: usize> SharedController<'a, 'g, P, S, H, C, RETRY>
where
    P: CanPeripheral,
    S: SignalSink,
    H: DiagnosticHooks,
    C: MonotonicClock,
{
    pub fn new(controller: Controller<'a, 'g, P, S, H, C, RETRY>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(controller)),
        }
    }

    pub fn tx_tick(&self) -> usize {
        self.with(Controller::tx_tick)
    }

    pub fn rx_service(&self) -> usize {
        self.with(Controller::rx_service)
    }

    pub fn diag_tick(&self) -> Result<(), DiagError> {
        self.with(Controller::diag_tick)
    }

    /// Run `f` with exclusive access to the controller.
    pub fn with<R>(&self, f: impl FnOnce(&mut Controller<'a, 'g, P, S, H, C, RETRY>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}
