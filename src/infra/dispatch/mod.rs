//! Deferred dispatch: priority levels of coalescing notifications that move
//! work out of interrupt context into one worker per level.
//!
//! * [`DispatchLevel`] is the shared wait-set of a level. It is `const`
//!   constructible so firmware places it in a `static`.
//! * [`DeferredDispatcher`] registers handlers at startup and hands out
//!   [`DispatchHandle`]s, then splits into one [`LevelWorker`] per level.
//! * Raising a handle sets its bit; the worker takes the whole mask at once and
//!   runs every raised handler exactly once, highest bit first. Raises that
//!   happen before the worker runs collapse into one invocation.
//!
//! ```rust,ignore
//! static LEVELS: [DispatchLevel; 2] = [DispatchLevel::new(), DispatchLevel::new()];
//!
//! let mut dispatcher = DeferredDispatcher::new(&LEVELS);
//! let rx = dispatcher.register(1, &mut rx_handler)?;
//! let [low, high] = dispatcher.into_workers();
//! // interrupt: if rx.raise_from_interrupt() { /* request reschedule */ }
//! ```
use core::convert::Infallible;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::DispatchError;

/// Usable bits of a level's wait-set.
pub const MAX_HANDLERS_PER_LEVEL: usize = 24;

const LEVEL_MASK: u32 = (1 << MAX_HANDLERS_PER_LEVEL) - 1;

//==================================================================================DISPATCH_LEVEL
/// Wait-set of one priority level.
pub struct DispatchLevel {
    pending: AtomicU32,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

impl DispatchLevel {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            wake: Signal::new(),
        }
    }

    /// Set bits and wake the worker.
    pub fn raise(&self, mask: u32) {
        self.pending.fetch_or(mask & LEVEL_MASK, Ordering::AcqRel);
        self.wake.signal(());
    }

    /// Interrupt-context variant of [`raise`](Self::raise).
    ///
    /// Returns `true` when the worker had nothing pending before this call,
    /// i.e. this raise is what makes it runnable.
    pub fn raise_from_interrupt(&self, mask: u32) -> bool {
        let previous = self.pending.fetch_or(mask & LEVEL_MASK, Ordering::AcqRel);
        self.wake.signal(());
        previous == 0
    }

    /// Bits raised and not yet taken by the worker.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Atomically take and clear the whole mask.
    pub fn take(&self) -> u32 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Block until at least one bit is set, then take the mask.
    pub async fn wait(&self) -> u32 {
        loop {
            let mask = self.take();
            if mask != 0 {
                return mask;
            }
            self.wake.wait().await;
        }
    }
}

impl Default for DispatchLevel {
    fn default() -> Self {
        Self::new()
    }
}

//==================================================================================DISPATCH_HANDLE
/// Raise capability for one registered handler.
#[derive(Clone, Copy)]
pub struct DispatchHandle<'a> {
    level: &'a DispatchLevel,
    priority: u8,
    bit: u8,
}

impl<'a> DispatchHandle<'a> {
    /// Request the handler from task context.
    #[inline]
    pub fn raise(&self) {
        self.level.raise(self.mask());
    }

    /// Request the handler from an interrupt; `true` asks for a reschedule.
    #[inline]
    pub fn raise_from_interrupt(&self) -> bool {
        self.level.raise_from_interrupt(self.mask())
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        1 << self.bit
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }
}

impl core::fmt::Debug for DispatchHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("priority", &self.priority)
            .field("bit", &self.bit)
            .finish()
    }
}

//==================================================================================LEVEL_WORKER
/// Handler table and loop of one priority level.
pub struct LevelWorker<'a> {
    level: &'a DispatchLevel,
    priority: u8,
    handlers: [Option<&'a mut dyn FnMut()>; MAX_HANDLERS_PER_LEVEL],
    registered: u8,
}

impl<'a> LevelWorker<'a> {
    fn new(level: &'a DispatchLevel, priority: u8) -> Self {
        Self {
            level,
            priority,
            handlers: core::array::from_fn(|_| None),
            registered: 0,
        }
    }

    fn register(&mut self, handler: &'a mut dyn FnMut()) -> Result<DispatchHandle<'a>, DispatchError> {
        critical_section::with(|_| {
            let bit = self.registered;
            if bit as usize >= MAX_HANDLERS_PER_LEVEL {
                #[cfg(feature = "defmt")]
                defmt::error!("dispatch level {} is full", self.priority);
                return Err(DispatchError::LevelFull {
                    level: self.priority,
                });
            }
            self.handlers[bit as usize] = Some(handler);
            self.registered += 1;
            Ok(DispatchHandle {
                level: self.level,
                priority: self.priority,
                bit,
            })
        })
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.registered as usize
    }

    pub fn is_empty(&self) -> bool {
        self.registered == 0
    }

    /// Run the handlers of `mask`, highest bit first. Returns how many ran.
    pub fn dispatch(&mut self, mask: u32) -> usize {
        let mut remaining = mask & LEVEL_MASK;
        let mut invoked = 0;
        while remaining != 0 {
            let bit = 31 - remaining.leading_zeros();
            remaining &= !(1 << bit);
            if let Some(handler) = self.handlers[bit as usize].as_deref_mut() {
                handler();
                invoked += 1;
            }
        }
        invoked
    }

    /// Single non-blocking pass over whatever is pending.
    pub fn run_pending(&mut self) -> usize {
        let mask = self.level.take();
        self.dispatch(mask)
    }

    /// Worker loop; the only suspension point is the level's wait.
    pub async fn run(&mut self) -> Infallible {
        loop {
            let mask = self.level.wait().await;
            #[cfg(feature = "defmt")]
            defmt::trace!("dispatch level {} mask {=u32:#x}", self.priority, mask);
            self.dispatch(mask);
        }
    }
}

//==================================================================================DEFERRED_DISPATCHER
/// Startup-time registry over `LEVELS` priority levels.
///
/// Level 0 is the lowest priority; mapping levels onto executor priorities
/// is up to the firmware.
pub struct DeferredDispatcher<'a, const LEVELS: usize> {
    workers: [LevelWorker<'a>; LEVELS],
}

impl<'a, const LEVELS: usize> DeferredDispatcher<'a, LEVELS> {
    pub fn new(levels: &'a [DispatchLevel; LEVELS]) -> Self {
        Self {
            workers: core::array::from_fn(|index| LevelWorker::new(&levels[index], index as u8)),
        }
    }

    /// Attach `handler` to the next free bit of `level`.
    pub fn register(
        &mut self,
        level: usize,
        handler: &'a mut dyn FnMut(),
    ) -> Result<DispatchHandle<'a>, DispatchError> {
        self.workers
            .get_mut(level)
            .ok_or(DispatchError::InvalidLevel { level })?
            .register(handler)
    }

    pub fn worker_mut(&mut self, level: usize) -> Option<&mut LevelWorker<'a>> {
        self.workers.get_mut(level)
    }

    /// Freeze the registrations and hand out one worker per level.
    pub fn into_workers(self) -> [LevelWorker<'a>; LEVELS] {
        self.workers
    }
}
