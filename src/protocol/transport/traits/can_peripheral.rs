//! Minimal view of a CAN controller: a fixed set of transmit mailboxes and
//! two or more receive FIFOs. Register-level drivers implement it; the core
//! never blocks on it.
use crate::protocol::transport::can_frame::CanFrame;

/// Transmit mailboxes and receive FIFOs of one CAN controller.
pub trait CanPeripheral {
    /// Number of hardware transmit slots.
    fn mailbox_count(&self) -> usize;

    fn mailbox_is_free(&self, mailbox: usize) -> bool;

    /// Load `frame` into a free mailbox and request transmission.
    /// Returns `false` if the mailbox could not take it.
    fn load_mailbox(&mut self, mailbox: usize, frame: &CanFrame) -> bool;

    /// Number of hardware receive queues.
    fn fifo_count(&self) -> usize;

    /// Frames currently waiting in `fifo`.
    fn fifo_fill_level(&self, fifo: usize) -> usize;

    fn fifo_is_empty(&self, fifo: usize) -> bool {
        self.fifo_fill_level(fifo) == 0
    }

    /// Pop the oldest frame of `fifo`.
    fn receive(&mut self, fifo: usize) -> Option<CanFrame>;

    /// Re-enable the "FIFO has data" interrupt after draining.
    fn rearm_notifications(&mut self, fifo: usize);

    /// Read and clear the hardware overrun flag of `fifo`.
    fn take_overrun(&mut self, _fifo: usize) -> bool {
        false
    }
}

/// Non-blocking frame send primitive.
///
/// `false` means every mailbox was busy; the caller keeps the frame and
/// retries later.
pub trait FrameTx {
    fn transmit(&mut self, frame: &CanFrame) -> bool;
}

impl<T: FrameTx + ?Sized> FrameTx for &mut T {
    fn transmit(&mut self, frame: &CanFrame) -> bool {
        (**self).transmit(frame)
    }
}
