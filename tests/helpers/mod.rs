/// Test doubles for the CAN peripheral, the clock and the frame sink used by
/// the integration scenarios.
use ecu_canio::core::MessageId;
use ecu_canio::protocol::transport::{
    can_frame::CanFrame,
    traits::{
        can_peripheral::{CanPeripheral, FrameTx},
        clock::MonotonicClock,
    },
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[allow(dead_code)]
/// In-memory controller: transmit mailboxes that stay busy until
/// `complete` (unless `auto_complete`), and receive FIFOs fed by `inject`.
pub struct MockPeripheral {
    mailboxes: Vec<Option<CanFrame>>,
    fifos: Vec<VecDeque<CanFrame>>,
    /// Every frame loaded into a mailbox, in order.
    pub sent: Vec<CanFrame>,
    /// Mailboxes free themselves right after loading.
    pub auto_complete: bool,
}

#[allow(dead_code)]
impl MockPeripheral {
    pub fn new(mailboxes: usize, fifos: usize) -> Self {
        Self {
            mailboxes: vec![None; mailboxes],
            fifos: vec![VecDeque::new(); fifos],
            sent: Vec::new(),
            auto_complete: false,
        }
    }

    /// A peripheral whose mailboxes never fill up.
    pub fn always_free(fifos: usize) -> Self {
        let mut peripheral = Self::new(3, fifos);
        peripheral.auto_complete = true;
        peripheral
    }

    /// The bus acknowledged every pending frame.
    pub fn complete(&mut self) {
        self.mailboxes.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn inject(&mut self, fifo: usize, frame: CanFrame) {
        self.fifos[fifo].push_back(frame);
    }

    pub fn sent_ids(&self) -> Vec<u32> {
        self.sent.iter().map(CanFrame::raw_id).collect()
    }

    /// Payloads sent on `id`, in order.
    pub fn sent_on(&self, id: u32) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|frame| frame.raw_id() == id)
            .map(|frame| frame.bytes().to_vec())
            .collect()
    }
}

impl CanPeripheral for MockPeripheral {
    fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    fn mailbox_is_free(&self, mailbox: usize) -> bool {
        self.mailboxes[mailbox].is_none()
    }

    fn load_mailbox(&mut self, mailbox: usize, frame: &CanFrame) -> bool {
        self.sent.push(*frame);
        if !self.auto_complete {
            self.mailboxes[mailbox] = Some(*frame);
        }
        true
    }

    fn fifo_count(&self) -> usize {
        self.fifos.len()
    }

    fn fifo_fill_level(&self, fifo: usize) -> usize {
        self.fifos[fifo].len()
    }

    fn receive(&mut self, fifo: usize) -> Option<CanFrame> {
        self.fifos[fifo].pop_front()
    }

    fn rearm_notifications(&mut self, _fifo: usize) {}
}

#[derive(Clone, Default)]
#[allow(dead_code)]
/// Clock moved by hand; clones share the same time.
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn set(&self, now_ms: u32) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
#[allow(dead_code)]
/// Frame sink accepting everything.
pub struct RecordingTx {
    pub frames: Vec<CanFrame>,
}

impl FrameTx for RecordingTx {
    fn transmit(&mut self, frame: &CanFrame) -> bool {
        self.frames.push(*frame);
        true
    }
}

#[allow(dead_code)]
/// Build a frame carrying `data` on `id`.
pub fn frame(id: MessageId, data: &[u8]) -> CanFrame {
    let mut payload = [0u8; 8];
    payload[..data.len()].copy_from_slice(data);
    CanFrame::from_payload(id.to_id(), payload, data.len())
}
