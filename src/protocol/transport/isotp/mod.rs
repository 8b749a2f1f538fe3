//! ISO 15765-2 (ISO-TP) link: carries payloads up to 4095 bytes over classic
//! CAN frames.
//!
//! Frame layout (first byte = protocol control information):
//!
//! | PCI nibble | Frame             | Remaining header                       |
//! |------------|-------------------|----------------------------------------|
//! | `0`        | single frame      | low nibble: length (1..=7)             |
//! | `1`        | first frame       | 12-bit length over low nibble + byte 1 |
//! | `2`        | consecutive frame | low nibble: sequence number            |
//! | `3`        | flow control      | status, block size, STmin              |
//!
//! The link is not tied to a bus: incoming frames are pushed with
//! [`IsoTpLink::on_can_message`], outgoing frames leave through a
//! [`FrameTx`], and all timers are driven by [`IsoTpLink::poll`].
use crate::error::IsoTpError;
use crate::protocol::transport::can_frame::{CanFrame, MessageId, MAX_FRAME_LEN};
use crate::protocol::transport::traits::can_peripheral::FrameTx;
use crate::protocol::transport::traits::clock::elapsed_ms;
use crate::protocol::transport::{
    DEFAULT_BLOCK_SIZE, DEFAULT_ST_MIN_MS, ISOTP_MAX_WAIT_FRAMES, ISOTP_N_BS_TIMEOUT_MS,
    ISOTP_N_CR_TIMEOUT_MS,
};

/// Largest length a first frame can announce.
pub const MAX_MESSAGE_LEN: usize = 0x0FFF;

const PCI_SINGLE: u8 = 0x0;
const PCI_FIRST: u8 = 0x1;
const PCI_CONSECUTIVE: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

const SINGLE_FRAME_MAX: usize = 7;
const FIRST_FRAME_DATA: usize = 6;
const CONSECUTIVE_FRAME_DATA: usize = 7;

//==================================================================================CONFIG
/// Per-link parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsoTpConfig {
    /// Identifier of every frame this link sends.
    pub tx_id: MessageId,
    /// Block size advertised in our flow control frames.
    pub block_size: u8,
    /// STmin advertised in our flow control frames (ms, 0..=127).
    pub st_min_ms: u8,
    pub n_bs_timeout_ms: u32,
    pub n_cr_timeout_ms: u32,
    /// Fill byte for unused payload bytes; `None` sends the shortest DLC.
    pub padding: Option<u8>,
}

impl IsoTpConfig {
    pub const fn new(tx_id: MessageId) -> Self {
        Self {
            tx_id,
            block_size: DEFAULT_BLOCK_SIZE,
            st_min_ms: DEFAULT_ST_MIN_MS,
            n_bs_timeout_ms: ISOTP_N_BS_TIMEOUT_MS,
            n_cr_timeout_ms: ISOTP_N_CR_TIMEOUT_MS,
            padding: None,
        }
    }

    pub const fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = block_size;
        self
    }

    pub const fn with_st_min_ms(mut self, st_min_ms: u8) -> Self {
        self.st_min_ms = st_min_ms;
        self
    }

    pub const fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    pub const fn with_timeouts(mut self, n_bs_ms: u32, n_cr_ms: u32) -> Self {
        self.n_bs_timeout_ms = n_bs_ms;
        self.n_cr_timeout_ms = n_cr_ms;
        self
    }
}

//==================================================================================STATES
/// Outcome of feeding one frame to the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxEvent {
    /// Frame not relevant in the current state (stray consecutive frame,
    /// flow control while nothing is being sent).
    Ignored,
    /// Part of a multi-frame message, more frames expected.
    InProgress,
    /// Flow control from the peer was applied to the running transmission.
    FlowControl,
    /// A complete message is waiting in the receive buffer.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RxState {
    Idle,
    Receiving {
        expected: usize,
        received: usize,
        next_sn: u8,
        block_left: u8,
        last_frame_ms: u32,
    },
    Full {
        len: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxState {
    Idle,
    WaitFlowControl {
        since_ms: u32,
        waits: u8,
    },
    Sending {
        block_left: Option<u8>,
        st_min_ms: u8,
        last_frame_ms: Option<u32>,
        waits: u8,
    },
}

//==================================================================================LINK
/// One ISO-TP link with fixed transmit and receive buffers.
pub struct IsoTpLink<const TX: usize = 256, const RX: usize = 256> {
    config: IsoTpConfig,
    tx_buffer: [u8; TX],
    tx_len: usize,
    tx_offset: usize,
    tx_next_sn: u8,
    tx_state: TxState,
    rx_buffer: [u8; RX],
    rx_state: RxState,
}

impl<const TX: usize, const RX: usize> IsoTpLink<TX, RX> {
    pub const fn new(config: IsoTpConfig) -> Self {
        Self {
            config,
            tx_buffer: [0; TX],
            tx_len: 0,
            tx_offset: 0,
            tx_next_sn: 0,
            tx_state: TxState::Idle,
            rx_buffer: [0; RX],
            rx_state: RxState::Idle,
        }
    }

    pub fn config(&self) -> &IsoTpConfig {
        &self.config
    }

    /// Drop any transfer in flight and rebind to `config`.
    pub fn reset(&mut self, config: IsoTpConfig) {
        self.config = config;
        self.tx_state = TxState::Idle;
        self.tx_len = 0;
        self.tx_offset = 0;
        self.rx_state = RxState::Idle;
    }

    /// A complete message waits to be taken with [`receive`](Self::receive).
    pub fn has_message(&self) -> bool {
        matches!(self.rx_state, RxState::Full { .. })
    }

    /// A multi-frame message is being received.
    pub fn is_receiving(&self) -> bool {
        matches!(self.rx_state, RxState::Receiving { .. })
    }

    /// A multi-frame message is being sent.
    pub fn is_sending(&self) -> bool {
        self.tx_state != TxState::Idle
    }

    //==================================================================================RECEIVE
    /// Process one frame addressed to this link.
    pub fn on_can_message(
        &mut self,
        data: &[u8],
        tx: &mut impl FrameTx,
        now_ms: u32,
    ) -> Result<RxEvent, IsoTpError> {
        let Some(&pci) = data.first() else {
            return Err(IsoTpError::InvalidFrame);
        };

        match pci >> 4 {
            PCI_SINGLE => self.on_single_frame(data),
            PCI_FIRST => self.on_first_frame(data, tx, now_ms),
            PCI_CONSECUTIVE => self.on_consecutive_frame(data, tx, now_ms),
            PCI_FLOW_CONTROL => self.on_flow_control(data, now_ms),
            _ => Err(IsoTpError::InvalidFrame),
        }
    }

    fn on_single_frame(&mut self, data: &[u8]) -> Result<RxEvent, IsoTpError> {
        let len = (data[0] & 0x0F) as usize;
        if len == 0 || len > SINGLE_FRAME_MAX || len + 1 > data.len() {
            return Err(IsoTpError::InvalidFrame);
        }
        if len > RX {
            self.rx_state = RxState::Idle;
            return Err(IsoTpError::Overflow { len, capacity: RX });
        }
        #[cfg(feature = "defmt")]
        if self.is_receiving() {
            defmt::warn!("isotp: single frame interrupts a segmented reception");
        }
        self.rx_buffer[..len].copy_from_slice(&data[1..=len]);
        self.rx_state = RxState::Full { len };
        Ok(RxEvent::Complete)
    }

    fn on_first_frame(
        &mut self,
        data: &[u8],
        tx: &mut impl FrameTx,
        now_ms: u32,
    ) -> Result<RxEvent, IsoTpError> {
        if data.len() < MAX_FRAME_LEN {
            return Err(IsoTpError::InvalidFrame);
        }
        let expected = (((data[0] & 0x0F) as usize) << 8) | data[1] as usize;
        if expected <= SINGLE_FRAME_MAX {
            return Err(IsoTpError::InvalidFrame);
        }
        if expected > RX {
            self.rx_state = RxState::Idle;
            self.send_flow_control(tx, FlowStatus::Overflow);
            #[cfg(feature = "defmt")]
            defmt::warn!("isotp: first frame of {} bytes exceeds buffer", expected);
            return Err(IsoTpError::Overflow {
                len: expected,
                capacity: RX,
            });
        }

        self.rx_buffer[..FIRST_FRAME_DATA].copy_from_slice(&data[2..2 + FIRST_FRAME_DATA]);
        self.rx_state = RxState::Receiving {
            expected,
            received: FIRST_FRAME_DATA,
            next_sn: 1,
            block_left: self.config.block_size,
            last_frame_ms: now_ms,
        };
        self.send_flow_control(tx, FlowStatus::ContinueToSend);
        Ok(RxEvent::InProgress)
    }

    fn on_consecutive_frame(
        &mut self,
        data: &[u8],
        tx: &mut impl FrameTx,
        now_ms: u32,
    ) -> Result<RxEvent, IsoTpError> {
        let RxState::Receiving {
            expected,
            received,
            next_sn,
            block_left,
            ..
        } = self.rx_state
        else {
            return Ok(RxEvent::Ignored);
        };

        let sn = data[0] & 0x0F;
        if sn != next_sn {
            self.rx_state = RxState::Idle;
            #[cfg(feature = "defmt")]
            defmt::warn!("isotp: sequence {} expected, got {}", next_sn, sn);
            return Err(IsoTpError::WrongSequence {
                expected: next_sn,
                received: sn,
            });
        }

        let copy_len = (expected - received)
            .min(CONSECUTIVE_FRAME_DATA)
            .min(data.len() - 1);
        self.rx_buffer[received..received + copy_len].copy_from_slice(&data[1..1 + copy_len]);
        let received = received + copy_len;

        if received >= expected {
            self.rx_state = RxState::Full { len: expected };
            return Ok(RxEvent::Complete);
        }

        let mut block_left = block_left;
        if self.config.block_size != 0 {
            block_left = block_left.saturating_sub(1);
            if block_left == 0 {
                self.send_flow_control(tx, FlowStatus::ContinueToSend);
                block_left = self.config.block_size;
            }
        }
        self.rx_state = RxState::Receiving {
            expected,
            received,
            next_sn: (sn + 1) & 0x0F,
            block_left,
            last_frame_ms: now_ms,
        };
        Ok(RxEvent::InProgress)
    }

    fn on_flow_control(&mut self, data: &[u8], now_ms: u32) -> Result<RxEvent, IsoTpError> {
        let waits = match self.tx_state {
            TxState::WaitFlowControl { waits, .. } => waits,
            _ => return Ok(RxEvent::Ignored),
        };
        if data.len() < 3 {
            return Err(IsoTpError::InvalidFrame);
        }

        match data[0] & 0x0F {
            0 => {
                let block_size = data[1];
                self.tx_state = TxState::Sending {
                    block_left: (block_size != 0).then_some(block_size),
                    st_min_ms: st_min_to_ms(data[2]),
                    last_frame_ms: None,
                    waits,
                };
                Ok(RxEvent::FlowControl)
            }
            1 => {
                if waits >= ISOTP_MAX_WAIT_FRAMES {
                    self.abort_transmission();
                    return Err(IsoTpError::Aborted);
                }
                self.tx_state = TxState::WaitFlowControl {
                    since_ms: now_ms,
                    waits: waits + 1,
                };
                Ok(RxEvent::FlowControl)
            }
            2 => {
                #[cfg(feature = "defmt")]
                defmt::warn!("isotp: peer reported buffer overflow");
                self.abort_transmission();
                Err(IsoTpError::Aborted)
            }
            _ => {
                self.abort_transmission();
                Err(IsoTpError::InvalidFrame)
            }
        }
    }

    /// Copy the received message into `out` and free the receive buffer.
    pub fn receive(&mut self, out: &mut [u8]) -> Result<usize, IsoTpError> {
        let RxState::Full { len } = self.rx_state else {
            return Err(IsoTpError::NoData);
        };
        if out.len() < len {
            return Err(IsoTpError::Overflow {
                len,
                capacity: out.len(),
            });
        }
        out[..len].copy_from_slice(&self.rx_buffer[..len]);
        self.rx_state = RxState::Idle;
        Ok(len)
    }

    //==================================================================================TRANSMIT
    /// Start sending `payload`: a single frame right away, or a first frame
    /// followed by consecutive frames released by [`poll`](Self::poll).
    pub fn send(
        &mut self,
        payload: &[u8],
        tx: &mut impl FrameTx,
        now_ms: u32,
    ) -> Result<(), IsoTpError> {
        if self.is_sending() {
            return Err(IsoTpError::InProgress);
        }
        let len = payload.len();
        if len > TX || len > MAX_MESSAGE_LEN {
            return Err(IsoTpError::Overflow {
                len,
                capacity: TX.min(MAX_MESSAGE_LEN),
            });
        }
        if len == 0 {
            return Err(IsoTpError::InvalidFrame);
        }

        if len <= SINGLE_FRAME_MAX {
            let mut data = [0u8; MAX_FRAME_LEN];
            data[0] = (PCI_SINGLE << 4) | len as u8;
            data[1..=len].copy_from_slice(payload);
            return self.transmit(tx, data, len + 1);
        }

        let mut data = [0u8; MAX_FRAME_LEN];
        data[0] = (PCI_FIRST << 4) | ((len >> 8) as u8 & 0x0F);
        data[1] = len as u8;
        data[2..].copy_from_slice(&payload[..FIRST_FRAME_DATA]);
        self.transmit(tx, data, MAX_FRAME_LEN)?;

        self.tx_buffer[..len].copy_from_slice(payload);
        self.tx_len = len;
        self.tx_offset = FIRST_FRAME_DATA;
        self.tx_next_sn = 1;
        self.tx_state = TxState::WaitFlowControl {
            since_ms: now_ms,
            waits: 0,
        };
        Ok(())
    }

    /// Drive consecutive frame pacing and the N_Bs / N_Cr timeouts.
    pub fn poll(&mut self, tx: &mut impl FrameTx, now_ms: u32) -> Result<(), IsoTpError> {
        if let RxState::Receiving { last_frame_ms, .. } = self.rx_state {
            if elapsed_ms(now_ms, last_frame_ms) > self.config.n_cr_timeout_ms {
                #[cfg(feature = "defmt")]
                defmt::warn!("isotp: reception timed out");
                self.rx_state = RxState::Idle;
                return Err(IsoTpError::Timeout);
            }
        }

        match self.tx_state {
            TxState::Idle => Ok(()),
            TxState::WaitFlowControl { since_ms, .. } => {
                if elapsed_ms(now_ms, since_ms) > self.config.n_bs_timeout_ms {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("isotp: no flow control from peer");
                    self.abort_transmission();
                    return Err(IsoTpError::Timeout);
                }
                Ok(())
            }
            TxState::Sending { .. } => self.send_consecutive(tx, now_ms),
        }
    }

    fn send_consecutive(&mut self, tx: &mut impl FrameTx, now_ms: u32) -> Result<(), IsoTpError> {
        let mut sent = false;
        while let TxState::Sending {
            block_left,
            st_min_ms,
            last_frame_ms,
            waits,
        } = self.tx_state
        {
            if let Some(last) = last_frame_ms {
                if elapsed_ms(now_ms, last) < st_min_ms as u32 {
                    return Ok(());
                }
            }
            // One frame per poll when the peer asked for a separation time.
            if sent && st_min_ms > 0 {
                return Ok(());
            }

            let chunk = (self.tx_len - self.tx_offset).min(CONSECUTIVE_FRAME_DATA);
            let mut data = [0u8; MAX_FRAME_LEN];
            data[0] = (PCI_CONSECUTIVE << 4) | self.tx_next_sn;
            data[1..1 + chunk].copy_from_slice(&self.tx_buffer[self.tx_offset..self.tx_offset + chunk]);
            if self.transmit(tx, data, chunk + 1).is_err() {
                // Mailboxes full: same frame on the next poll.
                return Ok(());
            }

            sent = true;
            self.tx_offset += chunk;
            self.tx_next_sn = (self.tx_next_sn + 1) & 0x0F;

            if self.tx_offset >= self.tx_len {
                self.tx_state = TxState::Idle;
                return Ok(());
            }

            self.tx_state = match block_left {
                Some(1) => TxState::WaitFlowControl {
                    since_ms: now_ms,
                    waits,
                },
                Some(left) => TxState::Sending {
                    block_left: Some(left - 1),
                    st_min_ms,
                    last_frame_ms: Some(now_ms),
                    waits,
                },
                None => TxState::Sending {
                    block_left: None,
                    st_min_ms,
                    last_frame_ms: Some(now_ms),
                    waits,
                },
            };
        }
        Ok(())
    }

    fn abort_transmission(&mut self) {
        self.tx_state = TxState::Idle;
        self.tx_len = 0;
        self.tx_offset = 0;
    }

    //==================================================================================FRAMES
    fn send_flow_control(&mut self, tx: &mut impl FrameTx, status: FlowStatus) {
        let mut data = [0u8; MAX_FRAME_LEN];
        data[0] = (PCI_FLOW_CONTROL << 4) | status as u8;
        data[1] = self.config.block_size;
        data[2] = self.config.st_min_ms.min(0x7F);
        if self.transmit(tx, data, 3).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("isotp: flow control not sent, bus busy");
        }
    }

    fn transmit(
        &self,
        tx: &mut impl FrameTx,
        mut data: [u8; MAX_FRAME_LEN],
        used: usize,
    ) -> Result<(), IsoTpError> {
        let len = match self.config.padding {
            Some(fill) => {
                data[used..].fill(fill);
                MAX_FRAME_LEN
            }
            None => used,
        };
        let frame = CanFrame::from_payload(self.config.tx_id.to_id(), data, len);
        if tx.transmit(&frame) {
            Ok(())
        } else {
            Err(IsoTpError::BusBusy)
        }
    }
}

#[derive(Clone, Copy)]
#[repr(u8)]
enum FlowStatus {
    ContinueToSend = 0,
    Overflow = 2,
}

/// STmin byte to whole milliseconds; the 100 µs range rounds up to 1 ms.
fn st_min_to_ms(raw: u8) -> u8 {
    match raw {
        0x00..=0x7F => raw,
        0xF1..=0xF9 => 1,
        _ => 0x7F,
    }
}
