//! UDS diagnostic server on top of an ISO-TP link.
//!
//! Frames addressed to the server are pushed with
//! [`DiagnosticServer::process_frame`] (usually by the receive dispatcher);
//! complete requests are handled by [`DiagnosticServer::poll`], which also
//! drives the transport timers and the session keep-alive. Responses are
//! single frames: anything longer than seven bytes is refused with
//! [`DiagError::ResponseTooLong`].
//!
//! Application policy (session authorisation, resets, routines, data
//! identifiers, downloads) lives behind [`DiagnosticHooks`].
pub mod hooks;
pub mod services;

pub use hooks::{DefaultHooks, DiagnosticHooks, DownloadRequest, SessionDecision};
pub use services::{Nrc, ResetKind, RoutineControl, SessionKind};

use crate::error::DiagError;
use crate::protocol::receiver::DiagnosticIntake;
use crate::protocol::transport::can_frame::MessageId;
use crate::protocol::transport::isotp::{IsoTpConfig, IsoTpLink, RxEvent};
use crate::protocol::transport::traits::can_peripheral::FrameTx;
use crate::protocol::transport::traits::clock::elapsed_ms;
use crate::protocol::transport::SESSION_TIMEOUT_MS;

use hooks::{DID_DATA_CAPACITY, ROUTINE_STATUS_CAPACITY};
use services::*;

/// Largest request the server reassembles.
pub const REQUEST_CAPACITY: usize = 256;

/// Largest encoded response: one single frame.
pub const MAX_RESPONSE_LEN: usize = 7;

/// Block length announced in the `RequestDownload` positive response.
pub const DEFAULT_MAX_BLOCK_LEN: u8 = 64;

//==================================================================================CONFIG
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiagnosticConfig {
    /// Identifier the tester sends requests on.
    pub request_id: MessageId,
    /// Identifier responses are sent on.
    pub response_id: MessageId,
    pub session_timeout_ms: u32,
    pub max_block_len: u8,
    /// Transport parameters. `tx_id` is always replaced by `response_id`.
    pub isotp: IsoTpConfig,
}

impl DiagnosticConfig {
    pub const fn new(request_id: MessageId, response_id: MessageId) -> Self {
        Self {
            request_id,
            response_id,
            session_timeout_ms: SESSION_TIMEOUT_MS,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
            isotp: IsoTpConfig::new(response_id),
        }
    }

    pub const fn with_session_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.session_timeout_ms = timeout_ms;
        self
    }

    pub const fn with_max_block_len(mut self, len: u8) -> Self {
        self.max_block_len = len;
        self
    }

    pub const fn with_isotp(mut self, isotp: IsoTpConfig) -> Self {
        self.isotp = isotp;
        self
    }

    const fn link_config(&self) -> IsoTpConfig {
        let mut config = self.isotp;
        config.tx_id = self.response_id;
        config
    }
}

//==================================================================================INTAKE
/// What happened to a frame handed to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Intake {
    /// Part of a segmented request, more frames expected.
    InProgress,
    /// A complete request waits for the next poll.
    RequestReady,
    /// Flow control for a response being sent.
    FlowControl,
    /// Nothing to do with this frame in the current state.
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Download {
    request: DownloadRequest,
    next_address: u32,
    written: u32,
    /// Last accepted block counter; the next one must be this plus one.
    counter: u8,
}

//==================================================================================SERVER
pub struct DiagnosticServer<H> {
    config: DiagnosticConfig,
    hooks: H,
    link: IsoTpLink<REQUEST_CAPACITY, REQUEST_CAPACITY>,
    initialized: bool,
    session: SessionKind,
    last_keepalive_ms: u32,
    download: Option<Download>,
}

impl<H: DiagnosticHooks> DiagnosticServer<H> {
    /// Unusable until [`init`](Self::init).
    pub fn new(config: DiagnosticConfig, hooks: H) -> Self {
        Self {
            config,
            hooks,
            link: IsoTpLink::new(config.link_config()),
            initialized: false,
            session: SessionKind::Default,
            last_keepalive_ms: 0,
            download: None,
        }
    }

    /// Bind the transport to the response id and enter the default session.
    pub fn init(&mut self, now_ms: u32) {
        self.link.reset(self.config.link_config());
        self.session = SessionKind::Default;
        self.last_keepalive_ms = now_ms;
        self.download = None;
        self.initialized = true;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "diagnostic server up, responses on {=u32:#x}",
            self.config.response_id.raw()
        );
    }

    pub fn config(&self) -> &DiagnosticConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn current_session(&self) -> SessionKind {
        self.session
    }

    /// Milliseconds since the last tester present or session change.
    pub fn time_since_keepalive(&self, now_ms: u32) -> u32 {
        elapsed_ms(now_ms, self.last_keepalive_ms)
    }

    pub fn download_active(&self) -> bool {
        self.download.is_some()
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    //==================================================================================INTAKE
    /// Feed one raw request frame into the transport.
    ///
    /// `Err(DiagError::NotReady)` while a complete request has not been
    /// consumed by [`poll`](Self::poll); the frame was not looked at.
    pub fn process_frame<T: FrameTx>(
        &mut self,
        data: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<Intake, DiagError> {
        if !self.initialized {
            return Err(DiagError::NotInitialized);
        }
        if self.link.has_message() {
            return Err(DiagError::NotReady);
        }
        let intake = match self.link.on_can_message(data, tx, now_ms)? {
            RxEvent::Complete => Intake::RequestReady,
            RxEvent::InProgress => Intake::InProgress,
            RxEvent::FlowControl => Intake::FlowControl,
            RxEvent::Ignored => Intake::Ignored,
        };
        Ok(intake)
    }

    //==================================================================================POLL
    /// Periodic pass: transport timers, at most one request, session expiry.
    ///
    /// A transport error is reported after the request and the session
    /// timer have been handled.
    pub fn poll<T: FrameTx>(&mut self, tx: &mut T, now_ms: u32) -> Result<(), DiagError> {
        if !self.initialized {
            return Err(DiagError::NotInitialized);
        }
        let transport = self.link.poll(tx, now_ms);

        let mut handled = Ok(());
        if self.link.has_message() {
            let mut request = [0u8; REQUEST_CAPACITY];
            match self.link.receive(&mut request) {
                Ok(len) => handled = self.dispatch(&request[..len], tx, now_ms),
                Err(err) => handled = Err(err.into()),
            }
        }

        self.check_session_expiry(now_ms);
        transport?;
        handled
    }

    fn check_session_expiry(&mut self, now_ms: u32) {
        if self.session != SessionKind::Default
            && self.time_since_keepalive(now_ms) > self.config.session_timeout_ms
        {
            #[cfg(feature = "defmt")]
            defmt::info!("diagnostic session {} expired", self.session);
            self.session = SessionKind::Default;
        }
    }

    /// Route one complete request to its service.
    fn dispatch<T: FrameTx>(
        &mut self,
        request: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let Some((&sid, payload)) = request.split_first() else {
            return Ok(());
        };
        if !self.hooks.service_enabled(sid) {
            return self.send_negative(sid, Nrc::ServiceNotSupported, tx, now_ms);
        }

        match sid {
            SID_TESTER_PRESENT => self.tester_present(payload, tx, now_ms),
            SID_DIAGNOSTIC_SESSION_CONTROL => self.session_control(payload, tx, now_ms),
            SID_ECU_RESET => self.ecu_reset(payload, tx, now_ms),
            SID_ROUTINE_CONTROL => self.routine_control(payload, tx, now_ms),
            SID_READ_DID => self.read_did(payload, tx, now_ms),
            SID_REQUEST_DOWNLOAD => self.request_download(payload, tx, now_ms),
            SID_TRANSFER_DATA => self.transfer_data(payload, tx, now_ms),
            SID_TRANSFER_EXIT => self.transfer_exit(tx, now_ms),
            _ => self.send_negative(sid, Nrc::ServiceNotSupported, tx, now_ms),
        }
    }

    //==================================================================================SERVICES
    fn tester_present<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        self.last_keepalive_ms = now_ms;
        let suppress = payload
            .first()
            .is_some_and(|sub| sub & SUPPRESS_POSITIVE_RESPONSE != 0);
        if suppress {
            return Ok(());
        }
        self.send_positive(SID_TESTER_PRESENT, &[0x00], tx, now_ms)
    }

    fn session_control<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let Some(&requested) = payload.first() else {
            return self.send_negative(
                SID_DIAGNOSTIC_SESSION_CONTROL,
                Nrc::InvalidLengthOrFormat,
                tx,
                now_ms,
            );
        };
        let requested = SessionKind::from_u8(requested);

        match self.hooks.session_change_allowed(self.session, requested) {
            SessionDecision::Allow => {
                #[cfg(feature = "defmt")]
                defmt::info!("diagnostic session {} -> {}", self.session, requested);
                self.session = requested;
                self.last_keepalive_ms = now_ms;
                self.send_positive(SID_DIAGNOSTIC_SESSION_CONTROL, &[requested.as_u8()], tx, now_ms)
            }
            SessionDecision::Deny(nrc) => {
                self.send_negative(SID_DIAGNOSTIC_SESSION_CONTROL, nrc, tx, now_ms)
            }
        }
    }

    fn ecu_reset<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let Some(&kind) = payload.first() else {
            return self.send_negative(SID_ECU_RESET, Nrc::InvalidLengthOrFormat, tx, now_ms);
        };
        let kind = ResetKind::from_u8(kind);

        match self.hooks.ecu_reset(kind) {
            Ok(()) => {
                self.send_positive(SID_ECU_RESET, &[kind.as_u8()], tx, now_ms)?;
                self.hooks.perform_reset(kind);
                Ok(())
            }
            Err(nrc) => self.send_negative(SID_ECU_RESET, nrc, tx, now_ms),
        }
    }

    fn routine_control<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let [control, id_hi, id_lo, args @ ..] = payload else {
            return self.send_negative(SID_ROUTINE_CONTROL, Nrc::InvalidLengthOrFormat, tx, now_ms);
        };
        let control = RoutineControl::from_u8(*control);
        let routine_id = u16::from_be_bytes([*id_hi, *id_lo]);

        let mut status = [0u8; ROUTINE_STATUS_CAPACITY];
        match self
            .hooks
            .routine_control(control, routine_id, args, &mut status)
        {
            Ok(len) => {
                let Some(status) = status.get(..len) else {
                    return Err(DiagError::ResponseTooLong { len: 4 + len });
                };
                let mut response = [0u8; MAX_RESPONSE_LEN - 1];
                response[..3].copy_from_slice(&[control.as_u8(), *id_hi, *id_lo]);
                response[3..3 + len].copy_from_slice(status);
                self.send_positive(SID_ROUTINE_CONTROL, &response[..3 + len], tx, now_ms)
            }
            Err(nrc) => self.send_negative(SID_ROUTINE_CONTROL, nrc, tx, now_ms),
        }
    }

    /// The vehicle tester sends the identifier little-endian.
    fn read_did<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let &[lo, hi] = payload else {
            return self.send_negative(SID_READ_DID, Nrc::InvalidLengthOrFormat, tx, now_ms);
        };
        let did = u16::from_le_bytes([lo, hi]);

        let mut data = [0u8; DID_DATA_CAPACITY];
        match self.hooks.read_did(did, &mut data) {
            Ok(len) => match data.get(..len) {
                Some(record) => self.send_positive(SID_READ_DID, record, tx, now_ms),
                None => Err(DiagError::ResponseTooLong { len: 1 + len }),
            },
            Err(nrc) => self.send_negative(SID_READ_DID, nrc, tx, now_ms),
        }
    }

    //==================================================================================DOWNLOAD
    fn request_download<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        if self.download.is_some() {
            return self.send_negative(
                SID_REQUEST_DOWNLOAD,
                Nrc::ConditionsNotCorrect,
                tx,
                now_ms,
            );
        }
        let Some(request) = parse_download_request(payload) else {
            return self.send_negative(
                SID_REQUEST_DOWNLOAD,
                Nrc::InvalidLengthOrFormat,
                tx,
                now_ms,
            );
        };

        match self.hooks.download_start(&request) {
            Ok(()) => {
                self.download = Some(Download {
                    request,
                    next_address: request.address,
                    written: 0,
                    counter: 0,
                });
                #[cfg(feature = "defmt")]
                defmt::info!(
                    "download of {} bytes at {=u32:#x} started",
                    request.size,
                    request.address
                );
                // Length format 0x10: one byte of maxNumberOfBlockLength.
                let max_block_len = self.config.max_block_len;
                self.send_positive(SID_REQUEST_DOWNLOAD, &[0x10, max_block_len], tx, now_ms)
            }
            Err(nrc) => self.send_negative(SID_REQUEST_DOWNLOAD, nrc, tx, now_ms),
        }
    }

    fn transfer_data<T: FrameTx>(
        &mut self,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let [counter, data @ ..] = payload else {
            return self.send_negative(SID_TRANSFER_DATA, Nrc::InvalidLengthOrFormat, tx, now_ms);
        };
        if data.is_empty() {
            return self.send_negative(SID_TRANSFER_DATA, Nrc::InvalidLengthOrFormat, tx, now_ms);
        }
        let Some(mut download) = self.download else {
            return self.send_negative(SID_TRANSFER_DATA, Nrc::RequestSequenceError, tx, now_ms);
        };
        if *counter != download.counter.wrapping_add(1) {
            return self.send_negative(
                SID_TRANSFER_DATA,
                Nrc::WrongBlockSequenceCounter,
                tx,
                now_ms,
            );
        }
        let len = data.len() as u32;
        if download.written.saturating_add(len) > download.request.size {
            return self.send_negative(
                SID_TRANSFER_DATA,
                Nrc::TransferDataSuspended,
                tx,
                now_ms,
            );
        }

        if let Err(nrc) = self.hooks.download_block(download.next_address, data) {
            return self.send_negative(SID_TRANSFER_DATA, nrc, tx, now_ms);
        }
        download.counter = *counter;
        download.next_address = download.next_address.wrapping_add(len);
        download.written += len;
        self.download = Some(download);
        self.send_positive(SID_TRANSFER_DATA, &[*counter], tx, now_ms)
    }

    fn transfer_exit<T: FrameTx>(&mut self, tx: &mut T, now_ms: u32) -> Result<(), DiagError> {
        if self.download.take().is_none() {
            return self.send_negative(SID_TRANSFER_EXIT, Nrc::GeneralReject, tx, now_ms);
        }
        self.hooks.download_finished();
        self.send_positive(SID_TRANSFER_EXIT, &[], tx, now_ms)
    }

    //==================================================================================RESPONSES
    /// Send `[sid + 0x40, payload..]`.
    pub fn send_positive<T: FrameTx>(
        &mut self,
        sid: u8,
        payload: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        let len = 1 + payload.len();
        if len > MAX_RESPONSE_LEN {
            return Err(DiagError::ResponseTooLong { len });
        }
        let mut response = [0u8; MAX_RESPONSE_LEN];
        response[0] = sid.wrapping_add(POSITIVE_RESPONSE_OFFSET);
        response[1..len].copy_from_slice(payload);
        self.respond(&response[..len], tx, now_ms)
    }

    /// Send `[0x7F, sid, nrc]`.
    pub fn send_negative<T: FrameTx>(
        &mut self,
        sid: u8,
        nrc: Nrc,
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        #[cfg(feature = "defmt")]
        defmt::debug!("diagnostic service {=u8:#x} refused: {}", sid, nrc);
        self.respond(&[SID_NEGATIVE_RESPONSE, sid, nrc.as_u8()], tx, now_ms)
    }

    fn respond<T: FrameTx>(
        &mut self,
        response: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<(), DiagError> {
        if !self.initialized {
            return Err(DiagError::NotInitialized);
        }
        self.link.send(response, tx, now_ms)?;
        Ok(())
    }
}

impl<H: DiagnosticHooks> DiagnosticIntake for DiagnosticServer<H> {
    fn intake<T: FrameTx>(
        &mut self,
        data: &[u8],
        tx: &mut T,
        now_ms: u32,
    ) -> Result<Intake, DiagError> {
        self.process_frame(data, tx, now_ms)
    }
}

/// `[dataFormat, addrAndLenFormat, address.., size..]`, big-endian fields of
/// 1 to 4 bytes. The low nibble of the format byte is the address length.
fn parse_download_request(payload: &[u8]) -> Option<DownloadRequest> {
    let [data_format, format, rest @ ..] = payload else {
        return None;
    };
    let address_len = (format & 0x0F) as usize;
    let size_len = (format >> 4) as usize;
    if !(1..=4).contains(&address_len) || !(1..=4).contains(&size_len) {
        return None;
    }
    if rest.len() != address_len + size_len {
        return None;
    }
    let (address, size) = rest.split_at(address_len);
    Some(DownloadRequest {
        data_format: *data_format,
        address: be_u32(address),
        size: be_u32(size),
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &byte| (acc << 8) | byte as u32)
}
