//! Application side of the diagnostic server. Every method has a default, so
//! an ECU only overrides the services it actually supports. A service left
//! on its default answers "service not supported".
use super::services::{
    Nrc, ResetKind, RoutineControl, SessionKind, SID_DIAGNOSTIC_SESSION_CONTROL,
    SID_TESTER_PRESENT,
};

/// Room for routine status bytes in a single-frame `0x71` response.
pub const ROUTINE_STATUS_CAPACITY: usize = 3;

/// Room for record bytes in a single-frame `0x62` response.
pub const DID_DATA_CAPACITY: usize = 6;

/// Answer of the session authorisation hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionDecision {
    Allow,
    Deny(Nrc),
}

/// Decoded `RequestDownload` parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DownloadRequest {
    /// Compression/encryption method byte, passed through untouched.
    pub data_format: u8,
    pub address: u32,
    pub size: u32,
}

pub trait DiagnosticHooks {
    /// Authorise a `current -> requested` session transition.
    fn session_change_allowed(
        &mut self,
        _current: SessionKind,
        _requested: SessionKind,
    ) -> SessionDecision {
        SessionDecision::Allow
    }

    /// `false` answers the service with "service not supported".
    fn service_enabled(&mut self, _sid: u8) -> bool {
        true
    }

    /// Accept or refuse a reset. The positive response is sent before
    /// [`perform_reset`](Self::perform_reset) runs.
    fn ecu_reset(&mut self, _kind: ResetKind) -> Result<(), Nrc> {
        Err(Nrc::ServiceNotSupported)
    }

    fn perform_reset(&mut self, _kind: ResetKind) {}

    /// Run a routine. Status bytes go into `status`; the returned length is
    /// appended to the positive response.
    fn routine_control(
        &mut self,
        _control: RoutineControl,
        _routine_id: u16,
        _args: &[u8],
        _status: &mut [u8; ROUTINE_STATUS_CAPACITY],
    ) -> Result<usize, Nrc> {
        Err(Nrc::ServiceNotSupported)
    }

    /// Fill `data` with the record of `did` and return its length.
    fn read_did(&mut self, _did: u16, _data: &mut [u8; DID_DATA_CAPACITY]) -> Result<usize, Nrc> {
        Err(Nrc::ServiceNotSupported)
    }

    /// Validate a download (address range, size).
    fn download_start(&mut self, _request: &DownloadRequest) -> Result<(), Nrc> {
        Err(Nrc::ServiceNotSupported)
    }

    /// Store one block at `address`.
    fn download_block(&mut self, _address: u32, _data: &[u8]) -> Result<(), Nrc> {
        Ok(())
    }

    fn download_finished(&mut self) {}
}

/// Services a bare ECU answers: session control and tester present.
pub const BASE_SERVICES: [u8; 2] = [SID_DIAGNOSTIC_SESSION_CONTROL, SID_TESTER_PRESENT];

/// Hooks of an ECU without application services: sessions allowed, every
/// other service refused as not supported, whatever its payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

impl DiagnosticHooks for DefaultHooks {
    fn service_enabled(&mut self, sid: u8) -> bool {
        BASE_SERVICES.contains(&sid)
    }
}
