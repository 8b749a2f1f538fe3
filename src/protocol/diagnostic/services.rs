//! UDS (ISO 14229) identifiers: service ids, negative response codes and the
//! sub-function enums the server decodes.

pub const SID_DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
pub const SID_ECU_RESET: u8 = 0x11;
pub const SID_CLEAR_DTC: u8 = 0x14;
pub const SID_READ_DTC: u8 = 0x19;
pub const SID_READ_DID: u8 = 0x22;
pub const SID_READ_ADDRESS: u8 = 0x23;
pub const SID_READ_SCALING_DID: u8 = 0x24;
pub const SID_SECURITY_ACCESS: u8 = 0x27;
pub const SID_COMMUNICATION_CONTROL: u8 = 0x28;
pub const SID_AUTHENTICATION: u8 = 0x29;
pub const SID_READ_DID_PERIODIC: u8 = 0x2A;
pub const SID_DYNAMICALLY_DEFINE_DID: u8 = 0x2C;
pub const SID_WRITE_DID: u8 = 0x2E;
pub const SID_IO_CONTROL: u8 = 0x2F;
pub const SID_ROUTINE_CONTROL: u8 = 0x31;
pub const SID_REQUEST_DOWNLOAD: u8 = 0x34;
pub const SID_REQUEST_UPLOAD: u8 = 0x35;
pub const SID_TRANSFER_DATA: u8 = 0x36;
pub const SID_TRANSFER_EXIT: u8 = 0x37;
pub const SID_FILE_TRANSFER: u8 = 0x38;
pub const SID_WRITE_ADDRESS: u8 = 0x3D;
pub const SID_TESTER_PRESENT: u8 = 0x3E;
pub const SID_NEGATIVE_RESPONSE: u8 = 0x7F;

/// Added to a request's service id to form its positive response id.
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Sub-function bit asking the server not to answer positively.
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

//==================================================================================NRC
/// Negative response codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Nrc {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    InvalidLengthOrFormat,
    ResponseTooLong,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    NoResponseFromSubnet,
    FailurePreventsExecution,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededAttempts,
    RequiredTimeDelayNotExpired,
    UploadDownloadNotAccepted,
    TransferDataSuspended,
    GeneralProgrammingFailure,
    WrongBlockSequenceCounter,
    ResponsePending,
    SubFunctionNotSupportedInSession,
    ServiceNotSupportedInSession,
    /// Any code without a dedicated variant, 0x81..=0x93 included.
    Other(u8),
}

impl Nrc {
    pub const fn as_u8(self) -> u8 {
        match self {
            Nrc::GeneralReject => 0x10,
            Nrc::ServiceNotSupported => 0x11,
            Nrc::SubFunctionNotSupported => 0x12,
            Nrc::InvalidLengthOrFormat => 0x13,
            Nrc::ResponseTooLong => 0x14,
            Nrc::BusyRepeatRequest => 0x21,
            Nrc::ConditionsNotCorrect => 0x22,
            Nrc::RequestSequenceError => 0x24,
            Nrc::NoResponseFromSubnet => 0x25,
            Nrc::FailurePreventsExecution => 0x26,
            Nrc::RequestOutOfRange => 0x31,
            Nrc::SecurityAccessDenied => 0x33,
            Nrc::InvalidKey => 0x35,
            Nrc::ExceededAttempts => 0x36,
            Nrc::RequiredTimeDelayNotExpired => 0x37,
            Nrc::UploadDownloadNotAccepted => 0x70,
            Nrc::TransferDataSuspended => 0x71,
            Nrc::GeneralProgrammingFailure => 0x72,
            Nrc::WrongBlockSequenceCounter => 0x73,
            Nrc::ResponsePending => 0x78,
            Nrc::SubFunctionNotSupportedInSession => 0x7E,
            Nrc::ServiceNotSupportedInSession => 0x7F,
            Nrc::Other(code) => code,
        }
    }

    pub const fn from_u8(code: u8) -> Self {
        match code {
            0x10 => Nrc::GeneralReject,
            0x11 => Nrc::ServiceNotSupported,
            0x12 => Nrc::SubFunctionNotSupported,
            0x13 => Nrc::InvalidLengthOrFormat,
            0x14 => Nrc::ResponseTooLong,
            0x21 => Nrc::BusyRepeatRequest,
            0x22 => Nrc::ConditionsNotCorrect,
            0x24 => Nrc::RequestSequenceError,
            0x25 => Nrc::NoResponseFromSubnet,
            0x26 => Nrc::FailurePreventsExecution,
            0x31 => Nrc::RequestOutOfRange,
            0x33 => Nrc::SecurityAccessDenied,
            0x35 => Nrc::InvalidKey,
            0x36 => Nrc::ExceededAttempts,
            0x37 => Nrc::RequiredTimeDelayNotExpired,
            0x70 => Nrc::UploadDownloadNotAccepted,
            0x71 => Nrc::TransferDataSuspended,
            0x72 => Nrc::GeneralProgrammingFailure,
            0x73 => Nrc::WrongBlockSequenceCounter,
            0x78 => Nrc::ResponsePending,
            0x7E => Nrc::SubFunctionNotSupportedInSession,
            0x7F => Nrc::ServiceNotSupportedInSession,
            other => Nrc::Other(other),
        }
    }
}

//==================================================================================SESSION
/// Diagnostic session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionKind {
    Default,
    Programming,
    Extended,
    SafetySystem,
    Other(u8),
}

impl SessionKind {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => SessionKind::Default,
            0x02 => SessionKind::Programming,
            0x03 => SessionKind::Extended,
            0x04 => SessionKind::SafetySystem,
            other => SessionKind::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            SessionKind::Default => 0x01,
            SessionKind::Programming => 0x02,
            SessionKind::Extended => 0x03,
            SessionKind::SafetySystem => 0x04,
            SessionKind::Other(value) => value,
        }
    }
}

//==================================================================================RESET
/// ECU reset sub-function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetKind {
    Hard,
    KeyOffOn,
    Soft,
    EnableRapidShutdown,
    DisableRapidShutdown,
    Other(u8),
}

impl ResetKind {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => ResetKind::Hard,
            0x02 => ResetKind::KeyOffOn,
            0x03 => ResetKind::Soft,
            0x04 => ResetKind::EnableRapidShutdown,
            0x05 => ResetKind::DisableRapidShutdown,
            other => ResetKind::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            ResetKind::Hard => 0x01,
            ResetKind::KeyOffOn => 0x02,
            ResetKind::Soft => 0x03,
            ResetKind::EnableRapidShutdown => 0x04,
            ResetKind::DisableRapidShutdown => 0x05,
            ResetKind::Other(value) => value,
        }
    }
}

//==================================================================================ROUTINE
/// Routine control sub-function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RoutineControl {
    Start,
    Stop,
    RequestResult,
    Other(u8),
}

impl RoutineControl {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => RoutineControl::Start,
            0x02 => RoutineControl::Stop,
            0x03 => RoutineControl::RequestResult,
            other => RoutineControl::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            RoutineControl::Start => 0x01,
            RoutineControl::Stop => 0x02,
            RoutineControl::RequestResult => 0x03,
            RoutineControl::Other(value) => value,
        }
    }
}
