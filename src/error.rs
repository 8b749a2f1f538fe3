//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (bit codec, signal scaling,
//! deferred dispatch registration, receive layout, segmented transport,
//! diagnostic server).
use thiserror_no_std::Error;

//==================================================================================BITREADER_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors raised during bitwise buffer reads.
pub enum BitReaderError {
    /// Attempted to read past the end of the buffer.
    #[error("Attempted to read out of bounds -> asked: {asked}, available: {available}")]
    OutOfBounds { asked: usize, available: usize },
    /// Requested more bits than the target type can hold.
    #[error("Cannot read more than {max} bits. Requested: {asked}")]
    TooLongForType { max: u8, asked: u8 },
}

//==================================================================================BITWRITER_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors raised during bitwise writes into a buffer.
pub enum BitWriterError {
    /// Attempted to write beyond the provided capacity.
    #[error("Attempted to write out of bounds -> asked: {asked}, available: {available}")]
    OutOfBounds { asked: usize, available: usize },
    /// Field is too large for the provided type.
    #[error("Cannot write more than {max} bits. Requested: {asked}")]
    TooLongForType { max: u8, asked: u8 },
}

//==================================================================================SIGNAL_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Failures while packing or unpacking a scaled signal.
pub enum SignalError {
    /// Raw value does not fit in the signal width.
    #[error("Raw value {raw} does not fit in {width} bits")]
    RawOutOfRange { raw: u64, width: u8 },
    /// Physical value cannot be represented once scaled.
    #[error("Physical value out of range for a {width}-bit signal")]
    PhysicalOutOfRange { width: u8 },
    /// Bit-level read failed.
    #[error(transparent)]
    Read(#[from] BitReaderError),
    /// Bit-level write failed.
    #[error(transparent)]
    Write(#[from] BitWriterError),
}

//==================================================================================DISPATCH_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Startup-time registration errors of the deferred dispatcher.
pub enum DispatchError {
    /// Every slot of the priority level is already taken.
    #[error("Priority level {level} has no free handler slot")]
    LevelFull { level: u8 },
    /// The priority level does not exist.
    #[error("Priority level {level} does not exist")]
    InvalidLevel { level: usize },
}

//==================================================================================RECEIVE_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Bus layouts the receive dispatcher cannot service.
pub enum RxError {
    /// More buses than the notification flag set tracks.
    #[error("{buses} buses configured, the notification flags track {max}")]
    TooManyBuses { buses: usize, max: usize },
    /// A peripheral has FIFOs beyond the notification flag set.
    #[error("Bus {bus} has {fifos} FIFOs, the notification flags track {max}")]
    TooManyFifos { bus: usize, fifos: usize, max: usize },
    /// The diagnostic bus index has no bus.
    #[error("Diagnostic bus {bus} does not exist")]
    InvalidDiagnosticBus { bus: usize },
}

//==================================================================================ISOTP_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Segmented transport failures.
pub enum IsoTpError {
    /// Payload larger than the link buffer (or the 12-bit length field).
    #[error("Payload of {len} bytes exceeds the {capacity} byte buffer")]
    Overflow { len: usize, capacity: usize },
    /// A segmented transmission is still running.
    #[error("Transmission already in progress")]
    InProgress,
    /// Every mailbox of the bus was busy.
    #[error("No free mailbox on the bus")]
    BusBusy,
    /// A consecutive frame carried an unexpected sequence number.
    #[error("Wrong sequence number: expected {expected}, got {received}")]
    WrongSequence { expected: u8, received: u8 },
    /// The peer did not answer within the protocol timeout.
    #[error("Transport timeout")]
    Timeout,
    /// The peer reported a receive buffer overflow or sent too many waits.
    #[error("Transfer aborted by peer")]
    Aborted,
    /// No complete message is waiting in the receive buffer.
    #[error("No complete message available")]
    NoData,
    /// Frame does not carry a valid protocol control information byte.
    #[error("Invalid frame")]
    InvalidFrame,
}

//==================================================================================DIAGNOSTIC_ERRORS
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Results of the diagnostic server that are not protocol rejections.
pub enum DiagError {
    /// The server was used before `init`.
    #[error("Diagnostic server not initialized")]
    NotInitialized,
    /// A completed request still waits for the periodic poll.
    #[error("Diagnostic transport busy")]
    NotReady,
    /// The encoded response does not fit in a single frame.
    #[error("Response of {len} bytes exceeds single-frame capacity")]
    ResponseTooLong { len: usize },
    /// Segmented transport failure.
    #[error(transparent)]
    Transport(#[from] IsoTpError),
}
