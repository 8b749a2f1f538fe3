//! Transport layer: the classic CAN frame, the peripheral/clock abstractions
//! and the ISO-TP segmented transport used by diagnostics.
//!
//! ## Timing constants
//!
//! Defaults applied by [`isotp::IsoTpConfig`] and the diagnostic server. They
//! can be overridden per controller through the configuration structs.

pub mod can_frame;
pub mod isotp;
pub mod traits;

/// Time without tester-present after which a non-default diagnostic session
/// falls back to the default session (ms).
pub const SESSION_TIMEOUT_MS: u32 = 100;

/// Maximum wait for a flow control frame after a first frame or a completed
/// block (ISO 15765-2 N_Bs, ms).
pub const ISOTP_N_BS_TIMEOUT_MS: u32 = 100;

/// Maximum gap between two consecutive frames of an incoming message
/// (ISO 15765-2 N_Cr, ms).
pub const ISOTP_N_CR_TIMEOUT_MS: u32 = 100;

/// Consecutive frames the peer may send before waiting for the next flow
/// control. 0 means the whole message in one block.
pub const DEFAULT_BLOCK_SIZE: u8 = 8;

/// Minimum separation time requested from the peer between consecutive
/// frames (ms).
pub const DEFAULT_ST_MIN_MS: u8 = 0;

/// Flow control WAIT frames tolerated before a transmission is aborted.
pub const ISOTP_MAX_WAIT_FRAMES: u8 = 1;
