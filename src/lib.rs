//! `ecu-canio` library: the CAN communication core shared by the controllers
//! of a vehicle, in a `no_std` environment. The crate exposes the
//! infrastructure modules (deferred dispatch, bit and signal codec) and the
//! protocol logic (periodic transmit, receive routing, ISO-TP and the UDS
//! diagnostic server).
#![no_std]
//==================================================================================
/// Table types shared by the generated per-controller configuration: pack
/// and unpack entries.
pub mod core;
/// Errors of every layer (bit codec, dispatch registration, transport,
/// diagnostics).
pub mod error;
/// Deferred dispatch and the bit-level codec.
pub mod infra;
/// Transmit scheduling, receive routing, ISO-TP transport and diagnostics.
pub mod protocol;
//==================================================================================
