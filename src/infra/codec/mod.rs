//! Payload codecs: raw bit access and scaled signals.
pub mod bits;
pub mod signal;
