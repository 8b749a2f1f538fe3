//! Building blocks independent of any bus protocol: bit and signal codecs and
//! the deferred dispatch primitive that moves interrupt work into tasks.
pub mod codec;
pub mod dispatch;
