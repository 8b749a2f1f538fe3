//! High-level components of the communication core: periodic transmit,
//! receive routing, the diagnostic server, runtime glue and the CAN/ISO-TP
//! transport.
pub mod diagnostic;
pub mod receiver;
pub mod runtime;
pub mod scheduler;
pub mod transport;
