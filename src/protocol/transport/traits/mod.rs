//! Abstraction traits used by the core: the CAN peripheral of one bus, the
//! frame send primitive and the millisecond time source.
pub mod can_peripheral;
pub mod clock;
