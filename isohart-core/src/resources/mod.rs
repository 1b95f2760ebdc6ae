//! Resources that can be attached to a hart's system bus.

pub mod ram;
