//! Ports
//!
//! Discovery types exchanged with pod drivers and the traits through which
//! the control plane reaches rack controllers and commissioning.

pub mod ports;

pub use ports::*;
