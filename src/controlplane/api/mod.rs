//! API Module
//!
//! REST API for pods, machines and rack controllers.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
