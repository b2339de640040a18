//! rrc - RRC connection establishment messages carried over the simulated Uu interface

pub mod build;
mod messages;

pub use messages::*;
