//! Testing utilities and mock implementations
//!
//! Lets the session and agent be tested without an MQTT broker or the
//! DCCS credential service.

pub mod mocks;

pub use mocks::*;
