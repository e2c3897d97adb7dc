//! Transport implementations.
//!
//! This module contains concrete implementations of the `Transport` and
//! `DestinationAdmin` traits.

pub mod memory;

pub use memory::{InMemoryTransport, TransportStats};
