//! Packet type descriptors.
//!
//! [`data`] and [`generic`] are protocol-agnostic building blocks. [`ethernet`], [`ipv4`] and
//! [`udp`] describe a minimal network stack on top of them and double as examples of how
//! protocol crates plug into the interpreter chain: fixed-size headers via
//! [`fixed_next_range`](crate::packet::fixed_next_range) and next-protocol dispatch via
//! [`RegistryKeyed`](crate::packet::RegistryKeyed).

pub mod data;
pub mod ethernet;
pub mod generic;
pub mod ipv4;
pub mod udp;
