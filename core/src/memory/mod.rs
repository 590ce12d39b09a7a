//! Byte storage shared by the interpreters of one packet.

pub mod buffer;
