//! Packet interpreter chains.
//!
//! A packet is one shared byte buffer plus an ordered chain of interpreters, outermost header
//! first. Every interpreter views a sub-range of the buffer through the lens of one protocol
//! [`PacketType`]. Byte edits made through any interpreter's [`PacketData`] view re-index the
//! ranges of every other interpreter of the same packet, so handles stay valid across edits.
//!
//! The structure of this module follows the layering of the buffer beneath it:
//!
//! - [`store`] owns the buffer and the chain and is the only place bytes are inserted or removed.
//! - [`interpreter`] defines the [`PacketType`] descriptor trait and per-node dispatch.
//! - [`Factory`] creates interpreters of a type that is not statically known.
//! - [`Packet`] and [`ConcretePacket`] are the user-facing handles.
//! - [`PacketRegistry`] maps wire-format keys to factories for next-protocol dispatch.

pub mod annotation;
pub mod data;
pub mod factory;
pub mod handle;
pub mod interpreter;
pub mod registry;
pub(crate) mod store;

pub use self::annotation::Annotation;
pub use self::data::PacketData;
pub use self::factory::{Factory, InitMode};
pub use self::handle::{ConcretePacket, Packet};
pub use self::interpreter::PacketType;
pub use self::registry::{
    fixed_next_range, registry_key, registry_next_type, PacketRegistry, RegistryKeyed,
};
pub use self::store::NodeId;

use thiserror::Error;

/// Errors raised by packet chain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Access of {len} bytes at offset {offset} exceeds packet size {size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("Invalid packet chain operation")]
    InvalidChain,

    #[error("Packet interpreter is no longer linked into a chain")]
    Detached,

    #[error("Packet is a {actual}, not a {expected}")]
    WrongType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Key {key} not found in {registry} registry")]
    NotRegistered { registry: &'static str, key: String },

    #[error("{name} needs at least {min} bytes, got {size}")]
    TooSmall {
        name: &'static str,
        size: usize,
        min: usize,
    },

    #[error("Interpreter chain exceeds {0} packets")]
    ChainTooLong(usize),
}

/// Returns the [`PacketError`] carried by `err`, if any.
pub fn packet_error(err: &anyhow::Error) -> Option<&PacketError> {
    err.downcast_ref::<PacketError>()
}
