//! Typed, layered views over packet byte buffers.
//!
//! Strata models a network packet as one shared byte buffer and a chain of interpreters, each
//! viewing a sub-range of the buffer as one protocol layer. Layers are parsed lazily, may be
//! created in front of or behind existing layers, and keep their ranges consistent while bytes
//! are inserted or erased through any of them.
//!
//! The following example parses an Ethernet frame and walks to its innermost layer:
//!
//! ```rust
//! use strata_core::protocols::ethernet::EthernetPacket;
//! use strata_core::protocols::udp::UdpType;
//!
//! let frame = hex::decode(concat!(
//!     "ffffffffffff", "020000000001", "0800",
//!     "4500001e00004000401100000a0000010a000002",
//!     "0035d431000a0000", "6869",
//! ))
//! .unwrap();
//! let eth = EthernetPacket::create_from(&frame);
//! let udp = eth.find::<UdpType>().unwrap();
//! assert_eq!(udp.dst_port().unwrap(), 54321);
//! assert_eq!(udp.last().unwrap().data().to_vec(), b"hi".to_vec());
//! ```
//!
//! New protocols implement [`PacketType`] and, if their next layer is named by a header field,
//! [`RegistryKeyed`](packet::RegistryKeyed) with a [`PacketRegistry`](packet::PacketRegistry).

pub mod config;
pub mod memory;
pub mod packet;
pub mod protocols;
pub mod utils;

pub use self::memory::buffer::ByteBuffer;
pub use self::packet::{ConcretePacket, Factory, Packet, PacketData, PacketError, PacketType};

#[macro_use]
extern crate lazy_static;
