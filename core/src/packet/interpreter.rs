//! Protocol type descriptors and per-node dispatch.

use crate::packet::factory::Factory;
use crate::packet::handle::{ConcretePacket, Packet};

use std::any::TypeId;
use std::io;
use std::marker::PhantomData;
use std::ops::Range;

use anyhow::Result;

/// Describes one protocol to the interpreter chain.
///
/// A type descriptor is never instantiated. Its associated functions are called with a handle to
/// the interpreter being operated on, and every method has a default suitable for a protocol
/// without header fields or sub-packets.
///
/// Ranges returned by [`next_packet_range`](PacketType::next_packet_range) are relative to the
/// packet's own data, i.e. `0..packet.size()` covers the whole packet.
pub trait PacketType: Sized + 'static {
    /// Human readable protocol name.
    const NAME: &'static str;

    /// Bytes allocated for a freshly created packet of this type.
    fn init_size() -> usize {
        0
    }

    /// Header portion of [`init_size`](PacketType::init_size) for protocols with a trailer.
    fn init_head_size() -> usize {
        Self::init_size()
    }

    /// Fills in default field values of a freshly allocated, zero-filled packet.
    fn init(_packet: &ConcretePacket<Self>) -> Result<()> {
        Ok(())
    }

    /// Returns where the next sub-packet lies, or `None` if this packet has none.
    fn next_packet_range(_packet: &ConcretePacket<Self>) -> Result<Option<Range<usize>>> {
        Ok(None)
    }

    /// Returns the factory of the next sub-packet if it can be determined.
    fn next_packet_type(_packet: &ConcretePacket<Self>) -> Result<Option<Factory>> {
        Ok(None)
    }

    /// Recomputes derived fields (lengths, checksums).
    fn finalize(_packet: &ConcretePacket<Self>) -> Result<()> {
        Ok(())
    }

    /// Writes a human readable rendering of the packet.
    fn dump(packet: &ConcretePacket<Self>, w: &mut dyn io::Write) -> Result<()> {
        writeln!(w, "{}: {} bytes", Self::NAME, packet.size())?;
        Ok(())
    }
}

/// Type-erased operations of one [`PacketType`], stored by every interpreter node.
pub(crate) trait TypeDispatch: Send + Sync {
    fn packet_type_id(&self) -> TypeId;
    fn name(&self) -> &'static str;
    fn init_size(&self) -> usize;
    fn init_head_size(&self) -> usize;
    fn init(&self, packet: &Packet) -> Result<()>;
    fn next_packet_range(&self, packet: &Packet) -> Result<Option<Range<usize>>>;
    fn next_packet_type(&self, packet: &Packet) -> Result<Option<Factory>>;
    fn finalize(&self, packet: &Packet) -> Result<()>;
    fn dump(&self, packet: &Packet, w: &mut dyn io::Write) -> Result<()>;
}

pub(crate) struct TypeOps<T>(PhantomData<fn() -> T>);

impl<T: PacketType> TypeOps<T> {
    pub(crate) const VTABLE: TypeOps<T> = TypeOps(PhantomData);

    fn typed(packet: &Packet) -> ConcretePacket<T> {
        ConcretePacket::from_packet_unchecked(packet.clone())
    }
}

impl<T: PacketType> TypeDispatch for TypeOps<T> {
    fn packet_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn name(&self) -> &'static str {
        T::NAME
    }

    fn init_size(&self) -> usize {
        T::init_size()
    }

    fn init_head_size(&self) -> usize {
        T::init_head_size()
    }

    fn init(&self, packet: &Packet) -> Result<()> {
        T::init(&Self::typed(packet))
    }

    fn next_packet_range(&self, packet: &Packet) -> Result<Option<Range<usize>>> {
        T::next_packet_range(&Self::typed(packet))
    }

    fn next_packet_type(&self, packet: &Packet) -> Result<Option<Factory>> {
        T::next_packet_type(&Self::typed(packet))
    }

    fn finalize(&self, packet: &Packet) -> Result<()> {
        T::finalize(&Self::typed(packet))
    }

    fn dump(&self, packet: &Packet, w: &mut dyn io::Write) -> Result<()> {
        T::dump(&Self::typed(packet), w)
    }
}

/// A node of the interpreter chain.
///
/// `begin` and `end` are absolute offsets into the packet's buffer. `prev` and `next` are slot
/// indices within the owning store.
#[derive(Clone, Debug)]
pub(crate) struct Interpreter {
    pub(crate) begin: usize,
    pub(crate) end: usize,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
    pub(crate) factory: Factory,
}

impl Interpreter {
    pub(crate) fn new(begin: usize, end: usize, factory: Factory) -> Interpreter {
        Interpreter {
            begin,
            end,
            prev: None,
            next: None,
            factory,
        }
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.end - self.begin
    }
}
