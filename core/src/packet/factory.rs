//! Type-erased interpreter construction.
//!
//! A [`Factory`] stands in for a [`PacketType`] whose concrete type is not known statically,
//! e.g. a next-protocol type resolved through a [`PacketRegistry`](crate::packet::PacketRegistry)
//! at run time. Factories are `Copy` and compare equal iff they build the same type.

use crate::memory::buffer::ByteBuffer;
use crate::packet::handle::{NextContent, Packet};
use crate::packet::interpreter::{PacketType, TypeDispatch, TypeOps};
use crate::packet::PacketError;

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::{bail, Result};

/// Whether a newly created packet has its type's `init` applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Init,
    NoInit,
}

/// Type-erased constructor handle of one [`PacketType`].
#[derive(Clone, Copy)]
pub struct Factory {
    ops: &'static dyn TypeDispatch,
}

impl Factory {
    /// Returns the factory of packet type `T`.
    pub fn of<T: PacketType>() -> Factory {
        Factory {
            ops: &TypeOps::<T>::VTABLE,
        }
    }

    #[inline]
    pub(crate) fn ops(&self) -> &'static dyn TypeDispatch {
        self.ops
    }

    /// Returns the identity of the packet type built by this factory.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.ops.packet_type_id()
    }

    /// Returns the name of the packet type built by this factory.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.ops.name()
    }

    #[inline]
    pub fn init_size(&self) -> usize {
        self.ops.init_size()
    }

    #[inline]
    pub fn init_head_size(&self) -> usize {
        self.ops.init_head_size()
    }

    /// Creates a new packet of the type's initial size.
    pub fn create(&self) -> Result<Packet> {
        self.create_with_size(self.init_size(), InitMode::Init)
    }

    /// Creates a new zero-filled packet of `size` bytes.
    pub fn create_with_size(&self, size: usize, mode: InitMode) -> Result<Packet> {
        self.check_size(size)?;
        let packet = Packet::new_root(ByteBuffer::zeroed(size), *self);
        self.apply_init(&packet, mode)?;
        Ok(packet)
    }

    /// Creates a new packet over a copy of `data`. No `init` is applied.
    pub fn create_from(&self, data: &[u8]) -> Packet {
        Packet::new_root(ByteBuffer::from_bytes(data), *self)
    }

    /// Replaces whatever follows `packet` with a new packet of the type's initial size.
    pub fn create_after(&self, packet: &Packet) -> Result<Packet> {
        self.create_after_with_size(packet, self.init_size(), InitMode::Init)
    }

    /// Replaces whatever follows `packet` with `size` zero bytes interpreted by this type.
    ///
    /// Any interpreters after `packet` are dropped and the bytes of its next packet range are
    /// replaced. Fails if `packet` has no next packet range.
    pub fn create_after_with_size(
        &self,
        packet: &Packet,
        size: usize,
        mode: InitMode,
    ) -> Result<Packet> {
        self.check_size(size)?;
        let created = packet.splice_next(NextContent::Zeroed(size), *self)?;
        self.apply_init(&created, mode)?;
        Ok(created)
    }

    /// Replaces whatever follows `packet` with a copy of `data` interpreted by this type.
    pub fn create_after_from(&self, packet: &Packet, data: &[u8]) -> Result<Packet> {
        packet.splice_next(NextContent::Bytes(data), *self)
    }

    /// Wraps `packet` in a new outer packet of this type.
    ///
    /// Every interpreter before `packet` is dropped. With [`InitMode::Init`] the type's header
    /// and trailer are inserted around the wrapped bytes before `init` runs.
    pub fn create_before(&self, packet: &Packet, mode: InitMode) -> Result<Packet> {
        let created = packet.wrap(*self)?;
        if mode == InitMode::Init {
            let head = self.init_head_size();
            let tail = self.init_size().saturating_sub(head);
            created.grow_around(head, tail)?;
            self.ops.init(&created)?;
        }
        Ok(created)
    }

    /// Inserts a new packet of this type directly in front of `packet`. Unlike
    /// [`create_before`](Factory::create_before) the packets before `packet` are kept and grow
    /// with the inserted header and trailer.
    pub fn create_insert_before(&self, packet: &Packet, mode: InitMode) -> Result<Packet> {
        let created = packet.insert_before(*self)?;
        if mode == InitMode::Init {
            let head = self.init_head_size();
            let tail = self.init_size().saturating_sub(head);
            created.grow_around(head, tail)?;
            self.ops.init(&created)?;
        }
        Ok(created)
    }

    /// Interprets the next packet range of `packet` as this type, without `init`.
    pub fn parse_next(&self, packet: &Packet) -> Result<Packet> {
        packet.parse_next_as(*self)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size < self.init_size() {
            bail!(PacketError::TooSmall {
                name: self.name(),
                size,
                min: self.init_size(),
            });
        }
        Ok(())
    }

    fn apply_init(&self, packet: &Packet, mode: InitMode) -> Result<()> {
        match mode {
            InitMode::Init => self.ops.init(packet),
            InitMode::NoInit => Ok(()),
        }
    }
}

impl PartialEq for Factory {
    fn eq(&self, other: &Factory) -> bool {
        self.type_id() == other.type_id()
    }
}

impl Eq for Factory {}

impl Hash for Factory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id().hash(state);
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Factory").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::data::DataPacketType;
    use crate::protocols::generic::GenericPacketType;

    #[test]
    fn test_factory_identity() {
        let data = Factory::of::<DataPacketType>();
        let generic = Factory::of::<GenericPacketType<4, 2>>();
        assert_eq!(data, Factory::of::<DataPacketType>());
        assert_ne!(data, generic);
        assert_ne!(generic, Factory::of::<GenericPacketType<2, 4>>());
        assert_eq!(generic.init_size(), 6);
        assert_eq!(generic.init_head_size(), 4);
        assert_eq!(data.type_id(), TypeId::of::<DataPacketType>());
    }

    #[test]
    fn test_create_type_erased() {
        let factory = Factory::of::<GenericPacketType<4, 2>>();
        let packet = factory.create().unwrap();
        assert!(packet.is::<GenericPacketType<4, 2>>());
        assert_eq!(packet.size(), 6);

        let err = factory.create_with_size(3, InitMode::Init).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PacketError>(),
            Some(&PacketError::TooSmall {
                name: factory.name(),
                size: 3,
                min: 6
            })
        );

        let payload = Factory::of::<DataPacketType>()
            .create_after_from(&packet, b"xyz")
            .unwrap();
        assert_eq!(packet.size(), 9);
        assert_eq!(payload.data().to_vec(), b"xyz".to_vec());
        assert_eq!(packet.next().unwrap(), payload);
    }

    #[test]
    fn test_parse_next() {
        let packet = Factory::of::<GenericPacketType<2, 0>>().create_from(&[1, 2, 3, 4]);
        let next = Factory::of::<DataPacketType>().parse_next(&packet).unwrap();
        assert_eq!(next.data().to_vec(), vec![3, 4]);
        assert_eq!(next.prev().unwrap(), packet);
    }
}
