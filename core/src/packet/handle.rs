//! User-facing packet handles.
//!
//! A [`Packet`] references one interpreter of one packet. Handles are cheap to clone; all clones
//! share the same buffer and chain, and the packet lives as long as any handle to any of its
//! interpreters. [`ConcretePacket<T>`] is a [`Packet`] statically known to be interpreted as `T`.
//!
//! Navigation comes in two flavours: the plain methods (`next`, `prev`, `cast`, ...) report
//! failures as errors, the `_opt`/`try_` variants return `None` instead.

use crate::config;
use crate::memory::buffer::ByteBuffer;
use crate::packet::annotation::Annotation;
use crate::packet::data::PacketData;
use crate::packet::factory::{Factory, InitMode};
use crate::packet::interpreter::PacketType;
use crate::packet::store::{NodeId, PacketStore};
use crate::packet::{packet_error, PacketError};
use crate::protocols::data::DataPacketType;

use std::any::TypeId;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::ops::{Deref, Range};
use std::rc::Rc;

use anyhow::{bail, Result};

pub(crate) type StoreRef = Rc<RefCell<PacketStore>>;

/// Content placed into a next packet range by the `create_after` family.
pub(crate) enum NextContent<'a> {
    Zeroed(usize),
    Bytes(&'a [u8]),
}

/// Handle to one interpreter of a packet.
#[derive(Clone)]
pub struct Packet {
    store: StoreRef,
    node: NodeId,
    factory: Factory,
}

impl Packet {
    /// Creates a packet store over `buffer` with a single root interpreter covering all of it.
    pub(crate) fn new_root(buffer: ByteBuffer, factory: Factory) -> Packet {
        let len = buffer.len();
        let mut store = PacketStore::new(buffer);
        let node = store.append_interpreter(0..len, factory);
        Packet {
            store: Rc::new(RefCell::new(store)),
            node,
            factory,
        }
    }

    fn sibling(&self, node: NodeId) -> Result<Packet> {
        let factory = self.store.borrow().factory(node)?;
        Ok(Packet {
            store: Rc::clone(&self.store),
            node,
            factory,
        })
    }

    #[inline]
    pub(crate) fn store(&self) -> &StoreRef {
        &self.store
    }

    /// Returns the identity of the referenced interpreter within its packet.
    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Returns `false` once the referenced interpreter has been truncated from its chain.
    pub fn is_valid(&self) -> bool {
        self.store.borrow().contains(self.node)
    }

    fn ensure_linked(&self) -> Result<()> {
        self.store.borrow().node(self.node).map(|_| ())
    }

    /// Returns the factory of the interpreter's packet type.
    #[inline]
    pub fn factory(&self) -> Factory {
        self.factory
    }

    /// Returns the identity of the interpreter's packet type.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.factory.type_id()
    }

    /// Returns the name of the interpreter's packet type.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.factory.name()
    }

    /// Returns the view onto this interpreter's bytes.
    #[inline]
    pub fn data(&self) -> PacketData<'_> {
        PacketData::new(self)
    }

    /// Returns the number of bytes interpreted by this packet.
    #[inline]
    pub fn size(&self) -> usize {
        self.data().size()
    }

    /// Number of interpreters currently linked into this packet's chain.
    pub fn chain_len(&self) -> usize {
        self.store.borrow().chain_len()
    }

    /* ------------------------------------------------------------------------------------ */

    /// Returns the next packet in the chain, parsing it if it has not been parsed yet.
    ///
    /// Fails with [`PacketError::InvalidChain`] if this is the innermost packet and its type
    /// declares no (or an empty) next packet range. A next-protocol key missing from a registry
    /// fails with [`PacketError::NotRegistered`].
    pub fn next(&self) -> Result<Packet> {
        let next = self.store.borrow().next(self.node)?;
        if let Some(node) = next {
            return self.sibling(node);
        }
        match self.next_packet_range()? {
            Some(range) if !range.is_empty() => self.parse_next(),
            _ => bail!(PacketError::InvalidChain),
        }
    }

    /// Non-failing variant of [`next`](Packet::next).
    pub fn next_opt(&self) -> Option<Packet> {
        self.next().ok()
    }

    /// Returns the next packet if it is interpreted as `U`.
    pub fn next_as<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        self.next()?.cast()
    }

    /// Non-failing variant of [`next_as`](Packet::next_as).
    pub fn next_as_opt<U: PacketType>(&self) -> Option<ConcretePacket<U>> {
        self.next_opt().and_then(|next| next.try_cast())
    }

    /// Returns the previous packet in the chain.
    pub fn prev(&self) -> Result<Packet> {
        let prev = self.store.borrow().prev(self.node)?;
        match prev {
            Some(node) => self.sibling(node),
            None => bail!(PacketError::InvalidChain),
        }
    }

    /// Non-failing variant of [`prev`](Packet::prev).
    pub fn prev_opt(&self) -> Option<Packet> {
        self.prev().ok()
    }

    /// Returns the previous packet if it is interpreted as `U`.
    pub fn prev_as<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        self.prev()?.cast()
    }

    /// Returns the outermost packet of the chain.
    pub fn first(&self) -> Result<Packet> {
        self.ensure_linked()?;
        let first = self.store.borrow().first();
        match first {
            Some(node) => self.sibling(node),
            None => bail!(PacketError::InvalidChain),
        }
    }

    /// Returns the outermost packet if it is interpreted as `U`.
    pub fn first_as<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        self.first()?.cast()
    }

    /// Returns the innermost packet, parsing the chain to its end.
    ///
    /// Parsing stops quietly at the first packet whose successor cannot be determined; only an
    /// overlong chain is reported.
    pub fn last(&self) -> Result<Packet> {
        self.ensure_linked()?;
        let mut packet = self.clone();
        loop {
            match packet.next() {
                Ok(next) => packet = next,
                Err(err) => match packet_error(&err) {
                    Some(PacketError::ChainTooLong(_)) => return Err(err),
                    _ => return Ok(packet),
                },
            }
        }
    }

    /// Returns the innermost packet if it is interpreted as `U`.
    pub fn last_as<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        self.last()?.cast()
    }

    /// Returns the first packet interpreted as `U`, searching from this packet towards the end
    /// of the chain.
    pub fn find<U: PacketType>(&self) -> Option<ConcretePacket<U>> {
        let mut cursor = Some(self.clone()).filter(Packet::is_valid);
        while let Some(packet) = cursor {
            if packet.is::<U>() {
                return Some(ConcretePacket::from_packet_unchecked(packet));
            }
            cursor = packet.next_opt();
        }
        None
    }

    /// Returns the first packet interpreted as `U`, searching from this packet towards the head
    /// of the chain.
    pub fn rfind<U: PacketType>(&self) -> Option<ConcretePacket<U>> {
        let mut cursor = Some(self.clone()).filter(Packet::is_valid);
        while let Some(packet) = cursor {
            if packet.is::<U>() {
                return Some(ConcretePacket::from_packet_unchecked(packet));
            }
            cursor = packet.prev_opt();
        }
        None
    }

    /* ------------------------------------------------------------------------------------ */

    /// Returns `true` if this packet is interpreted as `U`.
    #[inline]
    pub fn is<U: PacketType>(&self) -> bool {
        self.type_id() == TypeId::of::<U>()
    }

    /// Returns this packet as a `ConcretePacket<U>`, failing if it is interpreted otherwise.
    pub fn cast<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        if !self.is::<U>() {
            bail!(PacketError::WrongType {
                expected: U::NAME,
                actual: self.type_name(),
            });
        }
        Ok(ConcretePacket::from_packet_unchecked(self.clone()))
    }

    /// Non-failing variant of [`cast`](Packet::cast).
    pub fn try_cast<U: PacketType>(&self) -> Option<ConcretePacket<U>> {
        self.cast().ok()
    }

    /* ------------------------------------------------------------------------------------ */

    /// Returns the range of the next packet relative to this packet's data, as declared by its
    /// type.
    pub fn next_packet_range(&self) -> Result<Option<Range<usize>>> {
        self.ensure_linked()?;
        self.factory.ops().next_packet_range(self)
    }

    /// Returns the factory of the next packet, as declared by this packet's type.
    pub fn next_packet_type(&self) -> Result<Option<Factory>> {
        self.ensure_linked()?;
        self.factory.ops().next_packet_type(self)
    }

    fn checked_next_range(&self) -> Result<Range<usize>> {
        let range = match self.next_packet_range()? {
            Some(range) => range,
            None => bail!(PacketError::InvalidChain),
        };
        let size = self.size();
        if range.start > range.end || range.end > size {
            bail!(PacketError::OutOfRange {
                offset: range.start,
                len: range.end.saturating_sub(range.start),
                size,
            });
        }
        Ok(range)
    }

    fn parse_next(&self) -> Result<Packet> {
        let limit = config::current().max_chain_length;
        if self.chain_len() >= limit {
            bail!(PacketError::ChainTooLong(limit));
        }
        let factory = match self.next_packet_type()? {
            Some(factory) => factory,
            None => {
                log::debug!(
                    "No next packet type for {}, interpreting payload as data",
                    self.type_name()
                );
                Factory::of::<DataPacketType>()
            }
        };
        self.parse_next_as(factory)
    }

    /// Interprets the next packet range as the type of `factory`, replacing any interpreters
    /// that currently follow this packet.
    pub fn parse_next_as(&self, factory: Factory) -> Result<Packet> {
        let range = self.checked_next_range()?;
        self.reparse()?;
        let begin = self.data().begin();
        let node = self
            .store
            .borrow_mut()
            .append_interpreter(begin + range.start..begin + range.end, factory);
        log::debug!(
            "Parsed {} payload [{}, {}) as {}",
            self.type_name(),
            range.start,
            range.end,
            factory.name()
        );
        Ok(Packet {
            store: Rc::clone(&self.store),
            node,
            factory,
        })
    }

    /// Typed variant of [`parse_next_as`](Packet::parse_next_as).
    pub fn parse_next_as_type<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        self.parse_next_as(Factory::of::<U>())
            .map(ConcretePacket::from_packet_unchecked)
    }

    /// Replaces this interpreter (and everything after it) with an interpreter of type `U`.
    ///
    /// A nested packet is re-parsed from its previous packet's next range; an outermost packet
    /// is replaced over the same bytes. This handle is invalid afterwards.
    pub fn reinterpret<U: PacketType>(&self) -> Result<ConcretePacket<U>> {
        let factory = Factory::of::<U>();
        let prev = self.store.borrow().prev(self.node)?;
        if let Some(prev) = prev {
            return self
                .sibling(prev)?
                .parse_next_as(factory)
                .map(ConcretePacket::from_packet_unchecked);
        }
        let node = {
            let mut store = self.store.borrow_mut();
            let range = store.range(self.node)?;
            store.truncate_interpreters(self.node)?;
            store.append_interpreter(range, factory)
        };
        log::debug!("Reinterpreted {} as {}", self.type_name(), factory.name());
        Ok(ConcretePacket::from_packet_unchecked(Packet {
            store: Rc::clone(&self.store),
            node,
            factory,
        }))
    }

    /// Drops every interpreter after this one. The payload is parsed again on the next call to
    /// [`next`](Packet::next).
    pub fn reparse(&self) -> Result<()> {
        let next = self.store.borrow().next(self.node)?;
        if let Some(next) = next {
            self.store.borrow_mut().truncate_interpreters(next)?;
        }
        Ok(())
    }

    pub(crate) fn splice_next(&self, content: NextContent<'_>, factory: Factory) -> Result<Packet> {
        let range = self.checked_next_range()?;
        self.reparse()?;
        let data = self.data();
        data.erase_range(range.clone())?;
        let len = match content {
            NextContent::Zeroed(size) => {
                data.insert_fill(range.start, size, 0)?;
                size
            }
            NextContent::Bytes(bytes) => {
                data.insert(range.start, bytes)?;
                bytes.len()
            }
        };
        let begin = data.begin() + range.start;
        let node = self
            .store
            .borrow_mut()
            .append_interpreter(begin..begin + len, factory);
        Ok(Packet {
            store: Rc::clone(&self.store),
            node,
            factory,
        })
    }

    pub(crate) fn wrap(&self, factory: Factory) -> Result<Packet> {
        let prev = self.store.borrow().prev(self.node)?;
        let mut store = self.store.borrow_mut();
        if let Some(prev) = prev {
            store.truncate_interpreters_backwards(prev)?;
        }
        let range = store.range(self.node)?;
        let node = store.prepend_interpreter(range, factory);
        Ok(Packet {
            store: Rc::clone(&self.store),
            node,
            factory,
        })
    }

    pub(crate) fn insert_before(&self, factory: Factory) -> Result<Packet> {
        let node = {
            let mut store = self.store.borrow_mut();
            let range = store.range(self.node)?;
            store.insert_interpreter_before(self.node, range, factory)?
        };
        Ok(Packet {
            store: Rc::clone(&self.store),
            node,
            factory,
        })
    }

    /// Inserts `head` zero bytes at the start and `tail` zero bytes at the end of this packet.
    pub(crate) fn grow_around(&self, head: usize, tail: usize) -> Result<()> {
        let mut store = self.store.borrow_mut();
        let begin = store.range(self.node)?.start;
        store.insert_fill(self.node, begin, head, 0)?;
        store.insert_trailer(self.node, tail, 0)
    }

    /* ------------------------------------------------------------------------------------ */

    /// Returns a fully independent copy of the whole packet (buffer, chain and annotations),
    /// positioned at the interpreter corresponding to this one.
    pub fn deep_clone(&self) -> Result<Packet> {
        let copy = {
            let store = self.store.borrow();
            store.node(self.node)?;
            store.clone()
        };
        Ok(Packet {
            store: Rc::new(RefCell::new(copy)),
            node: self.node,
            factory: self.factory,
        })
    }

    /// Replaces whatever follows this packet with a copy of `other`'s bytes, interpreted as
    /// `other`'s type. Returns the appended packet.
    pub fn append(&self, other: &Packet) -> Result<Packet> {
        other.ensure_linked()?;
        let bytes = other.data().to_vec();
        other.factory.create_after_from(self, &bytes)
    }

    /// Recomputes the derived fields of this packet only.
    pub fn finalize_this(&self) -> Result<()> {
        self.ensure_linked()?;
        self.factory.ops().finalize(self)
    }

    /// Finalizes every packet from `other` back to this one, innermost first. `other` must be
    /// this packet or follow it in the same chain.
    pub fn finalize_to(&self, other: &Packet) -> Result<()> {
        if !Rc::ptr_eq(&self.store, &other.store) {
            bail!(PacketError::InvalidChain);
        }
        self.ensure_linked()?;
        other.ensure_linked()?;
        let chain = self.store.borrow().chain();
        let position = |node| chain.iter().position(|id| *id == node);
        match (position(self.node), position(other.node)) {
            (Some(from), Some(to)) if from <= to => self.finalize_nodes(&chain[from..=to]),
            _ => bail!(PacketError::InvalidChain),
        }
    }

    /// Finalizes every packet of the chain, innermost first.
    pub fn finalize_all(&self) -> Result<()> {
        self.ensure_linked()?;
        let chain = self.store.borrow().chain();
        self.finalize_nodes(&chain)
    }

    fn finalize_nodes(&self, nodes: &[NodeId]) -> Result<()> {
        for node in nodes.iter().rev() {
            let packet = self.sibling(*node)?;
            log::trace!("Finalizing {}", packet.type_name());
            packet.finalize_this()?;
        }
        Ok(())
    }

    /// Writes a diagnostic rendering of this packet and every packet after it, parsing the chain
    /// to its end first.
    pub fn dump(&self, w: &mut dyn io::Write) -> Result<()> {
        self.last()?;
        if config::current().dump_annotations {
            self.store.borrow().annotations().dump(w)?;
        }
        let mut cursor = Some(self.clone());
        while let Some(packet) = cursor {
            packet.factory.ops().dump(&packet, w)?;
            let next = packet.store.borrow().next(packet.node)?;
            cursor = match next {
                Some(node) => Some(packet.sibling(node)?),
                None => None,
            };
        }
        Ok(())
    }

    /* ------------------------------------------------------------------------------------ */

    /// Returns a copy of the packet's annotation of type `A`, creating a default one on first
    /// access.
    pub fn annotation<A: Annotation>(&self) -> A {
        self.store
            .borrow_mut()
            .annotations_mut()
            .get_mut::<A>()
            .clone()
    }

    /// Replaces the packet's annotation of type `A`.
    pub fn set_annotation<A: Annotation>(&self, value: A) {
        *self.store.borrow_mut().annotations_mut().get_mut::<A>() = value;
    }

    /// Resets every annotation of the packet to its default.
    pub fn clear_annotations(&self) {
        self.store.borrow_mut().annotations_mut().clear();
    }

    /// Runs `f` on the packet's annotation of type `A`. `f` must not access the packet itself.
    pub fn with_annotation<A: Annotation, R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let mut store = self.store.borrow_mut();
        f(store.annotations_mut().get_mut::<A>())
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Packet) -> bool {
        Rc::ptr_eq(&self.store, &other.store) && self.node == other.node
    }
}

impl Eq for Packet {}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = self.store.borrow().range(self.node).ok();
        f.debug_struct("Packet")
            .field("type", &self.type_name())
            .field("node", &self.node)
            .field("range", &range)
            .finish()
    }
}

/// A [`Packet`] statically known to be interpreted as `T`.
pub struct ConcretePacket<T: PacketType> {
    packet: Packet,
    _type: PhantomData<fn() -> T>,
}

impl<T: PacketType> ConcretePacket<T> {
    pub(crate) fn from_packet_unchecked(packet: Packet) -> ConcretePacket<T> {
        ConcretePacket {
            packet,
            _type: PhantomData,
        }
    }

    /// Returns the factory of `T`.
    pub fn factory() -> Factory {
        Factory::of::<T>()
    }

    /// Creates a new packet of `T`'s initial size.
    pub fn create() -> Result<ConcretePacket<T>> {
        Self::create_with_size(T::init_size())
    }

    /// Creates a new zero-filled packet of `size` bytes and initializes it.
    pub fn create_with_size(size: usize) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_with_size(size, InitMode::Init)
            .map(Self::from_packet_unchecked)
    }

    /// Creates a new zero-filled packet of `size` bytes without initializing it.
    pub fn create_no_init(size: usize) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_with_size(size, InitMode::NoInit)
            .map(Self::from_packet_unchecked)
    }

    /// Creates a new packet over a copy of `data`.
    pub fn create_from(data: &[u8]) -> ConcretePacket<T> {
        Self::from_packet_unchecked(Self::factory().create_from(data))
    }

    /// Replaces whatever follows `packet` with a new `T` of its initial size.
    pub fn create_after(packet: &Packet) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_after(packet)
            .map(Self::from_packet_unchecked)
    }

    /// Replaces whatever follows `packet` with a new, initialized `T` of `size` bytes.
    pub fn create_after_with_size(packet: &Packet, size: usize) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_after_with_size(packet, size, InitMode::Init)
            .map(Self::from_packet_unchecked)
    }

    /// Replaces whatever follows `packet` with `size` zero bytes interpreted as `T`.
    pub fn create_after_no_init(packet: &Packet, size: usize) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_after_with_size(packet, size, InitMode::NoInit)
            .map(Self::from_packet_unchecked)
    }

    /// Replaces whatever follows `packet` with a copy of `data` interpreted as `T`.
    pub fn create_after_from(packet: &Packet, data: &[u8]) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_after_from(packet, data)
            .map(Self::from_packet_unchecked)
    }

    /// Wraps `packet` in a new, initialized `T`.
    pub fn create_before(packet: &Packet) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_before(packet, InitMode::Init)
            .map(Self::from_packet_unchecked)
    }

    /// Wraps `packet` in a `T` covering exactly the same bytes.
    pub fn create_before_no_init(packet: &Packet) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_before(packet, InitMode::NoInit)
            .map(Self::from_packet_unchecked)
    }

    /// Inserts a new, initialized `T` directly in front of `packet`, keeping the packets before
    /// it.
    pub fn create_insert_before(packet: &Packet) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_insert_before(packet, InitMode::Init)
            .map(Self::from_packet_unchecked)
    }

    /// Inserts a `T` covering exactly the bytes of `packet` directly in front of it.
    pub fn create_insert_before_no_init(packet: &Packet) -> Result<ConcretePacket<T>> {
        Self::factory()
            .create_insert_before(packet, InitMode::NoInit)
            .map(Self::from_packet_unchecked)
    }

    #[inline]
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    #[inline]
    pub fn into_packet(self) -> Packet {
        self.packet
    }

    /// Typed variant of [`Packet::deep_clone`].
    pub fn deep_clone(&self) -> Result<ConcretePacket<T>> {
        self.packet.deep_clone().map(Self::from_packet_unchecked)
    }
}

impl<T: PacketType> Deref for ConcretePacket<T> {
    type Target = Packet;

    fn deref(&self) -> &Packet {
        &self.packet
    }
}

impl<T: PacketType> Clone for ConcretePacket<T> {
    fn clone(&self) -> Self {
        Self::from_packet_unchecked(self.packet.clone())
    }
}

impl<T: PacketType> PartialEq for ConcretePacket<T> {
    fn eq(&self, other: &Self) -> bool {
        self.packet == other.packet
    }
}

impl<T: PacketType> PartialEq<Packet> for ConcretePacket<T> {
    fn eq(&self, other: &Packet) -> bool {
        self.packet == *other
    }
}

impl<T: PacketType> PartialEq<ConcretePacket<T>> for Packet {
    fn eq(&self, other: &ConcretePacket<T>) -> bool {
        *self == other.packet
    }
}

impl<T: PacketType> Eq for ConcretePacket<T> {}

impl<T: PacketType> From<ConcretePacket<T>> for Packet {
    fn from(packet: ConcretePacket<T>) -> Packet {
        packet.packet
    }
}

impl<T: PacketType> fmt::Debug for ConcretePacket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.packet.fmt(f)
    }
}
