//! Interpreter chain storage.
//!
//! A [`PacketStore`] owns the byte buffer of one packet and the chain of interpreters viewing
//! it. Interpreters live in a slot vector addressed by generational [`NodeId`]s and are linked
//! into a doubly linked list by slot index. The store is the only component that changes the
//! buffer's length; after every such edit it walks the chain and re-indexes every interpreter
//! range.
//!
//! ## Range update rules
//! An edit is always requested by one interpreter, the owner, at an absolute position inside the
//! owner's range.
//!
//! Inserting `n` bytes at `pos`:
//! - the owner grows: its `end` moves by `n`, its `begin` never moves;
//! - interpreters before the owner (enclosing headers) grow when `pos` lies strictly inside them,
//!   or at their end while the owner starts before `pos`. An enclosing interpreter that merely
//!   ends where an empty owner begins is left alone: the new bytes belong to the owner;
//! - interpreters after the owner slide by `n` when they start at or after `pos`, and grow when
//!   they start before `pos` and end after it.
//!
//! Erasing `[pos, pos + n)` maps every boundary `b` to `b` if `b <= pos`, `b - n` if
//! `b >= pos + n`, and `pos` otherwise.

use crate::memory::buffer::ByteBuffer;
use crate::packet::annotation::AnnotationSlots;
use crate::packet::factory::Factory;
use crate::packet::interpreter::Interpreter;
use crate::packet::PacketError;

use std::ops::Range;

use anyhow::{bail, Result};

/// Identity of an interpreter within its packet.
///
/// Identifiers of truncated interpreters are never reused: the slot generation is bumped when an
/// interpreter is unlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u64,
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u64,
    node: Option<Interpreter>,
}

/// Owner of a packet's buffer, interpreter chain and annotations.
#[derive(Clone, Debug)]
pub(crate) struct PacketStore {
    buffer: ByteBuffer,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    nodes: usize,
    annotations: AnnotationSlots,
}

impl PacketStore {
    pub(crate) fn new(buffer: ByteBuffer) -> PacketStore {
        PacketStore {
            buffer,
            slots: vec![],
            free: vec![],
            head: None,
            tail: None,
            nodes: 0,
            annotations: AnnotationSlots::default(),
        }
    }

    #[inline]
    pub(crate) fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// In-place access to the buffer. Structural edits must go through the store.
    #[inline]
    pub(crate) fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buffer
    }

    #[inline]
    pub(crate) fn annotations(&self) -> &AnnotationSlots {
        &self.annotations
    }

    #[inline]
    pub(crate) fn annotations_mut(&mut self) -> &mut AnnotationSlots {
        &mut self.annotations
    }

    /// Number of linked interpreters.
    #[inline]
    pub(crate) fn chain_len(&self) -> usize {
        self.nodes
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.slot_node(id).is_some()
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Interpreter> {
        match self.slot_node(id) {
            Some(node) => Ok(node),
            None => bail!(PacketError::Detached),
        }
    }

    /// Absolute range of interpreter `id`.
    pub(crate) fn range(&self, id: NodeId) -> Result<Range<usize>> {
        let node = self.node(id)?;
        Ok(node.begin..node.end)
    }

    pub(crate) fn factory(&self, id: NodeId) -> Result<Factory> {
        Ok(self.node(id)?.factory)
    }

    fn slot_node(&self, id: NodeId) -> Option<&Interpreter> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_at(&self, index: usize) -> Option<&Interpreter> {
        self.slots.get(index).and_then(|slot| slot.node.as_ref())
    }

    fn node_at_mut(&mut self, index: usize) -> Option<&mut Interpreter> {
        self.slots.get_mut(index).and_then(|slot| slot.node.as_mut())
    }

    fn id_at(&self, index: usize) -> NodeId {
        NodeId {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Returns the outermost interpreter.
    pub(crate) fn first(&self) -> Option<NodeId> {
        self.head.map(|index| self.id_at(index))
    }

    /// Returns the innermost interpreter that has been parsed so far.
    #[cfg(test)]
    pub(crate) fn last(&self) -> Option<NodeId> {
        self.tail.map(|index| self.id_at(index))
    }

    pub(crate) fn next(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.next.map(|index| self.id_at(index)))
    }

    pub(crate) fn prev(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.prev.map(|index| self.id_at(index)))
    }

    /// Returns the identifiers of all linked interpreters in chain order.
    pub(crate) fn chain(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.nodes);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            ids.push(self.id_at(index));
            cursor = self.node_at(index).and_then(|node| node.next);
        }
        ids
    }

    fn allocate(&mut self, node: Interpreter) -> usize {
        self.nodes += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) -> Option<Interpreter> {
        let slot = &mut self.slots[index];
        let node = slot.node.take()?;
        slot.generation += 1;
        self.free.push(index);
        self.nodes -= 1;
        Some(node)
    }

    /// Links a new interpreter over `range` at the tail of the chain.
    pub(crate) fn append_interpreter(&mut self, range: Range<usize>, factory: Factory) -> NodeId {
        let mut node = Interpreter::new(range.start, range.end, factory);
        node.prev = self.tail;
        let index = self.allocate(node);
        match self.tail.and_then(|tail| self.node_at_mut(tail)) {
            Some(tail) => tail.next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        log::trace!(
            "Appended {} interpreter [{}, {}) at slot {}",
            factory.name(),
            range.start,
            range.end,
            index
        );
        self.id_at(index)
    }

    /// Links a new interpreter over `range` at the head of the chain.
    pub(crate) fn prepend_interpreter(&mut self, range: Range<usize>, factory: Factory) -> NodeId {
        let mut node = Interpreter::new(range.start, range.end, factory);
        node.next = self.head;
        let index = self.allocate(node);
        match self.head.and_then(|head| self.node_at_mut(head)) {
            Some(head) => head.prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        log::trace!(
            "Prepended {} interpreter [{}, {}) at slot {}",
            factory.name(),
            range.start,
            range.end,
            index
        );
        self.id_at(index)
    }

    /// Links a new interpreter over `range` directly in front of `before`.
    pub(crate) fn insert_interpreter_before(
        &mut self,
        before: NodeId,
        range: Range<usize>,
        factory: Factory,
    ) -> Result<NodeId> {
        let prev = self.node(before)?.prev;
        let mut node = Interpreter::new(range.start, range.end, factory);
        node.prev = prev;
        node.next = Some(before.index);
        let index = self.allocate(node);
        if let Some(before) = self.node_at_mut(before.index) {
            before.prev = Some(index);
        }
        match prev.and_then(|prev| self.node_at_mut(prev)) {
            Some(prev) => prev.next = Some(index),
            None => self.head = Some(index),
        }
        log::trace!(
            "Inserted {} interpreter [{}, {}) at slot {} before slot {}",
            factory.name(),
            range.start,
            range.end,
            index,
            before.index
        );
        Ok(self.id_at(index))
    }

    /// Unlinks `id` and every interpreter after it. Returns the number of interpreters removed.
    pub(crate) fn truncate_interpreters(&mut self, id: NodeId) -> Result<usize> {
        let prev = self.node(id)?.prev;
        let mut removed = 0;
        let mut cursor = Some(id.index);
        while let Some(index) = cursor {
            cursor = self.release(index).and_then(|node| node.next);
            removed += 1;
        }
        match prev.and_then(|index| self.node_at_mut(index)) {
            Some(node) => node.next = None,
            None => self.head = None,
        }
        self.tail = prev;
        log::trace!("Truncated {} interpreters from slot {}", removed, id.index);
        Ok(removed)
    }

    /// Unlinks every interpreter from the head up to and including `id`. Returns the number of
    /// interpreters removed.
    pub(crate) fn truncate_interpreters_backwards(&mut self, id: NodeId) -> Result<usize> {
        let next = self.node(id)?.next;
        let mut removed = 0;
        let mut cursor = Some(id.index);
        while let Some(index) = cursor {
            cursor = self.release(index).and_then(|node| node.prev);
            removed += 1;
        }
        match next.and_then(|index| self.node_at_mut(index)) {
            Some(node) => node.prev = None,
            None => self.tail = None,
        }
        self.head = next;
        log::trace!(
            "Truncated {} interpreters up to slot {}",
            removed,
            id.index
        );
        Ok(removed)
    }

    fn check_position(&self, owner: NodeId, pos: usize) -> Result<Range<usize>> {
        let range = self.range(owner)?;
        if pos < range.start || pos > range.end {
            bail!(PacketError::OutOfRange {
                offset: pos,
                len: 0,
                size: range.end,
            });
        }
        Ok(range)
    }

    /// Inserts `bytes` at absolute position `pos` on behalf of `owner`.
    pub(crate) fn insert(&mut self, owner: NodeId, pos: usize, bytes: &[u8]) -> Result<()> {
        self.check_position(owner, pos)?;
        self.buffer.insert(pos, bytes)?;
        self.shift_inserted(owner, pos, bytes.len(), true);
        Ok(())
    }

    /// Inserts `count` copies of `value` at absolute position `pos` on behalf of `owner`.
    pub(crate) fn insert_fill(
        &mut self,
        owner: NodeId,
        pos: usize,
        count: usize,
        value: u8,
    ) -> Result<()> {
        self.check_position(owner, pos)?;
        self.buffer.insert_fill(pos, count, value)?;
        self.shift_inserted(owner, pos, count, true);
        Ok(())
    }

    /// Appends a trailer of `count` copies of `value` at the owner's end. Empty interpreters
    /// nested at that end stay in front of the trailer.
    pub(crate) fn insert_trailer(&mut self, owner: NodeId, count: usize, value: u8) -> Result<()> {
        let pos = self.range(owner)?.end;
        self.buffer.insert_fill(pos, count, value)?;
        self.shift_inserted(owner, pos, count, false);
        Ok(())
    }

    fn shift_inserted(&mut self, owner: NodeId, pos: usize, count: usize, slide_adjacent: bool) {
        if count == 0 {
            return;
        }
        let owner_begin = match self.slot_node(owner) {
            Some(node) => node.begin,
            None => return,
        };
        let mut seen_owner = false;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = match self.node_at_mut(index) {
                Some(node) => node,
                None => break,
            };
            if index == owner.index {
                node.end += count;
                seen_owner = true;
            } else if !seen_owner {
                if node.begin > pos {
                    node.begin += count;
                }
                if node.end > pos || (node.end == pos && owner_begin < pos) {
                    node.end += count;
                }
            } else if node.begin > pos || (node.begin == pos && slide_adjacent) {
                node.begin += count;
                node.end += count;
            } else if node.end > pos {
                node.end += count;
            }
            cursor = node.next;
        }
        log::trace!("Inserted {} bytes at {}", count, pos);
    }

    /// Erases the absolute `range` on behalf of `owner`.
    pub(crate) fn erase(&mut self, owner: NodeId, range: Range<usize>) -> Result<()> {
        let bounds = self.range(owner)?;
        if range.start > range.end || range.start < bounds.start || range.end > bounds.end {
            bail!(PacketError::OutOfRange {
                offset: range.start,
                len: range.end.saturating_sub(range.start),
                size: bounds.end,
            });
        }
        if range.is_empty() {
            return Ok(());
        }
        self.buffer.erase(range.clone())?;
        let (pos, count) = (range.start, range.len());
        let shift = |boundary: usize| {
            if boundary <= pos {
                boundary
            } else if boundary >= pos + count {
                boundary - count
            } else {
                pos
            }
        };
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = match self.node_at_mut(index) {
                Some(node) => node,
                None => break,
            };
            node.begin = shift(node.begin);
            node.end = shift(node.end);
            cursor = node.next;
        }
        log::trace!("Erased {} bytes at {}", count, pos);
        Ok(())
    }

    /// Drops every interpreter after `owner` and erases the owner's whole range.
    pub(crate) fn clear(&mut self, owner: NodeId) -> Result<()> {
        if let Some(next) = self.next(owner)? {
            self.truncate_interpreters(next)?;
        }
        let range = self.range(owner)?;
        self.erase(owner, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::data::DataPacketType;

    fn data_factory() -> Factory {
        Factory::of::<DataPacketType>()
    }

    fn sizes(store: &PacketStore) -> Vec<usize> {
        store
            .chain()
            .into_iter()
            .map(|id| store.node(id).unwrap().size())
            .collect()
    }

    #[test]
    fn test_data_edits() {
        let mut store = PacketStore::new(ByteBuffer::new());
        let pi = store.append_interpreter(0..0, data_factory());

        store.insert(pi, 0, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(store.buffer().len(), 8);
        assert_eq!(store.node(pi).unwrap().size(), 8);

        store.insert_fill(pi, 2, 1, 0xf0).unwrap();
        assert_eq!(store.node(pi).unwrap().size(), 9);
        assert_eq!(store.buffer().data()[2], 0xf0);

        store.insert_fill(pi, 9, 8, 0xff).unwrap();
        assert_eq!(store.node(pi).unwrap().size(), 17);
        assert_eq!(store.buffer().len(), 17);

        store.erase(pi, 0..1).unwrap();
        assert_eq!(store.node(pi).unwrap().size(), 16);
        assert_eq!(store.buffer().data()[1], 0xf0);

        store.erase(pi, 2..7).unwrap();
        assert_eq!(store.node(pi).unwrap().size(), 11);
        assert_eq!(&store.buffer().data()[..3], &[1, 0xf0, 7]);

        store.clear(pi).unwrap();
        assert_eq!(store.node(pi).unwrap().size(), 0);
        assert!(store.buffer().is_empty());
    }

    #[test]
    fn test_nested_shift() {
        // outer [0, 20), middle [7, 17), inner [11, 17)
        let mut store = PacketStore::new(ByteBuffer::zeroed(20));
        let outer = store.append_interpreter(0..20, data_factory());
        let middle = store.append_interpreter(7..17, data_factory());
        let inner = store.append_interpreter(11..17, data_factory());

        store.insert_fill(middle, 9, 6, 1).unwrap();
        assert_eq!(sizes(&store), vec![26, 16, 6]);
        assert_eq!(store.range(inner).unwrap(), 17..23);

        store.erase(middle, 9..15).unwrap();
        assert_eq!(sizes(&store), vec![20, 10, 6]);
        assert_eq!(store.range(inner).unwrap(), 11..17);

        // inserting at the start of a later interpreter slides it
        store.insert_fill(middle, 11, 2, 2).unwrap();
        assert_eq!(store.range(inner).unwrap(), 13..19);
        assert_eq!(sizes(&store), vec![22, 12, 6]);

        // inserting inside the innermost interpreter grows every enclosing one
        store.insert_fill(inner, 14, 4, 3).unwrap();
        assert_eq!(sizes(&store), vec![26, 16, 10]);

        store.erase(middle, 10..16).unwrap();
        assert_eq!(sizes(&store), vec![20, 10, 7]);
        assert_eq!(store.range(inner).unwrap(), 10..17);

        store.erase(outer, 5..18).unwrap();
        assert_eq!(sizes(&store), vec![7, 0, 0]);
        assert_eq!(store.range(middle).unwrap(), 5..5);
        assert_eq!(store.range(inner).unwrap(), 5..5);
    }

    #[test]
    fn test_insert_into_empty_interpreter() {
        let mut store = PacketStore::new(ByteBuffer::new());
        let outer = store.prepend_interpreter(0..0, data_factory());
        let header = store.append_interpreter(0..0, data_factory());
        let payload = store.append_interpreter(0..0, data_factory());

        // bytes inserted at the start of an empty interpreter belong to it alone
        store.insert_fill(header, 0, 10, 0).unwrap();
        assert_eq!(sizes(&store), vec![0, 10, 0]);
        assert_eq!(store.range(payload).unwrap(), 10..10);

        store.insert_fill(payload, 10, 1, 0).unwrap();
        assert_eq!(sizes(&store), vec![0, 10, 1]);
        assert_eq!(store.range(payload).unwrap(), 10..11);

        // the header ends where the payload begins and does not enclose it
        store.insert_fill(payload, 11, 2, 0).unwrap();
        assert_eq!(sizes(&store), vec![0, 10, 3]);

        store.clear(header).unwrap();
        assert_eq!(store.chain_len(), 2);
        assert!(!store.contains(payload));
        assert_eq!(store.range(header).unwrap(), 0..0);
        assert_eq!(store.range(outer).unwrap(), 0..0);
        assert_eq!(store.buffer().len(), 3);
    }

    #[test]
    fn test_insert_at_nested_end() {
        let mut store = PacketStore::new(ByteBuffer::zeroed(20));
        let outer = store.append_interpreter(0..20, data_factory());
        let inner = store.append_interpreter(14..20, data_factory());

        store.insert_fill(inner, 20, 4, 0).unwrap();
        assert_eq!(store.range(outer).unwrap(), 0..24);
        assert_eq!(store.range(inner).unwrap(), 14..24);

        // a trailer added by the outer interpreter does not grow the inner one
        store.insert_trailer(outer, 2, 0).unwrap();
        assert_eq!(store.range(outer).unwrap(), 0..26);
        assert_eq!(store.range(inner).unwrap(), 14..24);
    }

    #[test]
    fn test_truncate_inclusive() {
        let mut store = PacketStore::new(ByteBuffer::zeroed(8));
        let ids: Vec<NodeId> = (0..4)
            .map(|i| store.append_interpreter(i..8, data_factory()))
            .collect();

        assert_eq!(store.truncate_interpreters(ids[1]).unwrap(), 3);
        assert_eq!(store.chain(), vec![ids[0]]);
        assert_eq!(store.last(), Some(ids[0]));
        assert!(!store.contains(ids[2]));
        assert!(!store.contains(ids[3]));

        let b = store.append_interpreter(2..8, data_factory());
        let c = store.append_interpreter(4..8, data_factory());
        assert_ne!(b, ids[1]);
        assert_eq!(store.truncate_interpreters_backwards(b).unwrap(), 2);
        assert_eq!(store.chain(), vec![c]);
        assert_eq!(store.first(), Some(c));
        assert_eq!(store.prev(c).unwrap(), None);
    }

    #[test]
    fn test_insert_interpreter_before() {
        let mut store = PacketStore::new(ByteBuffer::zeroed(8));
        let outer = store.append_interpreter(0..8, data_factory());
        let inner = store.append_interpreter(2..8, data_factory());

        let middle = store
            .insert_interpreter_before(inner, 2..8, data_factory())
            .unwrap();
        assert_eq!(store.chain(), vec![outer, middle, inner]);
        assert_eq!(store.prev(inner).unwrap(), Some(middle));
        assert_eq!(store.next(outer).unwrap(), Some(middle));

        let head = store
            .insert_interpreter_before(outer, 0..8, data_factory())
            .unwrap();
        assert_eq!(store.first(), Some(head));
        assert_eq!(store.chain_len(), 4);

        // header bytes inserted by the new interpreter grow everything around it
        store.insert_fill(middle, 2, 2, 0).unwrap();
        assert_eq!(sizes(&store), vec![10, 10, 8, 6]);
        assert_eq!(store.range(inner).unwrap(), 4..10);

        store.truncate_interpreters(inner).unwrap();
        assert!(store.insert_interpreter_before(inner, 0..1, data_factory()).is_err());
    }

    #[test]
    fn test_out_of_range() {
        let mut store = PacketStore::new(ByteBuffer::zeroed(10));
        let outer = store.append_interpreter(0..10, data_factory());
        let inner = store.append_interpreter(4..10, data_factory());

        let err = store.insert(inner, 2, &[1]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PacketError>(),
            Some(PacketError::OutOfRange { .. })
        ));
        let err = store.erase(inner, 3..5).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PacketError>(),
            Some(PacketError::OutOfRange { .. })
        ));
        assert_eq!(store.range(outer).unwrap(), 0..10);
        assert_eq!(store.buffer().len(), 10);

        store.truncate_interpreters(inner).unwrap();
        let err = store.insert(inner, 4, &[1]).unwrap_err();
        assert_eq!(err.downcast_ref::<PacketError>(), Some(&PacketError::Detached));
    }
}
