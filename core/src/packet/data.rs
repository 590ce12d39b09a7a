//! Per-interpreter byte views.
//!
//! ## Remarks
//! A [`PacketData`] view addresses its interpreter's bytes by relative offset (`0..size()`).
//! Structural edits (insert, erase, resize) are forwarded to the packet store with this view's
//! interpreter as the owner of the edit, so only this interpreter and the interpreters enclosing
//! it change size. Bytes belonging to a later interpreter are reachable through the view but
//! must not be edited through it; doing so leaves that interpreter's range describing stale
//! content. This is not checked.
//!
//! A view of an interpreter that has been truncated from its chain reads as empty and fails
//! every edit with [`PacketError::Detached`].

use crate::packet::handle::Packet;
use crate::packet::PacketError;

use std::cell::{Ref, RefMut};
use std::ops::Range;

use anyhow::{bail, Result};
use byteorder::{BigEndian, ByteOrder};

/// Mutable byte sequence of one interpreter.
#[derive(Clone, Copy)]
pub struct PacketData<'a> {
    packet: &'a Packet,
}

impl<'a> PacketData<'a> {
    pub(crate) fn new(packet: &'a Packet) -> PacketData<'a> {
        PacketData { packet }
    }

    fn absolute(&self) -> Result<Range<usize>> {
        self.packet.store().borrow().range(self.packet.node_id())
    }

    /// Absolute offset of the first byte of this view within the packet buffer.
    pub fn begin(&self) -> usize {
        self.absolute().map(|range| range.start).unwrap_or(0)
    }

    /// Absolute offset one past the last byte of this view within the packet buffer.
    pub fn end(&self) -> usize {
        self.absolute().map(|range| range.end).unwrap_or(0)
    }

    /// Returns the number of bytes in the view.
    pub fn size(&self) -> usize {
        self.absolute().map(|range| range.len()).unwrap_or(0)
    }

    /// Returns `true` if the view holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn check_access(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        let range = self.absolute()?;
        match offset.checked_add(len) {
            Some(end) if end <= range.len() => Ok(range.start + offset..range.start + end),
            _ => bail!(PacketError::OutOfRange {
                offset,
                len,
                size: range.len(),
            }),
        }
    }

    /// Borrows the bytes of the view.
    ///
    /// The packet cannot be edited while the returned borrow is alive.
    pub fn bytes(&self) -> Ref<'a, [u8]> {
        let node = self.packet.node_id();
        Ref::map(self.packet.store().borrow(), |store| {
            match store.range(node) {
                Ok(range) => &store.buffer().data()[range],
                Err(_) => Default::default(),
            }
        })
    }

    /// Mutably borrows the bytes of the view. The length of the view cannot change through the
    /// returned slice.
    pub fn bytes_mut(&self) -> RefMut<'a, [u8]> {
        let node = self.packet.node_id();
        RefMut::map(self.packet.store().borrow_mut(), |store| {
            match store.range(node) {
                Ok(range) => &mut store.buffer_mut().data_mut()[range],
                Err(_) => Default::default(),
            }
        })
    }

    /// Returns a copy of the bytes of the view.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }

    /// Returns a copy of `len` bytes at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let range = self.check_access(offset, len)?;
        let store = self.packet.store().borrow();
        Ok(store.buffer().get_data_slice(range.start, range.len())?.to_vec())
    }

    /// Overwrites the bytes at `offset` with `bytes`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = self.check_access(offset, bytes.len())?;
        let mut store = self.packet.store().borrow_mut();
        store
            .buffer_mut()
            .get_data_slice_mut(range.start, range.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Returns the byte at `index`.
    pub fn get(&self, index: usize) -> Result<u8> {
        let range = self.check_access(index, 1)?;
        let store = self.packet.store().borrow();
        Ok(store.buffer().get_data_slice(range.start, 1)?[0])
    }

    /// Sets the byte at `index`.
    pub fn set(&self, index: usize, value: u8) -> Result<()> {
        self.write(index, &[value])
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.get(offset)
    }

    /// Reads a big-endian `u16` at `offset`.
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        let range = self.check_access(offset, 2)?;
        Ok(BigEndian::read_u16(
            &self.packet.store().borrow().buffer().data()[range],
        ))
    }

    /// Reads a big-endian `u32` at `offset`.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let range = self.check_access(offset, 4)?;
        Ok(BigEndian::read_u32(
            &self.packet.store().borrow().buffer().data()[range],
        ))
    }

    #[inline]
    pub fn write_u8(&self, offset: usize, value: u8) -> Result<()> {
        self.set(offset, value)
    }

    /// Writes `value` as a big-endian `u16` at `offset`.
    pub fn write_u16(&self, offset: usize, value: u16) -> Result<()> {
        let mut bytes = [0; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.write(offset, &bytes)
    }

    /// Writes `value` as a big-endian `u32` at `offset`.
    pub fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        let mut bytes = [0; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.write(offset, &bytes)
    }

    fn check_position(&self, pos: usize) -> Result<usize> {
        let range = self.absolute()?;
        if pos > range.len() {
            bail!(PacketError::OutOfRange {
                offset: pos,
                len: 0,
                size: range.len(),
            });
        }
        Ok(range.start + pos)
    }

    /// Inserts `bytes` before `pos`.
    pub fn insert(&self, pos: usize, bytes: &[u8]) -> Result<()> {
        let at = self.check_position(pos)?;
        self.packet
            .store()
            .borrow_mut()
            .insert(self.packet.node_id(), at, bytes)
    }

    /// Inserts `count` copies of `value` before `pos`.
    pub fn insert_fill(&self, pos: usize, count: usize, value: u8) -> Result<()> {
        let at = self.check_position(pos)?;
        self.packet
            .store()
            .borrow_mut()
            .insert_fill(self.packet.node_id(), at, count, value)
    }

    /// Appends `bytes` at the end of the view.
    pub fn extend(&self, bytes: &[u8]) -> Result<()> {
        self.insert(self.size(), bytes)
    }

    /// Removes the byte at `pos`.
    pub fn erase(&self, pos: usize) -> Result<()> {
        self.erase_range(pos..pos + 1)
    }

    /// Removes the bytes in `range`.
    pub fn erase_range(&self, range: Range<usize>) -> Result<()> {
        let absolute = self.check_access(range.start, range.end.saturating_sub(range.start))?;
        self.packet
            .store()
            .borrow_mut()
            .erase(self.packet.node_id(), absolute)
    }

    /// Removes every byte of the view, dropping all interpreters after it.
    pub fn clear(&self) -> Result<()> {
        self.packet.store().borrow_mut().clear(self.packet.node_id())
    }

    /// Grows (filling with `fill`) or shrinks the view to `size` bytes. Shrinking removes bytes
    /// from the end.
    pub fn resize(&self, size: usize, fill: u8) -> Result<()> {
        let current = self.size();
        if size < current {
            self.erase_range(size..current)
        } else {
            self.insert_fill(current, size - current, fill)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::data::{DataPacket, DataPacketType};
    use crate::protocols::generic::GenericPacket;

    #[test]
    fn test_view_edits() {
        let packet = DataPacket::create_with_size(0).unwrap();
        let data = packet.data();
        assert!(data.is_empty());

        data.insert(0, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(data.size(), 8);
        data.insert_fill(2, 1, 0xf0).unwrap();
        data.insert_fill(9, 8, 0xff).unwrap();
        assert_eq!(data.size(), 17);
        data.erase(0).unwrap();
        data.erase_range(2..7).unwrap();
        assert_eq!(data.size(), 11);
        assert_eq!(&data.bytes()[..4], &[1, 0xf0, 7, 0xff]);
        data.clear().unwrap();
        assert_eq!(data.size(), 0);
        assert_eq!(data.end() - data.begin(), 0);
    }

    #[test]
    fn test_field_access() {
        let packet = DataPacket::create_with_size(8).unwrap();
        let data = packet.data();
        data.write_u16(0, 0x0800).unwrap();
        data.write_u32(2, 0xdeadbeef).unwrap();
        data.write_u8(6, 0x11).unwrap();
        assert_eq!(data.read_u16(0).unwrap(), 0x0800);
        assert_eq!(data.read_u32(2).unwrap(), 0xdeadbeef);
        assert_eq!(data.get(6).unwrap(), 0x11);
        assert_eq!(data.read(1, 3).unwrap(), vec![0x00, 0xde, 0xad]);
        data.bytes_mut()[7] = 0x42;
        assert_eq!(data.to_vec()[7], 0x42);

        let err = data.read_u32(6).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PacketError>(),
            Some(&PacketError::OutOfRange {
                offset: 6,
                len: 4,
                size: 8
            })
        );
        assert!(data.insert(9, &[1]).is_err());
        assert!(data.erase_range(4..9).is_err());
        assert_eq!(data.size(), 8);
    }

    #[test]
    fn test_resize_header_without_payload() {
        let mut bytes = vec![0u8; 20];
        bytes[0] = 0x45;
        bytes[19] = 0x14;
        let header = GenericPacket::<20, 0>::create_from(&bytes);
        let payload = header.parse_next_as_type::<DataPacketType>().unwrap();
        assert_eq!(payload.data().begin(), 20);
        assert!(payload.data().is_empty());

        header.data().resize(5, 0).unwrap();
        assert_eq!(header.data().size(), 5);
        assert_eq!(header.data().end() - header.data().begin(), 5);
        assert_eq!(payload.data().begin(), 5);
        assert!(payload.data().is_empty());

        header.data().insert_fill(5, 3, 0xaa).unwrap();
        assert_eq!(header.data().size(), 8);
        assert!(payload.data().is_empty());
        assert_eq!(payload.data().begin(), 8);
        header.data().resize(5, 0).unwrap();

        payload.data().extend(&[1, 2, 3, 4]).unwrap();
        assert_eq!(payload.data().size(), 4);
        assert_eq!(header.data().size(), 5);
        assert_eq!(payload.data().to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_resize_grows_enclosing() {
        let outer = GenericPacket::<4, 2>::create_from(&[0; 10]);
        let inner = outer.next().unwrap();
        assert_eq!(inner.size(), 4);
        inner.data().resize(7, 0x55).unwrap();
        assert_eq!(inner.size(), 7);
        assert_eq!(outer.size(), 13);
        assert_eq!(
            &outer.data().to_vec()[4..11],
            &[0, 0, 0, 0, 0x55, 0x55, 0x55]
        );
        inner.data().resize(1, 0).unwrap();
        assert_eq!(outer.size(), 7);
    }
}
