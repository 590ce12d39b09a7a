//! UDP packets.

use crate::packet::{fixed_next_range, ConcretePacket, PacketError, PacketType};
use crate::protocols::ipv4::Ipv4Type;
use crate::utils::checksum::Checksum;

use std::io;
use std::ops::Range;

use anyhow::{bail, Result};

/// UDP assigned protocol number.
pub const UDP_PROTOCOL: u8 = 17;

const HDR_SIZE: usize = 8;

/// User Datagram Protocol.
#[derive(Debug)]
pub struct UdpType;

/// A UDP datagram.
pub type UdpPacket = ConcretePacket<UdpType>;

impl ConcretePacket<UdpType> {
    /// Returns the sending port.
    #[inline]
    pub fn src_port(&self) -> Result<u16> {
        self.data().read_u16(0)
    }

    pub fn set_src_port(&self, port: u16) -> Result<()> {
        self.data().write_u16(0, port)
    }

    /// Returns the receiving port.
    #[inline]
    pub fn dst_port(&self) -> Result<u16> {
        self.data().read_u16(2)
    }

    pub fn set_dst_port(&self, port: u16) -> Result<()> {
        self.data().write_u16(2, port)
    }

    /// Returns the length of the datagram in bytes, including the header and data.
    #[inline]
    pub fn length(&self) -> Result<u16> {
        self.data().read_u16(4)
    }

    pub fn set_length(&self, length: u16) -> Result<()> {
        self.data().write_u16(4, length)
    }

    /// Returns the UDP checksum.
    #[inline]
    pub fn checksum(&self) -> Result<u16> {
        self.data().read_u16(6)
    }

    pub fn set_checksum(&self, checksum: u16) -> Result<()> {
        self.data().write_u16(6, checksum)
    }

    /// Computes the checksum of the datagram. When the datagram is carried in IPv4 the pseudo
    /// header is included.
    pub fn calculate_checksum(&self) -> Result<u16> {
        let size = self.size();
        if size < HDR_SIZE {
            bail!(PacketError::OutOfRange {
                offset: 6,
                len: 2,
                size,
            });
        }
        let mut csum = Checksum::new();
        if let Some(ip) = self.prev_as_opt() {
            csum.add_bytes(&ip.src_addr()?.octets());
            csum.add_bytes(&ip.dst_addr()?.octets());
            csum.add_word(u16::from(UDP_PROTOCOL));
            csum.add_word(u16::try_from(size)?);
        }
        let mut bytes = self.data().to_vec();
        bytes[6] = 0;
        bytes[7] = 0;
        csum.add_bytes(&bytes);
        // zero means "no checksum" on the wire
        Ok(match csum.finalize() {
            0 => 0xffff,
            checksum => checksum,
        })
    }

    /// Returns `true` if the checksum is absent or matches the datagram.
    pub fn checksum_valid(&self) -> Result<bool> {
        let checksum = self.checksum()?;
        Ok(checksum == 0 || checksum == self.calculate_checksum()?)
    }

    fn prev_as_opt(&self) -> Option<ConcretePacket<Ipv4Type>> {
        self.prev_opt().and_then(|prev| prev.try_cast())
    }
}

impl PacketType for UdpType {
    const NAME: &'static str = "User datagram protocol";

    fn init_size() -> usize {
        HDR_SIZE
    }

    fn next_packet_range(packet: &UdpPacket) -> Result<Option<Range<usize>>> {
        Ok(fixed_next_range(packet))
    }

    fn finalize(packet: &UdpPacket) -> Result<()> {
        packet.set_length(u16::try_from(packet.size())?)?;
        if packet.prev_as_opt().is_none() {
            return Ok(());
        }
        let checksum = packet.calculate_checksum()?;
        packet.set_checksum(checksum)
    }

    fn dump(packet: &UdpPacket, w: &mut dyn io::Write) -> Result<()> {
        writeln!(w, "{}:", Self::NAME)?;
        writeln!(w, "  source port        : {}", packet.src_port()?)?;
        writeln!(w, "  destination port   : {}", packet.dst_port()?)?;
        writeln!(w, "  length             : {}", packet.length()?)?;
        writeln!(w, "  checksum           : 0x{:04x}", packet.checksum()?)?;
        Ok(())
    }
}
