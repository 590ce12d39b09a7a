//! IPv4 packets.

use crate::packet::{
    registry_key, registry_next_type, ConcretePacket, Factory, PacketError, PacketRegistry,
    PacketType, RegistryKeyed,
};
use crate::protocols::udp::{UdpType, UDP_PROTOCOL};
use crate::utils::checksum::Checksum;

use std::io;
use std::net::Ipv4Addr;
use std::ops::Range;

use anyhow::{bail, Result};

/// IPv4 EtherType
pub const IPV4_ETHERTYPE: u16 = 0x0800;
/// Flag: "Reserved bit"
const IPV4_RF: u16 = 0x8000;
/// Flag: "Don't fragment"
const IPV4_DF: u16 = 0x4000;
/// Flag: "More fragments"
const IPV4_MF: u16 = 0x2000;
/// Fragment offset part
const IPV4_FRAG_OFFSET: u16 = 0x1FFF;

const HDR_SIZE: usize = 20;
const DEFAULT_TTL: u8 = 64;

lazy_static! {
    /// IP protocol number to packet type registry.
    pub static ref IP_PROTOCOL_REGISTRY: PacketRegistry<u8> = {
        let registry = PacketRegistry::new("ip protocol");
        registry.register::<UdpType>(UDP_PROTOCOL);
        registry
    };
}

/// IPv4. Options are carried in the header but not interpreted.
#[derive(Debug)]
pub struct Ipv4Type;

/// An IPv4 packet.
pub type Ipv4Packet = ConcretePacket<Ipv4Type>;

impl ConcretePacket<Ipv4Type> {
    /// Returns the IP protocol version.
    #[inline]
    pub fn version(&self) -> Result<u8> {
        Ok(self.version_ihl()? >> 4)
    }

    /// Returns the header length measured in 32-bit words (IHL).
    #[inline]
    pub fn ihl(&self) -> Result<u8> {
        Ok(self.version_ihl()? & 0x0f)
    }

    /// Returns the 8-bit field containing the version and IHL.
    #[inline]
    pub fn version_ihl(&self) -> Result<u8> {
        self.data().read_u8(0)
    }

    pub fn set_version_ihl(&self, version_ihl: u8) -> Result<()> {
        self.data().write_u8(0, version_ihl)
    }

    /// Returns the header length in bytes.
    #[inline]
    pub fn header_len(&self) -> Result<usize> {
        Ok(usize::from(self.ihl()?) * 4)
    }

    /// Returns the differentiated services field.
    #[inline]
    pub fn dscp_ecn(&self) -> Result<u8> {
        self.data().read_u8(1)
    }

    /// Returns the total length of the packet in bytes, including the header and data.
    #[inline]
    pub fn total_length(&self) -> Result<u16> {
        self.data().read_u16(2)
    }

    pub fn set_total_length(&self, total_length: u16) -> Result<()> {
        self.data().write_u16(2, total_length)
    }

    /// Returns the identification field.
    #[inline]
    pub fn identification(&self) -> Result<u16> {
        self.data().read_u16(4)
    }

    pub fn set_identification(&self, identification: u16) -> Result<()> {
        self.data().write_u16(4, identification)
    }

    /// Returns the 16-bit field containing the 3-bit flags and 13-bit fragment offset.
    #[inline]
    pub fn flags_to_fragment_offset(&self) -> Result<u16> {
        self.data().read_u16(6)
    }

    /// Returns `true` if the Reserved flag is set.
    #[inline]
    pub fn rf(&self) -> Result<bool> {
        Ok(self.flags_to_fragment_offset()? & IPV4_RF != 0)
    }

    /// Returns `true` if the Don't Fragment flag is set.
    #[inline]
    pub fn df(&self) -> Result<bool> {
        Ok(self.flags_to_fragment_offset()? & IPV4_DF != 0)
    }

    /// Returns `true` if the More Fragments flag is set.
    #[inline]
    pub fn mf(&self) -> Result<bool> {
        Ok(self.flags_to_fragment_offset()? & IPV4_MF != 0)
    }

    /// Returns the fragment offset in units of 8 bytes.
    #[inline]
    pub fn fragment_offset(&self) -> Result<u16> {
        Ok(self.flags_to_fragment_offset()? & IPV4_FRAG_OFFSET)
    }

    /// Returns the time to live (TTL) of the packet.
    #[inline]
    pub fn time_to_live(&self) -> Result<u8> {
        self.data().read_u8(8)
    }

    pub fn set_time_to_live(&self, ttl: u8) -> Result<()> {
        self.data().write_u8(8, ttl)
    }

    /// Returns the encapsulated protocol identifier.
    #[inline]
    pub fn protocol(&self) -> Result<u8> {
        self.data().read_u8(9)
    }

    pub fn set_protocol(&self, protocol: u8) -> Result<()> {
        self.data().write_u8(9, protocol)
    }

    /// Returns the IPv4 header checksum.
    #[inline]
    pub fn header_checksum(&self) -> Result<u16> {
        self.data().read_u16(10)
    }

    /// Returns the sender's IPv4 address.
    #[inline]
    pub fn src_addr(&self) -> Result<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.data().read_u32(12)?))
    }

    pub fn set_src_addr(&self, addr: Ipv4Addr) -> Result<()> {
        self.data().write_u32(12, u32::from(addr))
    }

    /// Returns the receiver's IPv4 address.
    #[inline]
    pub fn dst_addr(&self) -> Result<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.data().read_u32(16)?))
    }

    pub fn set_dst_addr(&self, addr: Ipv4Addr) -> Result<()> {
        self.data().write_u32(16, u32::from(addr))
    }

    /// Computes the header checksum over the current header bytes.
    pub fn calculate_checksum(&self) -> Result<u16> {
        let header_len = self.header_len()?;
        if header_len < HDR_SIZE {
            bail!(PacketError::OutOfRange {
                offset: 10,
                len: 2,
                size: header_len,
            });
        }
        let mut header = self.data().read(0, header_len)?;
        header[10] = 0;
        header[11] = 0;
        let mut csum = Checksum::new();
        csum.add_bytes(&header);
        Ok(csum.finalize())
    }

    /// Returns `true` if the stored header checksum matches the header.
    pub fn checksum_valid(&self) -> Result<bool> {
        Ok(self.calculate_checksum()? == self.header_checksum()?)
    }
}

impl PacketType for Ipv4Type {
    const NAME: &'static str = "Internet protocol Version 4";

    fn init_size() -> usize {
        HDR_SIZE
    }

    fn init(packet: &Ipv4Packet) -> Result<()> {
        packet.set_version_ihl(0x45)?;
        packet.set_time_to_live(DEFAULT_TTL)
    }

    fn next_packet_range(packet: &Ipv4Packet) -> Result<Option<Range<usize>>> {
        let size = packet.size();
        let header_len = match packet.header_len() {
            Ok(header_len) if header_len >= HDR_SIZE && header_len <= size => header_len,
            _ => return Ok(None),
        };
        // trailing link-layer padding is not part of the payload
        let end = match packet.total_length() {
            Ok(total) if usize::from(total) >= header_len && usize::from(total) <= size => {
                usize::from(total)
            }
            _ => size,
        };
        Ok(Some(header_len..end))
    }

    fn next_packet_type(packet: &Ipv4Packet) -> Result<Option<Factory>> {
        registry_next_type(packet)
    }

    fn finalize(packet: &Ipv4Packet) -> Result<()> {
        packet.set_total_length(u16::try_from(packet.size())?)?;
        if let Some(protocol) = registry_key::<Ipv4Type>(packet.next_opt().as_ref()) {
            packet.set_protocol(protocol)?;
        }
        let checksum = packet.calculate_checksum()?;
        packet.data().write_u16(10, checksum)
    }

    fn dump(packet: &Ipv4Packet, w: &mut dyn io::Write) -> Result<()> {
        writeln!(w, "{}:", Self::NAME)?;
        writeln!(w, "  version            : {}", packet.version()?)?;
        writeln!(w, "  header length      : {}", packet.ihl()?)?;
        writeln!(w, "  tos                : {}", packet.dscp_ecn()?)?;
        writeln!(w, "  length             : {}", packet.total_length()?)?;
        writeln!(w, "  identifier         : {}", packet.identification()?)?;
        writeln!(
            w,
            "  flags              : {}{}{}",
            if packet.rf()? { "RF " } else { "" },
            if packet.df()? { "DF " } else { "" },
            if packet.mf()? { "MF" } else { "" }
        )?;
        writeln!(w, "  fragment           : {}", packet.fragment_offset()?)?;
        writeln!(w, "  ttl                : {}", packet.time_to_live()?)?;
        writeln!(w, "  protocol           : {}", packet.protocol()?)?;
        writeln!(w, "  checksum           : 0x{:04x}", packet.header_checksum()?)?;
        writeln!(w, "  source             : {}", packet.src_addr()?)?;
        writeln!(w, "  destination        : {}", packet.dst_addr()?)?;
        Ok(())
    }
}

impl RegistryKeyed for Ipv4Type {
    type Key = u8;

    fn registry() -> &'static PacketRegistry<u8> {
        &IP_PROTOCOL_REGISTRY
    }

    fn next_packet_key(packet: &Ipv4Packet) -> Result<u8> {
        packet.protocol()
    }
}
