//! Ethernet II frames.

use crate::packet::{
    registry_key, registry_next_type, ConcretePacket, Factory, PacketRegistry, PacketType,
    RegistryKeyed,
};
use crate::protocols::ipv4::{Ipv4Type, IPV4_ETHERTYPE};

use std::fmt;
use std::io;
use std::ops::Range;

use anyhow::Result;

const VLAN_802_1Q: u16 = 0x8100;
const VLAN_802_1AD: u16 = 0x88a8;

const TAG_SIZE: usize = 4;
const HDR_SIZE: usize = 14;
const MAX_TAGS: usize = 2;

lazy_static! {
    /// EtherType to packet type registry.
    pub static ref ETHERTYPE_REGISTRY: PacketRegistry<u16> = {
        let registry = PacketRegistry::new("ethertype");
        registry.register::<Ipv4Type>(IPV4_ETHERTYPE);
        registry
    };
}

/// A MAC address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// Ethernet II framing. Up to two VLAN tags (802.1Q, 802.1ad) are skipped when locating the
/// payload.
#[derive(Debug)]
pub struct EthernetType;

/// An Ethernet frame.
pub type EthernetPacket = ConcretePacket<EthernetType>;

impl ConcretePacket<EthernetType> {
    /// Returns the destination MAC address.
    #[inline]
    pub fn dst(&self) -> Result<MacAddr> {
        self.mac_at(0)
    }

    /// Returns the source MAC address.
    #[inline]
    pub fn src(&self) -> Result<MacAddr> {
        self.mac_at(6)
    }

    fn mac_at(&self, offset: usize) -> Result<MacAddr> {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.data().read(offset, 6)?);
        Ok(MacAddr(mac))
    }

    pub fn set_dst(&self, mac: MacAddr) -> Result<()> {
        self.data().write(0, &mac.0)
    }

    pub fn set_src(&self, mac: MacAddr) -> Result<()> {
        self.data().write(6, &mac.0)
    }

    /// Returns the outermost EtherType field, which is a VLAN TPID for tagged frames.
    #[inline]
    pub fn ether_type(&self) -> Result<u16> {
        self.data().read_u16(12)
    }

    pub fn set_ether_type(&self, ether_type: u16) -> Result<()> {
        self.data().write_u16(12, ether_type)
    }

    /// Returns the offset of the EtherType field naming the payload protocol.
    fn payload_type_offset(&self) -> Result<usize> {
        let mut offset = 12;
        for _ in 0..MAX_TAGS {
            match self.data().read_u16(offset)? {
                VLAN_802_1Q | VLAN_802_1AD => offset += TAG_SIZE,
                _ => break,
            }
        }
        Ok(offset)
    }

    /// Returns the EtherType of the encapsulated protocol, skipping VLAN tags.
    pub fn payload_type(&self) -> Result<u16> {
        let offset = self.payload_type_offset()?;
        self.data().read_u16(offset)
    }

    /// Returns the 802.1Q tag control information of the outermost VLAN tag, if any.
    pub fn vlan_tci(&self) -> Result<Option<u16>> {
        match self.ether_type()? {
            VLAN_802_1Q | VLAN_802_1AD => Ok(Some(self.data().read_u16(14)?)),
            _ => Ok(None),
        }
    }

    /// Returns the header length including VLAN tags.
    pub fn header_len(&self) -> Result<usize> {
        Ok(self.payload_type_offset()? + 2)
    }
}

impl PacketType for EthernetType {
    const NAME: &'static str = "Ethernet II";

    fn init_size() -> usize {
        HDR_SIZE
    }

    fn next_packet_range(packet: &EthernetPacket) -> Result<Option<Range<usize>>> {
        let size = packet.size();
        match packet.header_len() {
            Ok(header_len) if header_len <= size => Ok(Some(header_len..size)),
            _ => Ok(None),
        }
    }

    fn next_packet_type(packet: &EthernetPacket) -> Result<Option<Factory>> {
        registry_next_type(packet)
    }

    fn finalize(packet: &EthernetPacket) -> Result<()> {
        if let Some(ether_type) = registry_key::<EthernetType>(packet.next_opt().as_ref()) {
            let offset = packet.payload_type_offset()?;
            packet.data().write_u16(offset, ether_type)?;
        }
        Ok(())
    }

    fn dump(packet: &EthernetPacket, w: &mut dyn io::Write) -> Result<()> {
        writeln!(w, "{}:", Self::NAME)?;
        writeln!(w, "  destination        : {}", packet.dst()?)?;
        writeln!(w, "  source             : {}", packet.src()?)?;
        if let Some(tci) = packet.vlan_tci()? {
            writeln!(w, "  vlan tci           : 0x{:04x}", tci)?;
        }
        writeln!(w, "  type/length        : 0x{:04x}", packet.payload_type()?)?;
        Ok(())
    }
}

impl RegistryKeyed for EthernetType {
    type Key = u16;

    fn registry() -> &'static PacketRegistry<u16> {
        &ETHERTYPE_REGISTRY
    }

    fn next_packet_key(packet: &EthernetPacket) -> Result<u16> {
        packet.payload_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketError;
    use crate::protocols::data::{DataPacket, DataPacketType};

    fn frame(ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb,
        ];
        bytes.extend_from_slice(&ether_type.to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_ethernet_fields() {
        let eth = EthernetPacket::create_from(&frame(0x1234, &[1, 2, 3]));
        assert_eq!(eth.dst().unwrap(), MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
        assert_eq!(eth.src().unwrap().to_string(), "66:77:88:99:aa:bb");
        assert_eq!(eth.ether_type().unwrap(), 0x1234);
        assert_eq!(eth.header_len().unwrap(), 14);
        assert_eq!(eth.vlan_tci().unwrap(), None);
        assert_eq!(eth.next_packet_range().unwrap(), Some(14..17));
    }

    #[test]
    fn test_unregistered_ethertype() {
        let eth = EthernetPacket::create_from(&frame(0x1234, &[1, 2, 3]));
        let err = eth.next().unwrap_err();
        assert_eq!(
            err.downcast_ref::<PacketError>(),
            Some(&PacketError::NotRegistered {
                registry: "ethertype",
                key: "4660".to_owned()
            })
        );
        assert!(eth.next_opt().is_none());
        assert_eq!(eth.last().unwrap(), *eth);
        assert_eq!(eth.chain_len(), 1);

        // explicit interpretation is registry independent
        let payload = eth.parse_next_as_type::<DataPacketType>().unwrap();
        assert_eq!(payload.data().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_vlan_tagged() {
        let mut tagged = frame(VLAN_802_1Q, &[0x00, 0x05]);
        tagged.extend_from_slice(&0x1234u16.to_be_bytes());
        tagged.extend_from_slice(&[9, 9]);
        let eth = EthernetPacket::create_from(&tagged);
        assert_eq!(eth.vlan_tci().unwrap(), Some(5));
        assert_eq!(eth.payload_type().unwrap(), 0x1234);
        assert_eq!(eth.header_len().unwrap(), 18);
        assert_eq!(eth.next_packet_range().unwrap(), Some(18..20));
    }

    #[test]
    fn test_truncated_header() {
        let eth = EthernetPacket::create_from(&[0; 10]);
        assert_eq!(eth.next_packet_range().unwrap(), None);
        assert!(eth.next_opt().is_none());
        assert!(eth.dst().is_ok());
        assert!(eth.ether_type().is_err());
    }

    #[test]
    fn test_create_and_finalize() {
        let eth = EthernetPacket::create().unwrap();
        assert_eq!(eth.size(), 14);
        let data = DataPacket::create_after_from(&eth, b"abcd").unwrap();
        assert_eq!(eth.size(), 18);
        assert_eq!(data.data().begin(), 14);
        eth.set_ether_type(0x1234).unwrap();
        eth.finalize_all().unwrap();
        // unregistered payload types leave the type field alone
        assert_eq!(eth.ether_type().unwrap(), 0x1234);
    }
}
