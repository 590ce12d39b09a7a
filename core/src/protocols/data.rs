//! Uninterpreted payload.

use crate::config;
use crate::packet::{ConcretePacket, PacketType};
use crate::utils::hexdump::hexdump;

use std::io;

use anyhow::Result;

/// Opaque bytes without any further structure. Used whenever the type of a payload cannot be
/// determined.
#[derive(Debug)]
pub struct DataPacketType;

/// A [`DataPacketType`] packet.
pub type DataPacket = ConcretePacket<DataPacketType>;

impl PacketType for DataPacketType {
    const NAME: &'static str = "Payload data";

    fn dump(packet: &DataPacket, w: &mut dyn io::Write) -> Result<()> {
        writeln!(w, "{} ({} bytes)", Self::NAME, packet.size())?;
        hexdump(
            w,
            &packet.data().bytes(),
            config::current().hexdump_width,
            2,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketError;

    #[test]
    fn test_data_packet_terminates_chain() {
        let packet = DataPacket::create_from(b"hello");
        assert_eq!(packet.next_packet_range().unwrap(), None);
        assert!(packet.next_opt().is_none());
        let err = packet.next().unwrap_err();
        assert_eq!(err.downcast_ref::<PacketError>(), Some(&PacketError::InvalidChain));
        assert_eq!(packet.last().unwrap(), *packet);
    }

    #[test]
    fn test_data_packet_dump() {
        let packet = DataPacket::create_from(b"hi!");
        let mut out = Vec::new();
        packet.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Payload data (3 bytes)\n  0000:  68 69 21"));
        assert!(text.trim_end().ends_with("|hi!|"));
    }
}
