//! Fixed header/trailer framing.

use crate::config;
use crate::packet::{fixed_next_range, ConcretePacket, PacketType};
use crate::utils::hexdump::hexdump;

use std::io;
use std::ops::Range;

use anyhow::Result;

/// A protocol with a `HEADER`-byte header, a `TRAILER`-byte trailer and an untyped payload in
/// between.
#[derive(Debug)]
pub struct GenericPacketType<const HEADER: usize, const TRAILER: usize>;

/// A [`GenericPacketType`] packet.
pub type GenericPacket<const HEADER: usize, const TRAILER: usize> =
    ConcretePacket<GenericPacketType<HEADER, TRAILER>>;

impl<const HEADER: usize, const TRAILER: usize> PacketType for GenericPacketType<HEADER, TRAILER> {
    const NAME: &'static str = "Generic packet";

    fn init_size() -> usize {
        HEADER + TRAILER
    }

    fn init_head_size() -> usize {
        HEADER
    }

    fn next_packet_range(packet: &GenericPacket<HEADER, TRAILER>) -> Result<Option<Range<usize>>> {
        Ok(fixed_next_range(packet))
    }

    fn dump(packet: &GenericPacket<HEADER, TRAILER>, w: &mut dyn io::Write) -> Result<()> {
        let width = config::current().hexdump_width;
        writeln!(
            w,
            "{} <{}, {}> ({} bytes)",
            Self::NAME,
            HEADER,
            TRAILER,
            packet.size()
        )?;
        let bytes = packet.data().to_vec();
        if bytes.len() < HEADER + TRAILER {
            writeln!(w, "  truncated")?;
            return Ok(());
        }
        writeln!(w, "  header:")?;
        hexdump(w, &bytes[..HEADER], width, 4)?;
        if TRAILER > 0 {
            writeln!(w, "  trailer:")?;
            hexdump(w, &bytes[bytes.len() - TRAILER..], width, 4)?;
        }
        Ok(())
    }
}
