//! Hex dump rendering for packet diagnostics.

use std::io;

use itertools::Itertools;

/// Returns the lines of a hex dump of `data`, `width` bytes per line.
///
/// Each line carries the offset of its first byte, the bytes in hex and a printable ASCII column.
pub fn hexdump_lines(data: &[u8], width: usize) -> impl Iterator<Item = String> + '_ {
    let width = width.max(1);
    data.chunks(width).enumerate().map(move |(line, chunk)| {
        let hex = chunk.iter().map(|b| format!("{:02x}", b)).join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        format!(
            "{:04x}:  {:<pad$}  |{}|",
            line * width,
            hex,
            ascii,
            pad = width * 3 - 1
        )
    })
}

/// Writes a hex dump of `data` to `w`, each line indented by `indent` spaces.
pub fn hexdump<W: io::Write + ?Sized>(
    w: &mut W,
    data: &[u8],
    width: usize,
    indent: usize,
) -> io::Result<()> {
    for line in hexdump_lines(data, width) {
        writeln!(w, "{:indent$}{}", "", line, indent = indent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_lines() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let lines: Vec<String> = hexdump_lines(&data, 16).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000:  41 42 43"));
        assert!(lines[0].ends_with("|ABCDEFGHIJKLMNOP|"));
        assert!(lines[1].starts_with("0010:  51 52 53 54"));
        assert!(lines[1].ends_with("|QRST|"));
    }

    #[test]
    fn test_hexdump_nonprintable() {
        let mut out = Vec::new();
        hexdump(&mut out, &[0x00, 0x7f, b'a'], 4, 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "  0000:  00 7f 61     |..a|\n");
    }
}
