//! Internet checksum (RFC 1071).
//!
//! [`Checksum`] keeps a rolling one's complement sum over 16-bit big-endian words so that a
//! checksum can be built up from several disjoint regions (for example a pseudo header followed
//! by the transport segment) before being folded into its header form.

/// A rolling one's complement checksum calculation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
    // Trailing odd byte of the last region, carried into the next one.
    odd: Option<u8>,
}

impl Checksum {
    /// Creates an empty checksum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bytes` to the sum.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;
        if let Some(high) = self.odd.take() {
            match bytes.split_first() {
                Some((&low, rest)) => {
                    self.add_word(u16::from_be_bytes([high, low]));
                    bytes = rest;
                }
                None => {
                    self.odd = Some(high);
                    return;
                }
            }
        }
        let mut chunks = bytes.chunks_exact(2);
        for word in &mut chunks {
            self.add_word(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = chunks.remainder() {
            self.odd = Some(*last);
        }
    }

    /// Adds a single 16-bit word to the sum.
    pub fn add_word(&mut self, word: u16) {
        // end-around carry
        self.inner += u32::from(word);
        if self.inner > 0xffff {
            self.inner = (self.inner & 0xffff) + (self.inner >> 16);
        }
    }

    /// Folds the carries and returns the one's complement sum (not yet complemented).
    pub fn sum(&self) -> u16 {
        let mut sum = self.inner;
        if let Some(high) = self.odd {
            sum += u32::from(u16::from_be_bytes([high, 0]));
        }
        while sum >> 16 != 0 {
            sum = (sum >> 16) + (sum & 0xffff);
        }
        sum as u16
    }

    /// Returns the value to store in a header checksum field.
    pub fn finalize(&self) -> u16 {
        !self.sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        let mut csum = Checksum::new();
        csum.add_bytes(&[0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7]);
        assert_eq!(csum.sum(), 0xddf2);
        assert_eq!(csum.finalize(), 0x220d);
    }

    #[test]
    fn test_odd_regions() {
        let mut split = Checksum::new();
        split.add_bytes(&[0x00, 0x01, 0xf2]);
        split.add_bytes(&[0x03, 0xf4, 0xf5, 0xf6, 0xf7]);
        let mut whole = Checksum::new();
        whole.add_bytes(&[0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7]);
        assert_eq!(split.sum(), whole.sum());
    }

    #[test]
    fn test_long_input_folds() {
        let mut csum = Checksum::new();
        for _ in 0..200_000 {
            csum.add_word(0xffff);
        }
        assert_eq!(csum.sum(), 0xffff);

        let mut csum = Checksum::new();
        csum.add_bytes(&vec![0x80; 300_000]);
        let mut folded = Checksum::new();
        // 150_000 * 0x8080 reduced modulo 0xffff
        folded.add_word((150_000u64 * 0x8080 % 0xffff) as u16);
        assert_eq!(csum.sum(), folded.sum());
    }

    #[test]
    fn test_ipv4_header() {
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let mut csum = Checksum::new();
        csum.add_bytes(&header);
        assert_eq!(csum.finalize(), 0xb861);
    }
}
