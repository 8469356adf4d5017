//! `tablecrc`: a tiny table-driven CRC16 implementation.
//!
//! The 256-entry lookup table is generated at compile time from an algorithm
//! description in the `crc_catalog` crate, so a `Crc16` can live in a `static`
//! and costs 512 bytes of flash and no RAM. Computing a checksum is a single
//! table lookup per input byte.
//!
//! Only 16-bit algorithms are supported. If you need other widths, use the
//! `crc` crate, which this one is tested against.

#![no_std]

use crc_catalog::Algorithm;

/// A CRC16 algorithm with its precomputed lookup table.
#[derive(Clone, Debug)]
pub struct Crc16 {
    table: [u16; 256],
    init: u16,
    reflect_in: bool,
    reflect_out: bool,
    xorout: u16,
}

impl Crc16 {
    /// Builds the lookup table for `algorithm`.
    ///
    /// This is a `const fn` so the result can be placed in a `static`.
    pub const fn new(algorithm: &Algorithm<u16>) -> Self {
        let mut table = [0u16; 256];
        let mut i = 0;
        while i < 256 {
            table[i] = if algorithm.refin {
                entry_reflect(algorithm.poly.reverse_bits(), i as u8)
            } else {
                entry(algorithm.poly, i as u8)
            };
            i += 1;
        }
        let init = if algorithm.refin {
            algorithm.init.reverse_bits()
        } else {
            algorithm.init
        };
        Self {
            table,
            init,
            reflect_in: algorithm.refin,
            reflect_out: algorithm.refout,
            xorout: algorithm.xorout,
        }
    }

    /// Starts a new checksum computation.
    pub const fn digest(&self) -> Digest<'_> {
        Digest {
            crc: self,
            value: self.init,
        }
    }

    /// Computes the checksum of `data` in one go.
    pub fn checksum(&self, data: &[u8]) -> u16 {
        let mut digest = self.digest();
        digest.update(data);
        digest.finish()
    }

    /// Returns the raw lookup table.
    pub const fn table(&self) -> &[u16; 256] {
        &self.table
    }
}

/// A CRC16 operation-in-progress.
#[derive(Clone, Debug)]
pub struct Digest<'a> {
    crc: &'a Crc16,
    value: u16,
}

impl Digest<'_> {
    /// Updates this CRC with the content of `data`.
    pub fn update(&mut self, data: &[u8]) {
        let table = &self.crc.table;
        if self.crc.reflect_in {
            for &byte in data {
                let index = (self.value ^ u16::from(byte)) & 0xFF;
                self.value = table[index as usize] ^ (self.value >> 8);
            }
        } else {
            for &byte in data {
                let index = ((self.value >> 8) ^ u16::from(byte)) & 0xFF;
                self.value = table[index as usize] ^ (self.value << 8);
            }
        }
    }

    /// Performs any final computations required and returns the computed CRC.
    pub fn finish(mut self) -> u16 {
        if self.crc.reflect_in ^ self.crc.reflect_out {
            self.value = self.value.reverse_bits();
        }
        self.value ^ self.crc.xorout
    }
}

const fn entry(poly: u16, byte: u8) -> u16 {
    let mut value = (byte as u16) << 8;
    let mut bit = 0;
    while bit < 8 {
        value = if value & 0x8000 != 0 {
            (value << 1) ^ poly
        } else {
            value << 1
        };
        bit += 1;
    }
    value
}

const fn entry_reflect(poly: u16, byte: u8) -> u16 {
    let mut value = byte as u16;
    let mut bit = 0;
    while bit < 8 {
        value = if value & 1 != 0 {
            (value >> 1) ^ poly
        } else {
            value >> 1
        };
        bit += 1;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    static XMODEM: Crc16 = Crc16::new(&crc_catalog::CRC_16_XMODEM);
    static KERMIT: Crc16 = Crc16::new(&crc_catalog::CRC_16_KERMIT);

    #[test]
    fn no_data() {
        let good = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);
        assert_eq!(XMODEM.checksum(&[]), good.checksum(&[]));
    }

    #[test]
    fn some_data() {
        let fixture = b"the quick brown fox jumps over the lazy dog";

        let good = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);
        assert_eq!(XMODEM.checksum(fixture), good.checksum(fixture));
    }

    #[test]
    fn catalog_check_values() {
        // Every catalog entry carries the CRC of "123456789".
        assert_eq!(XMODEM.checksum(b"123456789"), crc_catalog::CRC_16_XMODEM.check);
        assert_eq!(KERMIT.checksum(b"123456789"), crc_catalog::CRC_16_KERMIT.check);
    }

    #[test]
    fn reflected_algorithm() {
        let fixture = b"the quick brown fox jumps over the lazy dog";

        let good = crc::Crc::<u16>::new(&crc::CRC_16_KERMIT);
        assert_eq!(KERMIT.checksum(fixture), good.checksum(fixture));
    }

    #[test]
    fn incremental_matches_oneshot() {
        let fixture = b"the quick brown fox jumps over the lazy dog";

        let mut digest = XMODEM.digest();
        digest.update(&fixture[..10]);
        digest.update(&fixture[10..]);
        assert_eq!(digest.finish(), XMODEM.checksum(fixture));
    }

    #[test]
    fn table_is_the_classic_one() {
        // First entries of the well-known XMODEM table.
        assert_eq!(&XMODEM.table()[..4], &[0x0000, 0x1021, 0x2042, 0x3063]);
        assert_eq!(XMODEM.table()[255], 0x1ef0);
    }
}
