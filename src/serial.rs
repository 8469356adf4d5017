// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-oriented serial channel, as consumed by the transfer receiver and the
//! boot console.

/// A blocking serial channel with a read timeout.
///
/// Both directions retry internally on transient hardware conditions; a short
/// `read` means the channel's read timeout expired before `buf` was filled.
pub trait Serial {
    /// Whether the channel has been configured and can carry traffic.
    fn is_configured(&self) -> bool {
        true
    }

    /// Reads up to `buf.len()` bytes, returning how many arrived before the
    /// read timeout. Zero means nothing arrived at all.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Writes `buf`, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> usize;
}

impl<S: Serial + ?Sized> Serial for &mut S {
    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        (**self).write(buf)
    }
}

/// Formats text onto a serial channel, turning `\n` into `\r\n` for
/// terminals.
pub struct Writer<S>(pub S);

impl<S: Serial> core::fmt::Write for Writer<S> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for (i, line) in s.split('\n').enumerate() {
            if i > 0 {
                self.0.write(b"\r\n");
            }
            self.0.write(line.as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    struct Capture(Vec<u8>);

    impl Serial for Capture {
        fn read(&mut self, _buf: &mut [u8]) -> usize {
            0
        }

        fn write(&mut self, buf: &[u8]) -> usize {
            self.0.extend_from_slice(buf);
            buf.len()
        }
    }

    #[test]
    fn newlines_get_carriage_returns() {
        let mut out = Capture(Vec::new());
        write!(Writer(&mut out), "Tick...\nTock!\n").unwrap();
        assert_eq!(out.0, b"Tick...\r\nTock!\r\n");
    }
}
