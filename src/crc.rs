// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The CRC16 used by the transfer protocol.

use tablecrc::Crc16;

/// CRC-16/XMODEM: polynomial 0x1021, zero initial value, no reflection. The
/// table is generated at compile time.
static XMODEM: Crc16 = Crc16::new(&crc_catalog::CRC_16_XMODEM);

/// Computes the checksum of `data` as appended to every transfer packet.
pub fn crc16(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}
