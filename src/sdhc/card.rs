// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the driver learns about a card while opening it.

use super::Instance;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusWidth {
    One = 1,
    Four = 4,
}

/// Properties derived from the CSD and SCR registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CardInfo {
    /// Maximum transfer rate in bits per second.
    pub trans_speed: u32,
    /// Read block length in bytes.
    pub block_len: u32,
    /// Capacity in 512-byte blocks for CSD version 2 cards, in units of
    /// `block_len` otherwise.
    pub num_blocks: u32,
    /// Capacity in bytes.
    pub size: u64,
    pub bus_width: BusWidth,
    /// SD_SPEC field of the SCR.
    pub sd_version: u8,
}

impl CardInfo {
    /// `csd` and `scr` are as the controller presents them: the CSD with its
    /// least significant word first, the SCR most significant word first.
    pub fn parse(csd: &[u32; 4], scr: &[u32; 2]) -> Self {
        let block_len = 1 << ((csd[2] >> 16) & 0xF);
        let (num_blocks, size) = capacity(csd, block_len);
        let bus_width = if (scr[0] >> 16) & 0xF & 0x4 != 0 {
            BusWidth::Four
        } else {
            BusWidth::One
        };
        Self {
            trans_speed: trans_speed(csd),
            block_len,
            num_blocks,
            size,
            bus_width,
            sd_version: ((scr[0] >> 24) & 0xF) as u8,
        }
    }
}

/// Decodes TRAN_SPEED. Reserved time values read as zero.
fn trans_speed(csd: &[u32; 4]) -> u32 {
    const UNIT: [u32; 4] = [10_000, 100_000, 1_000_000, 10_000_000];
    // Tenths.
    const VALUE: [u32; 16] = [0, 10, 12, 13, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 70, 80];

    let unit = (csd[3] & 0x7) as usize;
    let value = ((csd[3] >> 3) & 0xF) as usize;
    UNIT.get(unit).map_or(0, |u| u * VALUE[value])
}

fn capacity(csd: &[u32; 4], block_len: u32) -> (u32, u64) {
    if csd[3] >> 30 == 1 {
        let c_size = u64::from(((csd[2] & 0x3F) << 16) | (csd[1] >> 16));
        let size = (c_size + 1) * 512 * 1024;
        ((size / 512) as u32, size)
    } else {
        let c_size = ((csd[2] & 0x3FF) << 2) | (csd[1] >> 30);
        let mult = (csd[1] >> 15) & 0x7;
        let blocks = (c_size + 1) << (mult + 2);
        (blocks, u64::from(blocks) * u64::from(block_len))
    }
}

/// A card slot on one controller, and everything learned about the card in
/// it. Produced closed; `Sdhc::open` fills it in.
#[derive(Clone, Debug)]
pub struct Card {
    instance: Instance,
    rca: u32,
    cid: [u32; 4],
    csd: [u32; 4],
    scr: [u32; 2],
    info: Option<CardInfo>,
}

impl Card {
    pub const fn new(instance: Instance) -> Self {
        Self {
            instance,
            rca: 0,
            cid: [0; 4],
            csd: [0; 4],
            scr: [0; 2],
            info: None,
        }
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    pub fn is_open(&self) -> bool {
        self.info.is_some()
    }

    /// Relative card address, already in the upper half-word where command
    /// arguments want it.
    pub fn rca(&self) -> u32 {
        self.rca
    }

    pub fn cid(&self) -> &[u32; 4] {
        &self.cid
    }

    pub fn csd(&self) -> &[u32; 4] {
        &self.csd
    }

    pub fn scr(&self) -> &[u32; 2] {
        &self.scr
    }

    pub fn info(&self) -> Option<&CardInfo> {
        self.info.as_ref()
    }

    pub(super) fn close(&mut self) {
        *self = Self::new(self.instance);
    }

    pub(super) fn fill(&mut self, rca: u32, cid: [u32; 4], csd: [u32; 4], scr: [u32; 2]) {
        self.rca = rca;
        self.cid = cid;
        self.csd = csd;
        self.scr = scr;
        self.info = Some(CardInfo::parse(&csd, &scr));
    }
}
