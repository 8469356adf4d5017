// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Numbered drives for the filesystem layer.
//!
//! The filesystem addresses storage as `(drive, block)`. The only drive we
//! have is drive 0, the SD card on MMC0, and it's read only.

use log::warn;

use crate::sdhc::regs::Registers;
use crate::sdhc::{self, Card, Sdhc, BLOCK_SIZE};
use crate::wait::Wait;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Ready,
    /// Never initialized, initialization failed, or the card has been
    /// pulled since.
    NotInitialized,
    /// No such drive.
    NoDisk,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no such drive")]
    NoDisk,
    #[error("drive not ready")]
    NotReady,
    #[error("drive is read only")]
    ReadOnly,
    #[error("buffer too small for the requested blocks")]
    BufferTooSmall,
    #[error(transparent)]
    Storage(#[from] sdhc::Error),
}

/// What the filesystem needs from storage.
pub trait BlockDevice {
    /// Brings the drive up if it isn't already.
    fn initialize(&mut self, drive: u8) -> Status;

    fn status(&self, drive: u8) -> Status;

    /// Reads `count` consecutive blocks starting at `start` into the front
    /// of `buf`.
    fn read_blocks(
        &mut self,
        drive: u8,
        buf: &mut [u8],
        start: u32,
        count: u32,
    ) -> Result<(), Error>;

    /// Writing is not supported.
    fn write_blocks(
        &mut self,
        _drive: u8,
        _buf: &[u8],
        _start: u32,
        _count: u32,
    ) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }
}

/// The one drive: an SD card behind an MMCHS controller.
pub struct Disk<R, W> {
    sdhc: Sdhc<R, W>,
    card: Card,
}

impl<R: Registers, W: Wait> Disk<R, W> {
    pub const DRIVE: u8 = 0;

    pub fn new(sdhc: Sdhc<R, W>) -> Self {
        let card = Card::new(sdhc.instance());
        Self { sdhc, card }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }
}

impl<R: Registers, W: Wait> BlockDevice for Disk<R, W> {
    fn initialize(&mut self, drive: u8) -> Status {
        if drive != Self::DRIVE {
            return Status::NoDisk;
        }
        if self.status(drive) == Status::Ready {
            return Status::Ready;
        }
        match self.sdhc.open(&mut self.card) {
            Ok(()) => Status::Ready,
            Err(e) => {
                warn!("SD card bring-up failed: {e}");
                Status::NotInitialized
            }
        }
    }

    fn status(&self, drive: u8) -> Status {
        if drive != Self::DRIVE {
            Status::NoDisk
        } else if !self.card.is_open() || !self.sdhc.card_present() {
            Status::NotInitialized
        } else {
            Status::Ready
        }
    }

    fn read_blocks(
        &mut self,
        drive: u8,
        buf: &mut [u8],
        start: u32,
        count: u32,
    ) -> Result<(), Error> {
        match self.status(drive) {
            Status::Ready => (),
            Status::NotInitialized => return Err(Error::NotReady),
            Status::NoDisk => return Err(Error::NoDisk),
        }
        let len = count as usize * BLOCK_SIZE;
        let buf = buf.get_mut(..len).ok_or(Error::BufferTooSmall)?;
        for (block, chunk) in (start..).zip(buf.chunks_exact_mut(BLOCK_SIZE)) {
            self.sdhc.read_block(&self.card, block, chunk)?;
        }
        Ok(())
    }
}

/// A drive held entirely in memory.
#[cfg(test)]
pub(crate) struct MemDisk {
    pub data: Vec<u8>,
    pub reads: usize,
}

#[cfg(test)]
impl MemDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, reads: 0 }
    }
}

#[cfg(test)]
impl BlockDevice for MemDisk {
    fn initialize(&mut self, drive: u8) -> Status {
        self.status(drive)
    }

    fn status(&self, drive: u8) -> Status {
        if drive == 0 {
            Status::Ready
        } else {
            Status::NoDisk
        }
    }

    fn read_blocks(
        &mut self,
        drive: u8,
        buf: &mut [u8],
        start: u32,
        count: u32,
    ) -> Result<(), Error> {
        if drive != 0 {
            return Err(Error::NoDisk);
        }
        self.reads += 1;
        let from = start as usize * BLOCK_SIZE;
        let len = count as usize * BLOCK_SIZE;
        let src = self
            .data
            .get(from..from + len)
            .ok_or(Error::Storage(sdhc::Error::Data { status: 0 }))?;
        buf[..len].copy_from_slice(src);
        Ok(())
    }
}
