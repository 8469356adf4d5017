// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SD card driver for the AM335x MMCHS controller.
//!
//! Bringing a card up is a fixed, order-dependent walk: reset and power the
//! controller, clock the card slowly, then talk it through identification
//! into the transfer state one command at a time. Every command goes through
//! [`Sdhc::send_command`]; the rest of this file is the sequence.
//!
//! Only high-capacity cards are supported, which is to say block addressed
//! cards with 512-byte blocks.

pub mod card;
pub mod command;
#[cfg(test)]
pub(crate) mod fake;
pub mod regs;

use log::debug;

use crate::wait::{TimedOut, Wait};
pub use card::{BusWidth, Card, CardInfo};
use command::Command;
use regs::{capa, con, hctl, pstate, stat, sysconfig, sysctl, sysstatus, Reg, Registers};

/// Block size of high-capacity cards, and of every read we issue.
pub const BLOCK_SIZE: usize = 512;

/// How many times we ask the card whether it has finished powering up
/// before giving up on it.
pub const READY_RETRIES: u32 = 1000;

/// Frequency of the controller's functional clock.
const REFERENCE_HZ: u32 = 96_000_000;
/// Identification-mode card clock.
const INIT_HZ: u32 = 400_000;
/// Data transfer card clock. Cards must support 25 MHz in default speed
/// mode; this is the closest the divider gets.
const OPERATING_HZ: u32 = 24_000_000;

/// CMD8 argument: 2.7-3.6 V, check pattern 0xAA.
const IF_COND: u32 = 0x1AA;
/// OCR bits used with ACMD41.
const OCR_BUSY: u32 = 1 << 31;
const OCR_HIGH_CAPACITY: u32 = 1 << 30;
const OCR_VDD_27_36: u32 = 0x1FF << 15;
/// ACMD6 argument selecting the 4-bit bus.
const BUS_WIDTH_4: u32 = 0x2;

/// The raw response registers, least significant word first.
pub type Response = [u32; 4];

/// The three MMCHS instances on the part.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Instance {
    Mmc0,
    Mmc1,
    Mmc2,
}

impl Instance {
    pub const fn base(self) -> usize {
        match self {
            Instance::Mmc0 => 0x4806_0000,
            Instance::Mmc1 => 0x481D_8000,
            Instance::Mmc2 => 0x4781_0000,
        }
    }

    /// SD bus voltage. MMC0 is the only instance wired to a 3.3 V slot on
    /// the boards we support.
    const fn bus_voltage(self) -> u32 {
        match self {
            Instance::Mmc0 => hctl::SDVS_3V3,
            Instance::Mmc1 | Instance::Mmc2 => hctl::SDVS_1V8,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no card in the slot")]
    NoCard,
    #[error("controller refused to power the bus")]
    BusPower,
    #[error("card belongs to another controller")]
    WrongInstance,
    #[error("CMD{index} failed (status {status:#010x})")]
    Command { index: u8, status: u32 },
    #[error("not an SD card")]
    NotSdCard,
    #[error("card does not support our voltage range")]
    UnsupportedVoltage,
    #[error("card never became ready")]
    NotReady,
    #[error("standard capacity cards are not supported")]
    StandardCapacity,
    #[error("card is not open")]
    NotOpen,
    #[error("buffer smaller than a block")]
    BufferTooSmall,
    #[error("data transfer failed (status {status:#010x})")]
    Data { status: u32 },
    #[error("controller timed out")]
    Timeout,
}

impl From<TimedOut> for Error {
    fn from(_: TimedOut) -> Self {
        Error::Timeout
    }
}

/// One MMCHS controller.
pub struct Sdhc<R, W> {
    regs: R,
    wait: W,
    instance: Instance,
}

impl<R: Registers, W: Wait> Sdhc<R, W> {
    pub fn new(regs: R, wait: W, instance: Instance) -> Self {
        Self {
            regs,
            wait,
            instance,
        }
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    #[cfg(test)]
    pub(crate) fn regs(&self) -> &R {
        &self.regs
    }

    pub fn card_present(&self) -> bool {
        self.regs.read(Reg::PState) & pstate::CINS != 0
    }

    /// Resets the controller and brings the bus up in identification mode:
    /// powered, 1-bit wide, clocked at 400 kHz, with the card having seen its
    /// 80 initialization clocks.
    pub fn reset(&mut self) -> Result<(), Error> {
        if !self.card_present() {
            return Err(Error::NoCard);
        }
        let regs = &self.regs;

        regs.modify(Reg::SysConfig, |v| v | sysconfig::SOFTRESET);
        self.wait
            .until(|| regs.read(Reg::SysStatus) & sysstatus::RESETDONE != 0)?;

        regs.modify(Reg::SysCtl, |v| v | sysctl::SRA);
        self.wait
            .until(|| regs.read(Reg::SysCtl) & sysctl::SRA == 0)?;

        regs.write(Reg::Capa, capa::VS18 | capa::VS33);
        regs.write(
            Reg::SysConfig,
            sysconfig::standbymode(1) | sysconfig::clockactivity(1) | sysconfig::AUTOIDLE,
        );

        regs.modify(Reg::Con, |v| v & !con::DW8);
        regs.modify(Reg::Hctl, |v| v & !hctl::DTW);
        let voltage = self.instance.bus_voltage();
        regs.modify(Reg::Hctl, |v| (v & !hctl::SDVS_MASK) | voltage);

        regs.modify(Reg::Hctl, |v| v | hctl::SDBP);
        if regs.read(Reg::Hctl) & hctl::SDBP == 0 {
            return Err(Error::BusPower);
        }

        regs.modify(Reg::SysCtl, |v| v | sysctl::ICE);
        self.set_clock(INIT_HZ)?;
        let regs = &self.regs;
        regs.modify(Reg::SysCtl, |v| v | sysctl::CEN);

        // Stream the initialization clocks: a dummy command with INIT set.
        regs.write(Reg::Ie, stat::CC);
        regs.write(Reg::Stat, stat::CC);
        regs.modify(Reg::Con, |v| v | con::INIT);
        regs.write(Reg::Cmd, 0);
        self.wait.until(|| regs.read(Reg::Stat) & stat::CC != 0)?;
        regs.modify(Reg::Con, |v| v & !con::INIT);
        regs.write(Reg::Stat, u32::MAX);

        regs.write(
            Reg::Ie,
            stat::CC | stat::TC | stat::BWR | stat::BRR | stat::ERRORS,
        );
        Ok(())
    }

    /// Issues `cmd` with `arg` and waits for it to complete.
    ///
    /// On error all error status is cleared before returning.
    pub fn send_command(&mut self, cmd: &Command, arg: u32) -> Result<Response, Error> {
        let regs = &self.regs;

        regs.write(Reg::Stat, u32::MAX);
        match cmd.data {
            Some(data) => {
                regs.write(
                    Reg::Blk,
                    regs::blk::nblk(u32::from(data.blocks))
                        | regs::blk::blen(u32::from(data.block_size)),
                );
                regs.modify(Reg::SysCtl, |v| {
                    (v & !sysctl::DTO_MASK) | sysctl::dto(0xE)
                });
            }
            None => regs.write(Reg::Blk, 0),
        }
        regs.write(Reg::Arg, arg);
        regs.write(Reg::Cmd, cmd.encode());

        self.wait
            .until(|| regs.read(Reg::Stat) & (stat::CC | stat::ERRI) != 0)?;
        let status = regs.read(Reg::Stat);
        if status & stat::ERRI != 0 {
            regs.write(Reg::Stat, stat::ERRORS);
            debug!("CMD{} ({arg:#x}) failed: {status:#010x}", cmd.index);
            return Err(Error::Command {
                index: cmd.index,
                status,
            });
        }
        regs.write(Reg::Stat, stat::CC);

        let response = [
            regs.read(Reg::Rsp10),
            regs.read(Reg::Rsp32),
            regs.read(Reg::Rsp54),
            regs.read(Reg::Rsp76),
        ];
        debug!("CMD{} ({arg:#x}) -> {response:08x?}", cmd.index);
        Ok(response)
    }

    /// Brings the card in the slot up into the transfer state and records
    /// what it tells us about itself in `card`.
    ///
    /// `card` is closed first, and stays closed if anything fails. Opening an
    /// open card starts over from a controller reset.
    pub fn open(&mut self, card: &mut Card) -> Result<(), Error> {
        if card.instance() != self.instance {
            return Err(Error::WrongInstance);
        }
        card.close();
        self.reset()?;

        self.send_command(&command::GO_IDLE_STATE, 0)?;
        // Only SD cards know about application commands.
        self.send_command(&command::APP_CMD, 0)
            .map_err(|_| Error::NotSdCard)?;

        self.send_command(&command::GO_IDLE_STATE, 0)?;
        let echo = self
            .send_command(&command::SEND_IF_COND, IF_COND)
            .map_err(|_| Error::UnsupportedVoltage)?;
        if echo[0] & 0xFFF != IF_COND {
            return Err(Error::UnsupportedVoltage);
        }

        let ocr = self.wait_ready()?;
        if ocr & OCR_HIGH_CAPACITY == 0 {
            return Err(Error::StandardCapacity);
        }

        let cid = self.send_command(&command::ALL_SEND_CID, 0)?;
        let rca = self.send_command(&command::SEND_RELATIVE_ADDR, 0)?[0] & 0xFFFF_0000;
        let csd = self.send_command(&command::SEND_CSD, rca)?;
        self.send_command(&command::SELECT_CARD, rca)?;
        let scr = self.read_scr(rca)?;

        let info = CardInfo::parse(&csd, &scr);
        if info.bus_width == BusWidth::Four {
            self.send_command(&command::APP_CMD, rca)?;
            self.send_command(&command::SET_BUS_WIDTH, BUS_WIDTH_4)?;
            self.regs.modify(Reg::Hctl, |v| v | hctl::DTW);
        }

        self.regs.modify(Reg::Hctl, |v| v & !hctl::HSPE);
        self.set_clock(OPERATING_HZ)?;

        card.fill(rca, cid, csd, scr);
        debug!("card {:?} open: {info:?}", self.instance);
        Ok(())
    }

    /// Reads block `block` of `card` into the start of `out`.
    ///
    /// Blocks until the controller reports the transfer complete.
    pub fn read_block(&mut self, card: &Card, block: u32, out: &mut [u8]) -> Result<(), Error> {
        if card.instance() != self.instance {
            return Err(Error::WrongInstance);
        }
        if !card.is_open() {
            return Err(Error::NotOpen);
        }
        let out = out.get_mut(..BLOCK_SIZE).ok_or(Error::BufferTooSmall)?;

        self.send_command(&command::READ_SINGLE_BLOCK, block)?;

        let regs = &self.regs;
        let mut words = out.chunks_exact_mut(4);
        loop {
            let mut status = 0;
            self.wait.until(|| {
                status = regs.read(Reg::Stat);
                status & (stat::BRR | stat::TC | stat::ERRI) != 0
            })?;
            if status & stat::ERRI != 0 {
                regs.write(Reg::Stat, stat::ERRORS);
                return Err(Error::Data { status });
            }
            if status & stat::BRR != 0 {
                regs.write(Reg::Stat, stat::BRR);
                for word in words.by_ref() {
                    word.copy_from_slice(&regs.read(Reg::Data).to_le_bytes());
                }
            }
            if status & stat::TC != 0 {
                regs.write(Reg::Stat, stat::TC);
                return Ok(());
            }
        }
    }

    /// Polls ACMD41 until the card leaves its power-up state, returning the
    /// final OCR. Failed polls count as "not yet".
    fn wait_ready(&mut self) -> Result<u32, Error> {
        for _ in 0..READY_RETRIES {
            if self.send_command(&command::APP_CMD, 0).is_err() {
                continue;
            }
            let Ok(response) = self.send_command(
                &command::SD_SEND_OP_COND,
                OCR_HIGH_CAPACITY | OCR_VDD_27_36,
            ) else {
                continue;
            };
            if response[0] & OCR_BUSY != 0 {
                return Ok(response[0]);
            }
        }
        Err(Error::NotReady)
    }

    /// Reads the SD configuration register, most significant word first.
    fn read_scr(&mut self, rca: u32) -> Result<[u32; 2], Error> {
        self.send_command(&command::APP_CMD, rca)?;
        self.send_command(&command::SEND_SCR, 0)?;

        let regs = &self.regs;
        self.wait
            .until(|| regs.read(Reg::Stat) & (stat::BRR | stat::ERRI) != 0)?;
        let status = regs.read(Reg::Stat);
        if status & stat::ERRI != 0 {
            regs.write(Reg::Stat, stat::ERRORS);
            return Err(Error::Data { status });
        }
        regs.write(Reg::Stat, stat::BRR);
        // The register arrives most significant byte first.
        let scr = [
            regs.read(Reg::Data).swap_bytes(),
            regs.read(Reg::Data).swap_bytes(),
        ];
        Ok(scr)
    }

    fn set_clock(&mut self, hz: u32) -> Result<(), Error> {
        let divider = REFERENCE_HZ / hz;
        let regs = &self.regs;
        regs.modify(Reg::SysCtl, |v| {
            (v & !sysctl::CLKD_MASK) | sysctl::clkd(divider)
        });
        self.wait
            .until(|| regs.read(Reg::SysCtl) & sysctl::ICS != 0)?;
        Ok(())
    }
}
