// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MMCHS register map (AM335x TRM chapter 18), and the trait the driver
//! accesses it through.
//!
//! Only the registers and fields the driver touches are described here.

/// Register offsets from the start of an MMCHS instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum Reg {
    SysConfig = 0x110,
    SysStatus = 0x114,
    Con = 0x12C,
    Blk = 0x204,
    Arg = 0x208,
    Cmd = 0x20C,
    Rsp10 = 0x210,
    Rsp32 = 0x214,
    Rsp54 = 0x218,
    Rsp76 = 0x21C,
    Data = 0x220,
    PState = 0x224,
    Hctl = 0x228,
    SysCtl = 0x22C,
    Stat = 0x230,
    Ie = 0x234,
    Capa = 0x240,
}

/// Access to one controller's register file.
///
/// Writes go through `&self`, as with any MMIO block: the hardware is the
/// state, not this handle.
pub trait Registers {
    fn read(&self, reg: Reg) -> u32;
    fn write(&self, reg: Reg, value: u32);

    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        self.write(reg, f(self.read(reg)));
    }
}

/// The real thing: volatile accesses at a fixed base address.
#[derive(Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of an MMCHS instance whose module clock is
    /// running, and nothing else may be driving it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl Registers for Mmio {
    fn read(&self, reg: Reg) -> u32 {
        // Safety: in bounds of the register block per the contract of `new`.
        unsafe { core::ptr::read_volatile((self.base + reg as usize) as *const u32) }
    }

    fn write(&self, reg: Reg, value: u32) {
        // Safety: as above.
        unsafe { core::ptr::write_volatile((self.base + reg as usize) as *mut u32, value) }
    }
}

pub mod sysconfig {
    pub const AUTOIDLE: u32 = 1 << 0;
    pub const SOFTRESET: u32 = 1 << 1;
    pub const fn clockactivity(v: u32) -> u32 {
        (v & 0x3) << 8
    }
    pub const fn standbymode(v: u32) -> u32 {
        (v & 0x3) << 12
    }
}

pub mod sysstatus {
    pub const RESETDONE: u32 = 1 << 0;
}

pub mod con {
    pub const INIT: u32 = 1 << 1;
    pub const DW8: u32 = 1 << 5;
}

pub mod blk {
    pub const fn blen(v: u32) -> u32 {
        v & 0xFFF
    }
    pub const fn nblk(v: u32) -> u32 {
        (v & 0xFFFF) << 16
    }
}

pub mod cmd {
    pub const DDIR: u32 = 1 << 4;
    pub const CCCE: u32 = 1 << 19;
    pub const CICE: u32 = 1 << 20;
    pub const DP: u32 = 1 << 21;
    pub const fn rsp_type(v: u32) -> u32 {
        (v & 0x3) << 16
    }
    pub const fn cmd_type(v: u32) -> u32 {
        (v & 0x3) << 22
    }
    pub const fn indx(v: u32) -> u32 {
        (v & 0x3F) << 24
    }
}

pub mod pstate {
    /// Card inserted.
    pub const CINS: u32 = 1 << 16;
}

pub mod hctl {
    /// 4-bit data bus.
    pub const DTW: u32 = 1 << 1;
    pub const HSPE: u32 = 1 << 2;
    pub const SDBP: u32 = 1 << 8;
    pub const SDVS_MASK: u32 = 0x7 << 9;
    pub const SDVS_1V8: u32 = 0x5 << 9;
    pub const SDVS_3V3: u32 = 0x7 << 9;
}

pub mod sysctl {
    pub const ICE: u32 = 1 << 0;
    pub const ICS: u32 = 1 << 1;
    pub const CEN: u32 = 1 << 2;
    pub const CLKD_MASK: u32 = 0x3FF << 6;
    pub const DTO_MASK: u32 = 0xF << 16;
    pub const SRA: u32 = 1 << 24;
    pub const fn clkd(v: u32) -> u32 {
        (v & 0x3FF) << 6
    }
    pub const fn dto(v: u32) -> u32 {
        (v & 0xF) << 16
    }
}

/// Status bits. Writing a one clears the bit. `IE` uses the same layout.
pub mod stat {
    /// Command complete.
    pub const CC: u32 = 1 << 0;
    /// Transfer complete.
    pub const TC: u32 = 1 << 1;
    pub const BWR: u32 = 1 << 4;
    /// Buffer read ready.
    pub const BRR: u32 = 1 << 5;
    /// Summary of the error bits; read only.
    pub const ERRI: u32 = 1 << 15;
    /// Command timeout, the first of the individual error bits.
    pub const CTO: u32 = 1 << 16;
    pub const ERRORS: u32 = 0xFFFF_0000;
}

pub mod capa {
    pub const VS33: u32 = 1 << 24;
    pub const VS18: u32 = 1 << 26;
}
