// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A register-level stand-in for an MMCHS controller with a card in it.
//!
//! Commands complete the moment they are written, so every wait in the
//! driver is satisfied on its first poll unless the card is configured to
//! misbehave.

use std::cell::RefCell;
use std::collections::VecDeque;

use hex_literal::hex;

use super::regs::{con, hctl, pstate, stat, sysctl, sysstatus, Reg, Registers};

/// How the emulated card behaves.
#[derive(Clone, Debug)]
pub struct FakeCard {
    pub present: bool,
    /// Bus power sticks when the driver turns it on.
    pub powers_up: bool,
    /// Soft reset completes.
    pub resets: bool,
    pub high_capacity: bool,
    /// Number of ACMD41 polls answered with "busy".
    pub busy_polls: u32,
    /// Low 12 bits of the CMD8 response.
    pub if_cond_echo: u32,
    /// A (non-application) command index that times out.
    pub fail: Option<u8>,
    pub rca: u16,
    pub cid: [u32; 4],
    pub csd: [u32; 4],
    /// Most significant word first.
    pub scr: [u32; 2],
    /// Card contents. Reads past the end return zeros.
    pub disk: Vec<u8>,
}

impl Default for FakeCard {
    fn default() -> Self {
        Self {
            present: true,
            powers_up: true,
            resets: true,
            high_capacity: true,
            busy_polls: 0,
            if_cond_echo: 0x1AA,
            fail: None,
            rca: 0xB368,
            cid: [0x8C01_2E00, 0x5331_3030, 0x4441_3035, 0x0353_4453],
            csd: words(hex!("400e0032 5b590000 3b377f80 0a4040af")),
            scr: [0x0235_8000, 0],
            disk: Vec::new(),
        }
    }
}

/// Register order of a 128-bit register printed most significant byte first.
pub fn words(bytes: [u8; 16]) -> [u32; 4] {
    let mut words = [0; 4];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        words[3 - i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

pub struct FakeMmc {
    inner: RefCell<Inner>,
}

struct Inner {
    card: FakeCard,
    regs: [u32; 0x100],
    stat: u32,
    fifo: VecDeque<u32>,
    app_cmd: bool,
    polls: u32,
    commands: Vec<(u8, u32)>,
}

impl FakeMmc {
    pub fn new(card: FakeCard) -> Self {
        Self {
            inner: RefCell::new(Inner {
                card,
                regs: [0; 0x100],
                stat: 0,
                fifo: VecDeque::new(),
                app_cmd: false,
                polls: 0,
                commands: Vec::new(),
            }),
        }
    }

    /// Every command issued so far, as (index, argument).
    pub fn commands(&self) -> Vec<(u8, u32)> {
        self.inner.borrow().commands.clone()
    }

    /// Inserts or pulls the card.
    pub fn set_present(&self, present: bool) {
        self.inner.borrow_mut().card.present = present;
    }
}

impl Inner {
    fn reg(&mut self, reg: Reg) -> &mut u32 {
        &mut self.regs[reg as usize / 4 - 0x44]
    }

    fn execute(&mut self, value: u32) {
        if *self.reg(Reg::Con) & con::INIT != 0 {
            self.stat |= stat::CC;
            return;
        }

        let index = (value >> 24) as u8 & 0x3F;
        let arg = *self.reg(Reg::Arg);
        let app = core::mem::take(&mut self.app_cmd);
        self.commands.push((index, arg));

        if !app && self.card.fail == Some(index) {
            self.stat |= stat::CTO;
            return;
        }

        let card = &self.card;
        let mut response = [0u32; 4];
        match (app, index) {
            (_, 0) => self.polls = 0,
            (false, 55) => {
                self.app_cmd = true;
                response[0] = 0x120;
            }
            (false, 8) => response[0] = card.if_cond_echo,
            (true, 41) => {
                self.polls += 1;
                response[0] = 0x00FF_8000;
                if card.high_capacity {
                    response[0] |= 1 << 30;
                }
                if self.polls > card.busy_polls {
                    response[0] |= 1 << 31;
                }
            }
            (false, 2) => response = card.cid,
            (false, 3) => response[0] = (u32::from(card.rca) << 16) | 0x0500,
            (false, 9) => response = card.csd,
            (false, 7) => response[0] = 0x0700,
            (true, 6) => response[0] = 0x0920,
            (true, 51) => {
                let scr = card.scr;
                self.fifo.extend(scr.iter().map(|w| w.swap_bytes()));
                self.stat |= stat::BRR | stat::TC;
            }
            (false, 17) => {
                let start = arg as usize * 512;
                let block: Vec<u32> = (0..128)
                    .map(|i| {
                        let mut word = [0u8; 4];
                        for (j, b) in word.iter_mut().enumerate() {
                            *b = card.disk.get(start + i * 4 + j).copied().unwrap_or(0);
                        }
                        u32::from_le_bytes(word)
                    })
                    .collect();
                self.fifo.extend(block);
                self.stat |= stat::BRR | stat::TC;
                response[0] = 0x0900;
            }
            _ => {
                self.stat |= stat::CTO;
                return;
            }
        }

        *self.reg(Reg::Rsp10) = response[0];
        *self.reg(Reg::Rsp32) = response[1];
        *self.reg(Reg::Rsp54) = response[2];
        *self.reg(Reg::Rsp76) = response[3];
        self.stat |= stat::CC;
    }
}

impl Registers for FakeMmc {
    fn read(&self, reg: Reg) -> u32 {
        let mut inner = self.inner.borrow_mut();
        match reg {
            Reg::SysStatus => {
                if inner.card.resets {
                    sysstatus::RESETDONE
                } else {
                    0
                }
            }
            Reg::PState => {
                if inner.card.present {
                    pstate::CINS
                } else {
                    0
                }
            }
            Reg::Stat => {
                let mut value = inner.stat;
                if value & stat::ERRORS != 0 {
                    value |= stat::ERRI;
                }
                value
            }
            Reg::SysCtl => {
                let value = *inner.reg(Reg::SysCtl);
                if value & sysctl::ICE != 0 {
                    value | sysctl::ICS
                } else {
                    value
                }
            }
            Reg::Data => inner.fifo.pop_front().unwrap_or(0),
            other => *inner.reg(other),
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        let mut inner = self.inner.borrow_mut();
        match reg {
            Reg::Stat => inner.stat &= !value,
            Reg::Cmd => inner.execute(value),
            Reg::SysCtl => *inner.reg(Reg::SysCtl) = value & !(sysctl::SRA | sysctl::ICS),
            Reg::Hctl if !inner.card.powers_up => *inner.reg(Reg::Hctl) = value & !hctl::SDBP,
            Reg::Data => {}
            other => *inner.reg(other) = value,
        }
    }
}
