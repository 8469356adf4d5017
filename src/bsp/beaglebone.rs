// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BeagleBone (AM335x): console on UART0, user LEDs on GPIO1, boot card on
//! MMC0.
//!
//! Nothing here programs the EMIF or the DDR PHY, and the boot ROM doesn't
//! either. DDR has to be brought up before this runs: by a debugger init
//! script (the AM335x GEL files do it) or by an earlier stage that then hands
//! over to us. Booted by the ROM straight off a cold card, this image fails
//! the RAM test and sits in the fault blink with "DDR ERROR".

use crate::boot::{self, Led, Pause};
use crate::sdhc::Instance;
use crate::serial::Serial;
use crate::wait::{Bounded, Wait};

const DRAM_BASE: usize = 0x8000_0000;
/// End of the region covered by the RAM test, and start of the staging area.
const DRAM_TEST_END: usize = 0x8FA0_0000;
const DRAM_END: usize = 0x9000_0000;
/// In words.
const RAM_TEST_STRIDE: usize = 0x40;

/// Polls of the line status register before a read gives up on a byte.
const READ_POLLS: u32 = 20_000;
const WRITE_POLLS: u32 = 20_000;

mod addr {
    pub const CM_PER: usize = 0x44E0_0000;
    pub const CM_WKUP: usize = 0x44E0_0400;
    pub const CONTROL: usize = 0x44E1_0000;
    pub const UART0: usize = 0x44E0_9000;
    pub const WDT1: usize = 0x44E3_5000;
    pub const GPIO1: usize = 0x4804_C000;
}

mod cm {
    pub const PER_L4LS_CLKSTCTRL: usize = 0x00;
    pub const PER_L3S_CLKSTCTRL: usize = 0x04;
    pub const PER_L3_CLKSTCTRL: usize = 0x0C;
    pub const PER_MMC0_CLKCTRL: usize = 0x3C;
    pub const PER_L4LS_CLKCTRL: usize = 0x60;
    pub const PER_GPIO1_CLKCTRL: usize = 0xAC;
    pub const PER_L3_CLKCTRL: usize = 0xE0;

    pub const WKUP_CLKSTCTRL: usize = 0x00;
    pub const WKUP_CONTROL_CLKCTRL: usize = 0x04;
    pub const WKUP_UART0_CLKCTRL: usize = 0xB4;

    pub const MODULEMODE_ENABLE: u32 = 2;
    pub const IDLEST_MASK: u32 = 3 << 16;
    pub const CLKTRCTRL_SW_WKUP: u32 = 2;
    pub const CLKACTIVITY_UART0_GFCLK: u32 = 1 << 12;
}

mod pad {
    pub const GPMC_A5: usize = 0x854;
    pub const GPMC_A6: usize = 0x858;
    pub const MMC0_DAT3: usize = 0x8F0;
    pub const MMC0_DAT2: usize = 0x8F4;
    pub const MMC0_DAT1: usize = 0x8F8;
    pub const MMC0_DAT0: usize = 0x8FC;
    pub const MMC0_CLK: usize = 0x900;
    pub const MMC0_CMD: usize = 0x904;
    pub const UART0_RXD: usize = 0x970;
    pub const UART0_TXD: usize = 0x974;

    pub const PULLUP: u32 = 1 << 4;
    pub const RXACTIVE: u32 = 1 << 5;
    pub const GPIO: u32 = 7;
}

mod uart {
    pub const RHR: usize = 0x00;
    pub const THR: usize = 0x00;
    pub const DLL: usize = 0x00;
    pub const IER: usize = 0x04;
    pub const DLH: usize = 0x04;
    pub const FCR: usize = 0x08;
    pub const EFR: usize = 0x08;
    pub const LCR: usize = 0x0C;
    pub const LSR: usize = 0x14;
    pub const MDR1: usize = 0x20;

    pub const CONFIG_MODE_B: u32 = 0xBF;
    pub const LCR_8N1: u32 = 0x03;
    pub const EFR_ENHANCED_EN: u32 = 1 << 4;
    pub const FCR_FIFO_EN: u32 = 1;
    pub const FCR_CLEAR: u32 = 3 << 1;
    pub const MDR1_16X: u32 = 0;
    pub const MDR1_DISABLE: u32 = 7;
    pub const LSR_RX_FIFO_E: u32 = 1;
    pub const LSR_TX_SR_E: u32 = 1 << 6;

    /// 115200 baud from the 48 MHz functional clock.
    pub const DIVISOR: u32 = 26;
}

mod gpio {
    pub const OE: usize = 0x134;
    pub const DATAOUT: usize = 0x13C;
    pub const CLEARDATAOUT: usize = 0x190;
    pub const SETDATAOUT: usize = 0x194;
}

mod wdt {
    pub const WWPS: usize = 0x34;
    pub const WSPR: usize = 0x48;
    pub const W_PEND_WSPR: u32 = 1 << 4;
}

fn read(addr: usize) -> u32 {
    // Safety: only ever called with peripheral register addresses above.
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

fn write(addr: usize, value: u32) {
    // Safety: as for `read`.
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
}

fn spin_until(done: impl FnMut() -> bool) {
    // `Spin` can't time out.
    crate::wait::Spin.until(done).ok();
}

fn led_pin(led: Led) -> u32 {
    match led {
        Led::Activity => 21,
        Led::Fault => 22,
    }
}

pub enum Board {}

impl super::Bsp for Board {
    type Console = Uart0;
    type Board = BeagleBone;

    const SD_INSTANCE: Instance = Instance::Mmc0;

    unsafe fn configure() -> (Uart0, BeagleBone) {
        disable_watchdog();
        enable_clocks();
        configure_pins();
        configure_uart();

        let leds = (1 << led_pin(Led::Activity)) | (1 << led_pin(Led::Fault));
        write(addr::GPIO1 + gpio::CLEARDATAOUT, leds);
        write(addr::GPIO1 + gpio::OE, read(addr::GPIO1 + gpio::OE) & !leds);

        (Uart0 { _private: () }, BeagleBone { _private: () })
    }

    unsafe fn console() -> Uart0 {
        Uart0 { _private: () }
    }

    fn indicate_fault() {
        write(addr::GPIO1 + gpio::SETDATAOUT, 1 << led_pin(Led::Fault));
    }

    unsafe fn staging_area() -> &'static mut [u8] {
        core::slice::from_raw_parts_mut(DRAM_TEST_END as *mut u8, DRAM_END - DRAM_TEST_END)
    }
}

/// The ROM leaves the watchdog running; it has to go before anything slow.
fn disable_watchdog() {
    for key in [0xAAAA, 0x5555] {
        write(addr::WDT1 + wdt::WSPR, key);
        spin_until(|| read(addr::WDT1 + wdt::WWPS) & wdt::W_PEND_WSPR == 0);
    }
}

fn enable_module(clkctrl: usize) {
    write(clkctrl, cm::MODULEMODE_ENABLE);
    spin_until(|| read(clkctrl) & cm::IDLEST_MASK == 0);
}

fn enable_clocks() {
    for clkctrl in [cm::PER_L3_CLKCTRL, cm::PER_L4LS_CLKCTRL] {
        enable_module(addr::CM_PER + clkctrl);
    }
    for clkstctrl in [
        cm::PER_L3_CLKSTCTRL,
        cm::PER_L3S_CLKSTCTRL,
        cm::PER_L4LS_CLKSTCTRL,
    ] {
        write(addr::CM_PER + clkstctrl, cm::CLKTRCTRL_SW_WKUP);
    }
    write(addr::CM_WKUP + cm::WKUP_CLKSTCTRL, cm::CLKTRCTRL_SW_WKUP);
    enable_module(addr::CM_WKUP + cm::WKUP_CONTROL_CLKCTRL);

    enable_module(addr::CM_WKUP + cm::WKUP_UART0_CLKCTRL);
    spin_until(|| read(addr::CM_WKUP + cm::WKUP_CLKSTCTRL) & cm::CLKACTIVITY_UART0_GFCLK != 0);
    enable_module(addr::CM_PER + cm::PER_GPIO1_CLKCTRL);
    enable_module(addr::CM_PER + cm::PER_MMC0_CLKCTRL);
}

fn configure_pins() {
    let pins = [
        (pad::UART0_RXD, pad::RXACTIVE | pad::PULLUP),
        (pad::UART0_TXD, pad::PULLUP),
        (pad::MMC0_DAT3, pad::RXACTIVE | pad::PULLUP),
        (pad::MMC0_DAT2, pad::RXACTIVE | pad::PULLUP),
        (pad::MMC0_DAT1, pad::RXACTIVE | pad::PULLUP),
        (pad::MMC0_DAT0, pad::RXACTIVE | pad::PULLUP),
        (pad::MMC0_CLK, pad::RXACTIVE | pad::PULLUP),
        (pad::MMC0_CMD, pad::RXACTIVE | pad::PULLUP),
        (pad::GPMC_A5, pad::GPIO),
        (pad::GPMC_A6, pad::GPIO),
    ];
    for (offset, conf) in pins {
        write(addr::CONTROL + offset, conf);
    }
}

/// 115200 8N1 with the FIFOs on and interrupts off.
fn configure_uart() {
    let base = addr::UART0;
    write(base + uart::MDR1, uart::MDR1_DISABLE);

    write(base + uart::LCR, uart::CONFIG_MODE_B);
    let efr = read(base + uart::EFR);
    write(base + uart::EFR, efr | uart::EFR_ENHANCED_EN);
    write(base + uart::LCR, 0);
    write(base + uart::IER, 0);
    write(base + uart::FCR, uart::FCR_FIFO_EN | uart::FCR_CLEAR);

    write(base + uart::LCR, uart::CONFIG_MODE_B);
    write(base + uart::DLL, uart::DIVISOR & 0xFF);
    write(base + uart::DLH, uart::DIVISOR >> 8);
    write(base + uart::EFR, efr);

    write(base + uart::LCR, uart::LCR_8N1);
    write(base + uart::MDR1, uart::MDR1_16X);
}

/// The console UART.
pub struct Uart0 {
    _private: (),
}

impl Serial for Uart0 {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        for (n, byte) in buf.iter_mut().enumerate() {
            let ready = Bounded(READ_POLLS)
                .until(|| read(addr::UART0 + uart::LSR) & uart::LSR_RX_FIFO_E != 0);
            if ready.is_err() {
                return n;
            }
            *byte = read(addr::UART0 + uart::RHR) as u8;
        }
        buf.len()
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        for (n, &byte) in buf.iter().enumerate() {
            let ready = Bounded(WRITE_POLLS)
                .until(|| read(addr::UART0 + uart::LSR) & uart::LSR_TX_SR_E != 0);
            if ready.is_err() {
                return n;
            }
            write(addr::UART0 + uart::THR, u32::from(byte));
        }
        buf.len()
    }
}

pub struct BeagleBone {
    _private: (),
}

impl boot::Board for BeagleBone {
    fn set_led(&mut self, led: Led, on: bool) {
        let reg = if on {
            gpio::SETDATAOUT
        } else {
            gpio::CLEARDATAOUT
        };
        write(addr::GPIO1 + reg, 1 << led_pin(led));
    }

    fn toggle_led(&mut self, led: Led) {
        let on = read(addr::GPIO1 + gpio::DATAOUT) & (1 << led_pin(led)) != 0;
        self.set_led(led, !on);
    }

    fn pause(&mut self, pause: Pause) {
        let spins: u32 = match pause {
            Pause::Tick => 0x1F_FFFF,
            Pause::Retry => 0x6_FFFF,
            Pause::Blink => 0x4_FFFF,
        };
        for _ in 0..spins {
            core::hint::spin_loop();
        }
    }

    fn test_ram(&mut self) -> bool {
        // Safety: nothing lives in DRAM until we put an image there.
        let ram = unsafe {
            core::slice::from_raw_parts_mut(
                DRAM_BASE as *mut u32,
                (DRAM_TEST_END - DRAM_BASE) / 4,
            )
        };
        boot::ram_test(ram, RAM_TEST_STRIDE)
    }

    fn can_load(&self, address: u32, len: u32) -> bool {
        // Tested DRAM only. Above it is the staging area holding the file
        // being loaded, and SRAM holds us.
        let start = address as usize;
        match start.checked_add(len as usize) {
            Some(end) => start >= DRAM_BASE && end <= DRAM_TEST_END,
            None => false,
        }
    }

    unsafe fn copy_to_ram(&mut self, address: u32, data: &[u8]) {
        core::ptr::copy_nonoverlapping(data.as_ptr(), address as usize as *mut u8, data.len());
    }
}

impl boot::Jumper for BeagleBone {
    unsafe fn jump(&mut self, entry: u32) {
        // The image went in through the data side; make sure it's all out
        // there before we fetch instructions from it.
        #[cfg(target_arch = "arm")]
        core::arch::asm!("dsb", "isb");

        let entry: extern "C" fn() = core::mem::transmute(entry as usize);
        entry();
    }
}
