// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The actual bootloader program.
//!
//! This contains the entry point and support code for the bootloader. It relies
//! on the lib crate for most of the heavy lifting; the code here is dedicated
//! to the particular runtime requirements and setup of the bootloader.
//!
//! Only bare-metal builds produce a real program. On a hosted target this
//! builds to a stub, so that `cargo build` of the workspace still works.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod firmware {
    use core::fmt::Write;
    use core::sync::atomic::{compiler_fence, Ordering};

    use boneboot::boot::{Bootloader, Config};
    use boneboot::bsp::Bsp;
    use boneboot::disk::Disk;
    use boneboot::sdhc::{regs::Mmio, Sdhc};
    use boneboot::serial::Writer;
    use boneboot::store::StagedStore;
    use boneboot::wait::Spin;

    // Select the appropriate BSP type as `Board`
    cfg_if::cfg_if! {
        if #[cfg(feature = "target-board-beaglebone")] {
            use boneboot::bsp::beaglebone::Board;
        }
    }

    // The ROM jumps here in ARM state with the stack pointer wherever it left
    // it, and .bss uninitialized.
    core::arch::global_asm!(
        ".section .text._start, \"ax\"",
        ".global _start",
        ".arm",
        "_start:",
        "    ldr sp, =__stack_top",
        "    ldr r0, =__sbss",
        "    ldr r1, =__ebss",
        "    mov r2, #0",
        "1:  cmp r0, r1",
        "    strlo r2, [r0], #4",
        "    blo 1b",
        "    bl main",
        "2:  b 2b",
    );

    /// Bootloader entry point, called from `_start` once there is a stack.
    #[no_mangle]
    extern "C" fn main() -> ! {
        // Safety: this is the first thing to run, and runs once.
        let (console, board) = unsafe { Board::configure() };

        // Safety: single threaded, no interrupts.
        unsafe {
            log::set_logger_racy(&ConsoleLogger).ok();
        }
        log::set_max_level(if cfg!(feature = "verbose") {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });

        let config = Config::default();

        // Safety: this is the controller's register block, and nothing else
        // touches it.
        let regs = unsafe { Mmio::new(Board::SD_INSTANCE.base()) };
        let disk = Disk::new(Sdhc::new(regs, Spin, Board::SD_INSTANCE));
        // Safety: the only call.
        let staging = unsafe { Board::staging_area() };
        let store = StagedStore::new(disk, Disk::<Mmio, Spin>::DRIVE, config.image_path, staging);

        Bootloader::new(console, store, board, config).run()
    }

    struct ConsoleLogger;

    impl log::Log for ConsoleLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            // Safety: the logger is installed after `configure`.
            let console = unsafe { Board::console() };
            writeln!(Writer(console), "{} - {}", record.level(), record.args()).ok();
        }

        fn flush(&self) {}
    }

    #[panic_handler]
    fn panic_handler(_: &core::panic::PanicInfo) -> ! {
        Board::indicate_fault();
        loop {
            // Keep the loop from being optimized into something odd.
            compiler_fence(Ordering::SeqCst);
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("boneboot only runs on the board; build for armv7a-none-eabi");
}
