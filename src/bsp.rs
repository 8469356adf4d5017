// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and hooks for implementing Board Support Packages (BSPs).
//!
//! The boot sequence itself doesn't care about the board; it talks to a
//! console, a file store and the `boot::Board` seam. A BSP provides those,
//! plus the little bit of setup needed before any of them work. The exact
//! properties that need to be described are in the `Bsp` trait below.
//!
//! To implement a BSP:
//!
//! 1. Create a module within `boneboot::bsp` named after your board.
//! 2. Define a type in the module called `Board`. This type will never be
//!    instantiated, so it can be arbitrary; an empty enum is easy.
//! 3. Implement `boneboot::bsp::Bsp` for your type.
//! 4. Add a `target-board-*` feature to `Cargo.toml`.
//! 5. Add a branch to the `cfg_if` in `src/bin/boneboot.rs` to detect your
//!    board and select the right type.

// Every BSP is compiled regardless of the selected board, so that they all
// keep building.
pub mod beaglebone;

use crate::boot::{Board, Jumper};
use crate::sdhc::Instance;
use crate::serial::Serial;

/// Requirements placed upon a BSP type.
pub trait Bsp {
    type Console: Serial;
    type Board: Board + Jumper;

    /// Controller the boot card is attached to.
    const SD_INSTANCE: Instance;

    /// Sets up clocks, pins, the console and the LEDs.
    ///
    /// # Safety
    ///
    /// Call exactly once, first thing, before anything else touches the
    /// hardware.
    unsafe fn configure() -> (Self::Console, Self::Board);

    /// Another handle on the console, for logging.
    ///
    /// # Safety
    ///
    /// Only after `configure`. The console is shared with whoever holds the
    /// handle `configure` returned; output interleaves.
    unsafe fn console() -> Self::Console;

    /// Indicate a boot failure. No information is provided as to _what_
    /// failure, because generally speaking we only have one bit of output.
    fn indicate_fault();

    /// RAM set aside to hold a newly received image. Must not overlap
    /// anything the bootloader or a loaded image uses.
    ///
    /// # Safety
    ///
    /// Call at most once.
    unsafe fn staging_area() -> &'static mut [u8];
}
