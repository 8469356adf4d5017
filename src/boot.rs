// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boot sequence.
//!
//! Once per power-on:
//!
//! 1. Test RAM and mount the card. Failing either is fatal.
//! 2. If there's an image, give the operator a few seconds to ask for a new
//!    one instead.
//! 3. Get an image over XMODEM if we need one.
//! 4. Copy the image to the load address named in its header and jump to it.
//!
//! Anything that goes wrong in 3 or 4 lands us back in 3, waiting for a
//! transfer. This is the recovery path, so it must never give up.
//!
//! Everything here is ordinary code over the [`Board`], [`Jumper`],
//! [`Serial`] and [`FileStore`] seams; the board support package supplies the
//! real ones.

use log::{debug, error, info, warn};

use crate::serial::Serial;
use crate::store::{self, FileStore, Mode};
use crate::xmodem::{self, Receiver, MAX_PAYLOAD};
use crate::{ImageHeader, LoadError, BAD_ADDRESS, HEADER_SIZE};

/// Written to every `stride`th word of RAM by [`ram_test`].
pub const RAM_PATTERN: u32 = 0x1234_5678;

/// Largest chunk the loader moves at once.
pub const MAX_CHUNK: usize = 1024;

/// Boot policy.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// The application image.
    pub image_path: &'static str,
    /// Length of the "press a key for a new image" window, in ticks.
    pub countdown_ticks: u32,
    /// Receive attempts per XMODEM packet.
    pub retries: u32,
    /// Bytes copied to RAM per file read; at most `MAX_CHUNK`.
    pub chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_path: "/app",
            countdown_ticks: 5,
            retries: 0x2000,
            chunk: 512,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Led {
    /// Blinks while we wait, and once per received packet.
    Activity,
    /// On during the RAM test; blinks forever if we halt.
    Fault,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pause {
    /// One countdown tick, about a second.
    Tick,
    /// Between rounds of the recovery loop.
    Retry,
    /// Half a period of the fault blink.
    Blink,
}

/// What the boot sequence needs from the board, apart from the console and
/// storage.
pub trait Board {
    fn set_led(&mut self, led: Led, on: bool);
    fn toggle_led(&mut self, led: Led);
    fn pause(&mut self, pause: Pause);

    /// Checks that external RAM works.
    fn test_ram(&mut self) -> bool;

    /// Whether an image may occupy `len` bytes from `address`: RAM that
    /// exists, and that neither this program nor the staged file lives in.
    fn can_load(&self, address: u32, len: u32) -> bool;

    /// Copies `data` to physical address `address`.
    ///
    /// # Safety
    ///
    /// The destination must be RAM that nothing in this program uses.
    unsafe fn copy_to_ram(&mut self, address: u32, data: &[u8]);
}

/// Transfers control to loaded code.
pub trait Jumper {
    /// Calls the code at `entry` with no arguments.
    ///
    /// Ordinarily this never returns. If the program does return, so does
    /// this.
    ///
    /// # Safety
    ///
    /// `entry` must be the address of code, following the platform calling
    /// convention, that won't trample on this program's memory if it wants
    /// to come back.
    unsafe fn jump(&mut self, entry: u32);
}

/// Conditions we can't boot past.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Fatal {
    #[error("DDR ERROR")]
    Ram,
    #[error("failed to mount SD card: {0}")]
    Mount(store::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AcquireError {
    #[error("failed to create image file: {0}")]
    Create(store::Error),
    #[error("no transfer started: {0}")]
    NotStarted(xmodem::Error),
    #[error("error in transfer: {0}")]
    Transfer(xmodem::Error),
    #[error("failed to write chunk: {0}")]
    Write(store::Error),
}

/// Where the recovery loop is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootState {
    /// Waiting for an image over XMODEM.
    Waiting,
    /// There's an image file; try to boot it.
    Loading,
}

pub struct Bootloader<S, F, B> {
    serial: S,
    store: F,
    board: B,
    config: Config,
}

impl<S, F, B> Bootloader<S, F, B>
where
    S: Serial,
    F: FileStore,
    B: Board + Jumper,
{
    pub fn new(serial: S, store: F, board: B, config: Config) -> Self {
        Self {
            serial,
            store,
            board,
            config,
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn store(&self) -> &F {
        &self.store
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Boots. Never returns; if nothing bootable ever arrives we wait for a
    /// transfer forever.
    pub fn run(&mut self) -> ! {
        if let Err(e) = self.bring_up() {
            error!("{e}");
            self.halt();
        }
        let mut state = self.start();
        loop {
            self.step(&mut state);
        }
    }

    /// Blinks the fault LED forever.
    pub fn halt(&mut self) -> ! {
        loop {
            self.board.toggle_led(Led::Fault);
            self.board.pause(Pause::Blink);
        }
    }

    /// Tests RAM and mounts storage.
    pub fn bring_up(&mut self) -> Result<(), Fatal> {
        info!("AM335x BeagleBone Bootloader");
        info!("Executing DDR Test...");

        self.board.set_led(Led::Fault, true);
        if !self.board.test_ram() {
            return Err(Fatal::Ram);
        }
        info!("DDR OK");
        self.board.set_led(Led::Fault, false);

        self.store.mount().map_err(Fatal::Mount)
    }

    /// Decides where the recovery loop starts: with the image on storage,
    /// unless there isn't one or the operator asks for a new one.
    pub fn start(&mut self) -> BootState {
        if self.image_present() && !self.countdown() {
            return BootState::Loading;
        }
        info!("Waiting for file transfer...");
        BootState::Waiting
    }

    /// One round of the recovery loop.
    pub fn step(&mut self, state: &mut BootState) {
        match *state {
            BootState::Waiting => match self.acquire() {
                Ok(len) => {
                    info!("Programming successful ({len} bytes)");
                    *state = BootState::Loading;
                }
                Err(AcquireError::NotStarted(e)) => debug!("still waiting: {e}"),
                Err(e) => warn!("{e}"),
            },
            BootState::Loading => {
                let entry = self.load();
                if entry != BAD_ADDRESS {
                    info!("Jumping to application");
                    // Safety: `entry` is where we just put the image. That
                    // region isn't ours, per the memory map.
                    unsafe { self.board.jump(entry) };
                }
                warn!("Failed to load image");
                info!("No image detected. Waiting for file transfer...");
                *state = BootState::Waiting;
            }
        }
        self.board.toggle_led(Led::Activity);
        self.board.pause(Pause::Retry);
    }

    pub fn image_present(&mut self) -> bool {
        match self.store.open(self.config.image_path, Mode::Read) {
            Ok(file) => {
                self.store.close(file).ok();
                true
            }
            Err(_) => false,
        }
    }

    /// Counts down, returning `true` if any key was pressed meanwhile.
    pub fn countdown(&mut self) -> bool {
        info!("Press any key to transfer new image...");
        for remaining in (0..self.config.countdown_ticks).rev() {
            info!("{}", if remaining > 0 { "Tick..." } else { "Tock!" });
            self.board.pause(Pause::Tick);
            if self.serial.read(&mut [0u8; 1]) == 1 {
                return true;
            }
        }
        false
    }

    /// Receives an image over XMODEM into the image file, returning its
    /// length.
    ///
    /// If the sender never shows up this gives up after one round of
    /// retries, with `NotStarted`; call again to keep waiting. Once a
    /// transfer has started any failure cancels it and leaves the image file
    /// empty.
    pub fn acquire(&mut self) -> Result<usize, AcquireError> {
        let path = self.config.image_path;
        let mut file = self
            .store
            .open(path, Mode::CreateAlways)
            .map_err(AcquireError::Create)?;

        debug!("Waiting for XMODEM transfer to begin");
        let mut rx = Receiver::new();
        rx.init(&mut self.serial, self.config.retries)
            .map_err(AcquireError::NotStarted)?;

        let mut chunk = [0u8; MAX_PAYLOAD];
        let mut total = 0;
        let result = loop {
            match rx.receive_next(&mut chunk) {
                Ok(0) => break Ok(total),
                Ok(len) => match self.store.write(&mut file, &chunk[..len]) {
                    Ok(written) if written == len => total += len,
                    Ok(_) => {
                        rx.abort().ok();
                        break Err(AcquireError::Write(store::Error::Full));
                    }
                    Err(e) => {
                        rx.abort().ok();
                        break Err(AcquireError::Write(e));
                    }
                },
                Err(e) if total == 0 => break Err(AcquireError::NotStarted(e)),
                Err(e) => break Err(AcquireError::Transfer(e)),
            }
            self.board.toggle_led(Led::Activity);
        };
        self.store.close(file).ok();

        if let Err(AcquireError::Transfer(_) | AcquireError::Write(_)) = result {
            // Don't leave a partial image behind.
            if let Ok(file) = self.store.open(path, Mode::CreateAlways) {
                self.store.close(file).ok();
            }
        }
        result
    }

    /// Copies the image to RAM, returning its load address, or
    /// [`BAD_ADDRESS`] if there's nothing loadable.
    pub fn load(&mut self) -> u32 {
        match self.try_load() {
            Ok(address) => address,
            Err(e) => {
                warn!("{e}");
                BAD_ADDRESS
            }
        }
    }

    pub fn try_load(&mut self) -> Result<u32, LoadError> {
        let mut file = self
            .store
            .open(self.config.image_path, Mode::Read)
            .map_err(LoadError::Open)?;
        let result = self.copy_image(&mut file);
        self.store.close(file).ok();
        result
    }

    fn copy_image(&mut self, file: &mut F::File) -> Result<u32, LoadError> {
        let mut raw = [0u8; HEADER_SIZE];
        let n = self.store.read(file, &mut raw).map_err(LoadError::Read)?;
        let header = ImageHeader::parse(&raw[..n]).ok_or(LoadError::NoHeader)?;

        let address = header.load_address.get();
        let len = header
            .body_len()
            .ok_or(LoadError::BadSize(header.size.get()))?;
        if address.checked_add(len).is_none() || !self.board.can_load(address, len) {
            return Err(LoadError::BadAddress { address, len });
        }
        debug!("Loading to {address:#010x}, size {len:#x}");
        info!("Image loading...");

        let mut buf = [0u8; MAX_CHUNK];
        let chunk = self.config.chunk.clamp(1, MAX_CHUNK);
        let mut copied = 0;
        while copied < len {
            let want = chunk.min((len - copied) as usize);
            let got = self
                .store
                .read(file, &mut buf[..want])
                .map_err(LoadError::Read)?;
            if got != want {
                return Err(LoadError::Truncated {
                    expected: header.size.get(),
                    got: HEADER_SIZE as u32 + copied + got as u32,
                });
            }
            // Safety: the board vouched for the whole range in `can_load`.
            unsafe { self.board.copy_to_ram(address + copied, &buf[..want]) };
            copied += want as u32;
        }
        Ok(address)
    }
}

/// Writes [`RAM_PATTERN`] to every `stride`th word of `ram` and checks that
/// it reads back.
pub fn ram_test(ram: &mut [u32], stride: usize) -> bool {
    for word in ram.iter_mut().step_by(stride.max(1)) {
        // Volatile, or the compiler would happily skip the read back.
        unsafe {
            core::ptr::write_volatile(word, RAM_PATTERN);
            if core::ptr::read_volatile(word) != RAM_PATTERN {
                return false;
            }
        }
    }
    true
}
