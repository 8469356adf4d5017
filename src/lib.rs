//! `boneboot`: an SD card and XMODEM bootloader for the AM335x BeagleBone.
//!
//! The library holds everything that doesn't need the actual board: the
//! XMODEM receiver, the SD card driver (over an abstract register file), the
//! filesystem glue, and the boot sequencer itself. The firmware binary wires
//! these to the hardware through the `bsp` module.

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod bsp;
pub mod crc;
pub mod disk;
pub mod fat;
pub mod sdhc;
pub mod serial;
pub mod store;
pub mod wait;
pub mod xmodem;

use core::mem::size_of;

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

/// Returned by the image loader in place of a load address when there is no
/// loadable image.
pub const BAD_ADDRESS: u32 = 0xFFFF_FFFF;

/// Header at the start of an application image file. The image proper
/// follows immediately and is copied verbatim to `load_address`.
#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct ImageHeader {
    /// Size of the whole file, this header included.
    pub size: U32<LittleEndian>,
    pub load_address: U32<LittleEndian>,
}

pub const HEADER_SIZE: usize = size_of::<ImageHeader>();
const_assert_eq!(HEADER_SIZE, 8);

impl ImageHeader {
    pub fn new(size: u32, load_address: u32) -> Self {
        Self {
            size: U32::new(size),
            load_address: U32::new(load_address),
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (header, _) = LayoutVerified::<_, ImageHeader>::new_unaligned_from_prefix(bytes)?;
        Some(*header)
    }

    /// Number of bytes to copy to the load address.
    pub fn body_len(&self) -> Option<u32> {
        self.size.get().checked_sub(HEADER_SIZE as u32)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open application file: {0}")]
    Open(store::Error),
    #[error("failed to read application file: {0}")]
    Read(store::Error),
    #[error("application file is too short for its header")]
    NoHeader,
    #[error("image size {0} is smaller than its header")]
    BadSize(u32),
    #[error("image at {address:#010x} with {len} bytes doesn't fit in loadable RAM")]
    BadAddress { address: u32, len: u32 },
    #[error("image is truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: u32, got: u32 },
}
