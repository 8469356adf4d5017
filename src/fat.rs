// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Just enough FAT32 to find a file and read it.
//!
//! The volume is either the whole drive (a "superfloppy") or the first
//! partition in an MBR. Only 8.3 names are matched; long names are ignored,
//! and matching is case-insensitive the way FAT itself is. Nothing here ever
//! writes.

use core::mem::size_of;

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::disk::{self, BlockDevice, Status};

const SECTOR: usize = 512;

/// Partition types for FAT32 (CHS and LBA flavors).
const PARTITION_FAT32: [u8; 2] = [0x0B, 0x0C];
const PARTITION_TABLE: usize = 446;

const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME: u8 = 0x0F;

const ENTRY_END: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

/// FAT entries at or above this mark the end of a chain.
const END_OF_CHAIN: u32 = 0x0FFF_FFF8;
const CLUSTER_MASK: u32 = 0x0FFF_FFFF;
/// Most data clusters a FAT32 volume can have.
const MAX_CLUSTERS: u32 = 0x0FFF_FFF5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("drive not ready")]
    NotReady,
    #[error(transparent)]
    Disk(#[from] disk::Error),
    #[error("no FAT filesystem found")]
    NoFilesystem,
    #[error("filesystem is not FAT32")]
    Unsupported,
    #[error("file not found")]
    NotFound,
    #[error("invalid path")]
    InvalidPath,
    #[error("path names a directory")]
    IsDirectory,
    #[error("filesystem is corrupt")]
    Corrupt,
    #[error("seek past end of file")]
    OutOfRange,
}

/// Boot sector through the end of the FAT32 extended BIOS parameter block.
#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub(crate) struct BootSector {
    pub jump: [u8; 3],
    pub oem: [u8; 8],
    pub bytes_per_sector: U16<LittleEndian>,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: U16<LittleEndian>,
    pub fat_count: u8,
    pub root_entries: U16<LittleEndian>,
    pub total_sectors_16: U16<LittleEndian>,
    pub media: u8,
    pub fat_size_16: U16<LittleEndian>,
    pub sectors_per_track: U16<LittleEndian>,
    pub heads: U16<LittleEndian>,
    pub hidden_sectors: U32<LittleEndian>,
    pub total_sectors_32: U32<LittleEndian>,
    pub fat_size_32: U32<LittleEndian>,
    pub ext_flags: U16<LittleEndian>,
    pub version: U16<LittleEndian>,
    pub root_cluster: U32<LittleEndian>,
    pub fs_info: U16<LittleEndian>,
    pub backup_boot: U16<LittleEndian>,
    pub reserved: [u8; 12],
    pub drive_number: u8,
    pub reserved1: u8,
    pub boot_signature: u8,
    pub volume_id: U32<LittleEndian>,
    pub label: [u8; 11],
    pub fs_type: [u8; 8],
}

const_assert_eq!(size_of::<BootSector>(), 90);

#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub(crate) struct DirEntry {
    pub name: [u8; 11],
    pub attr: u8,
    pub nt_reserved: u8,
    pub created_tenths: u8,
    pub created_time: U16<LittleEndian>,
    pub created_date: U16<LittleEndian>,
    pub accessed_date: U16<LittleEndian>,
    pub cluster_hi: U16<LittleEndian>,
    pub written_time: U16<LittleEndian>,
    pub written_date: U16<LittleEndian>,
    pub cluster_lo: U16<LittleEndian>,
    pub size: U32<LittleEndian>,
}

const_assert_eq!(size_of::<DirEntry>(), 32);

impl DirEntry {
    fn first_cluster(&self) -> u32 {
        u32::from(self.cluster_hi.get()) << 16 | u32::from(self.cluster_lo.get())
    }

    fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

/// An open file: where it lives and how far into it we've read.
#[derive(Clone, Debug)]
pub struct File {
    first_cluster: u32,
    size: u32,
    pos: u32,
    /// The cluster holding `pos`, or the last one we looked at, and its
    /// index in the chain.
    cluster: u32,
    cluster_index: u32,
}

impl File {
    fn new(first_cluster: u32, size: u32) -> Self {
        Self {
            first_cluster,
            size,
            pos: 0,
            cluster: first_cluster,
            cluster_index: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.pos
    }
}

/// A mounted FAT32 volume.
#[derive(Clone, Debug)]
pub struct Volume {
    drive: u8,
    fat_start: u32,
    data_start: u32,
    sectors_per_cluster: u32,
    root_cluster: u32,
    clusters: u32,
}

impl Volume {
    /// Initializes `drive` and finds a FAT32 filesystem on it.
    pub fn mount<D: BlockDevice + ?Sized>(dev: &mut D, drive: u8) -> Result<Self, Error> {
        if dev.initialize(drive) != Status::Ready {
            return Err(Error::NotReady);
        }

        let mut sector = [0u8; SECTOR];
        dev.read_blocks(drive, &mut sector, 0, 1)?;
        if !signed(&sector) {
            return Err(Error::NoFilesystem);
        }

        let start = if is_boot_sector(&sector) {
            0
        } else {
            let entry = &sector[PARTITION_TABLE..PARTITION_TABLE + 16];
            let start = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
            match entry[4] {
                0 => return Err(Error::NoFilesystem),
                kind if PARTITION_FAT32.contains(&kind) => (),
                _ => return Err(Error::Unsupported),
            }
            dev.read_blocks(drive, &mut sector, start, 1)?;
            if !signed(&sector) || !is_boot_sector(&sector) {
                return Err(Error::NoFilesystem);
            }
            start
        };

        let (bpb, _) = LayoutVerified::<_, BootSector>::new_unaligned_from_prefix(&sector[..])
            .ok_or(Error::NoFilesystem)?;
        let bpb = bpb.into_ref();

        let spc = u32::from(bpb.sectors_per_cluster);
        if !spc.is_power_of_two() || bpb.fat_count == 0 || bpb.reserved_sectors.get() == 0 {
            return Err(Error::Corrupt);
        }
        // FAT12 and FAT16 have a fixed root directory and a 16-bit FAT size.
        if bpb.root_entries.get() != 0 || bpb.fat_size_16.get() != 0 {
            return Err(Error::Unsupported);
        }

        let total = match bpb.total_sectors_16.get() {
            0 => bpb.total_sectors_32.get(),
            n => u32::from(n),
        };
        let fat_size = bpb.fat_size_32.get();
        if fat_size == 0 {
            return Err(Error::Corrupt);
        }
        let reserved = u32::from(bpb.reserved_sectors.get());
        let fats = u32::from(bpb.fat_count)
            .checked_mul(fat_size)
            .ok_or(Error::Corrupt)?;
        let data_sectors = total
            .checked_sub(reserved)
            .and_then(|n| n.checked_sub(fats))
            .ok_or(Error::Corrupt)?;
        let fat_start = start.checked_add(reserved).ok_or(Error::Corrupt)?;
        let data_start = fat_start.checked_add(fats).ok_or(Error::Corrupt)?;
        // Every sector of the volume must be addressable.
        data_start
            .checked_add(data_sectors)
            .ok_or(Error::Corrupt)?;

        let clusters = data_sectors / spc;
        let fat_entries = u64::from(fat_size) * (SECTOR / 4) as u64;
        if clusters > MAX_CLUSTERS || fat_entries < u64::from(clusters) + 2 {
            return Err(Error::Corrupt);
        }

        Ok(Self {
            drive,
            fat_start,
            data_start,
            sectors_per_cluster: spc,
            root_cluster: bpb.root_cluster.get(),
            clusters,
        })
    }

    /// Opens the file at `path`. Components are separated by `/`; a leading
    /// `/` is optional.
    pub fn open<D: BlockDevice + ?Sized>(&self, dev: &mut D, path: &str) -> Result<File, Error> {
        let mut rest = path.strip_prefix('/').unwrap_or(path);
        if rest.split('/').any(|component| short_name(component).is_none()) {
            return Err(Error::InvalidPath);
        }
        let mut dir = self.root_cluster;
        loop {
            let (component, remainder) = match rest.split_once('/') {
                Some((component, remainder)) => (component, Some(remainder)),
                None => (rest, None),
            };
            let name = short_name(component).ok_or(Error::InvalidPath)?;
            let entry = self.find(dev, dir, &name)?;

            match remainder {
                Some(remainder) => {
                    if !entry.is_dir() {
                        return Err(Error::NotFound);
                    }
                    // ".." entries pointing at the root say cluster 0.
                    dir = match entry.first_cluster() {
                        0 => self.root_cluster,
                        cluster => cluster,
                    };
                    rest = remainder;
                }
                None if entry.is_dir() => return Err(Error::IsDirectory),
                None => {
                    let size = entry.size.get();
                    if size > 0 && !self.in_range(entry.first_cluster()) {
                        return Err(Error::Corrupt);
                    }
                    return Ok(File::new(entry.first_cluster(), size));
                }
            }
        }
    }

    /// Reads from the current position of `file`, returning how many bytes
    /// were read. Zero means end of file.
    pub fn read<D: BlockDevice + ?Sized>(
        &self,
        dev: &mut D,
        file: &mut File,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let cluster_bytes = self.sectors_per_cluster * SECTOR as u32;
        let mut sector = [0u8; SECTOR];
        let mut done = 0;

        while done < buf.len() && file.pos < file.size {
            let cluster = self.seek_cluster(dev, file)?;
            let offset = file.pos % cluster_bytes;
            let lba = self.cluster_lba(cluster)? + offset / SECTOR as u32;
            dev.read_blocks(self.drive, &mut sector, lba, 1)?;

            let within = offset as usize % SECTOR;
            let n = (SECTOR - within)
                .min(buf.len() - done)
                .min((file.size - file.pos) as usize);
            buf[done..done + n].copy_from_slice(&sector[within..within + n]);
            done += n;
            file.pos += n as u32;
        }
        Ok(done)
    }

    pub fn seek(&self, file: &mut File, pos: u32) -> Result<(), Error> {
        if pos > file.size {
            return Err(Error::OutOfRange);
        }
        file.pos = pos;
        Ok(())
    }

    fn find<D: BlockDevice + ?Sized>(
        &self,
        dev: &mut D,
        dir: u32,
        name: &[u8; 11],
    ) -> Result<DirEntry, Error> {
        let mut sector = [0u8; SECTOR];
        let mut cluster = dir;
        // A directory can't be longer than the volume; anything else is a
        // loop in the FAT.
        for _ in 0..self.clusters {
            let lba = self.cluster_lba(cluster)?;
            for s in 0..self.sectors_per_cluster {
                dev.read_blocks(self.drive, &mut sector, lba + s, 1)?;
                for raw in sector.chunks_exact(size_of::<DirEntry>()) {
                    let entry = LayoutVerified::<_, DirEntry>::new_unaligned(raw)
                        .ok_or(Error::Corrupt)?
                        .into_ref();
                    match entry.name[0] {
                        ENTRY_END => return Err(Error::NotFound),
                        ENTRY_DELETED => continue,
                        _ => (),
                    }
                    if entry.attr & ATTR_LONG_NAME == ATTR_LONG_NAME
                        || entry.attr & ATTR_VOLUME_ID != 0
                    {
                        continue;
                    }
                    if entry.name.eq_ignore_ascii_case(name) {
                        return Ok(*entry);
                    }
                }
            }
            match self.next_cluster(dev, cluster)? {
                Some(next) => cluster = next,
                None => return Err(Error::NotFound),
            }
        }
        Err(Error::Corrupt)
    }

    /// Walks `file`'s chain to the cluster containing its position.
    fn seek_cluster<D: BlockDevice + ?Sized>(
        &self,
        dev: &mut D,
        file: &mut File,
    ) -> Result<u32, Error> {
        let index = file.pos / (self.sectors_per_cluster * SECTOR as u32);
        if index < file.cluster_index {
            file.cluster = file.first_cluster;
            file.cluster_index = 0;
        }
        while file.cluster_index < index {
            file.cluster = self
                .next_cluster(dev, file.cluster)?
                .ok_or(Error::Corrupt)?;
            file.cluster_index += 1;
        }
        Ok(file.cluster)
    }

    fn next_cluster<D: BlockDevice + ?Sized>(
        &self,
        dev: &mut D,
        cluster: u32,
    ) -> Result<Option<u32>, Error> {
        if !self.in_range(cluster) {
            return Err(Error::Corrupt);
        }
        let offset = cluster as usize * 4;
        let mut sector = [0u8; SECTOR];
        dev.read_blocks(
            self.drive,
            &mut sector,
            self.fat_start + (offset / SECTOR) as u32,
            1,
        )?;
        let at = offset % SECTOR;
        let entry = u32::from_le_bytes([sector[at], sector[at + 1], sector[at + 2], sector[at + 3]])
            & CLUSTER_MASK;
        match entry {
            e if e >= END_OF_CHAIN => Ok(None),
            e if self.in_range(e) => Ok(Some(e)),
            _ => Err(Error::Corrupt),
        }
    }

    /// Whether `cluster` names one of the volume's data clusters.
    fn in_range(&self, cluster: u32) -> bool {
        (2..self.clusters + 2).contains(&cluster)
    }

    fn cluster_lba(&self, cluster: u32) -> Result<u32, Error> {
        if !self.in_range(cluster) {
            return Err(Error::Corrupt);
        }
        Ok(self.data_start + (cluster - 2) * self.sectors_per_cluster)
    }
}

fn signed(sector: &[u8; SECTOR]) -> bool {
    sector[510..] == [0x55, 0xAA]
}

/// Does this look like a FAT boot sector rather than an MBR?
fn is_boot_sector(sector: &[u8; SECTOR]) -> bool {
    matches!(sector[0], 0xEB | 0xE9) && sector[11..13] == (SECTOR as u16).to_le_bytes()
}

/// Converts one path component into a space-padded, upper-cased 8.3 name.
fn short_name(component: &str) -> Option<[u8; 11]> {
    const ILLEGAL: &[u8] = b"\"*+,./:;<=>?[\\]|";

    let (base, ext) = component.rsplit_once('.').unwrap_or((component, ""));
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }

    let mut name = [b' '; 11];
    let (name_base, name_ext) = name.split_at_mut(8);
    for (dst, part) in [(name_base, base), (name_ext, ext)] {
        for (d, c) in dst.iter_mut().zip(part.bytes()) {
            if !c.is_ascii_graphic() || ILLEGAL.contains(&c) {
                return None;
            }
            *d = c.to_ascii_uppercase();
        }
    }
    Some(name)
}

/// Builds small FAT32 images for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub const DATA_CLUSTERS: u32 = 120;
    const RESERVED: u32 = 2;
    const FAT_SIZE: u32 = 1;
    pub const ROOT: u32 = 2;

    pub struct Builder {
        start: u32,
        image: Vec<u8>,
        next_free: u32,
    }

    impl Builder {
        /// An empty volume, either covering the whole drive or in the first
        /// partition of an MBR.
        pub fn new(partitioned: bool) -> Self {
            let start = if partitioned { 8 } else { 0 };
            let total = RESERVED + 2 * FAT_SIZE + DATA_CLUSTERS;
            let mut builder = Self {
                start,
                image: vec![0; ((start + total) * SECTOR as u32) as usize],
                next_free: ROOT + 1,
            };

            if partitioned {
                let entry = &mut builder.image[PARTITION_TABLE..PARTITION_TABLE + 16];
                entry[0] = 0x80;
                entry[4] = 0x0C;
                entry[8..12].copy_from_slice(&start.to_le_bytes());
                entry[12..16].copy_from_slice(&total.to_le_bytes());
                builder.image[510..512].copy_from_slice(&[0x55, 0xAA]);
            }

            let bpb = BootSector {
                jump: [0xEB, 0x58, 0x90],
                oem: *b"MSWIN4.1",
                bytes_per_sector: U16::new(512),
                sectors_per_cluster: 1,
                reserved_sectors: U16::new(RESERVED as u16),
                fat_count: 2,
                root_entries: U16::new(0),
                total_sectors_16: U16::new(0),
                media: 0xF8,
                fat_size_16: U16::new(0),
                sectors_per_track: U16::new(63),
                heads: U16::new(255),
                hidden_sectors: U32::new(start),
                total_sectors_32: U32::new(total),
                fat_size_32: U32::new(FAT_SIZE),
                ext_flags: U16::new(0),
                version: U16::new(0),
                root_cluster: U32::new(ROOT),
                fs_info: U16::new(1),
                backup_boot: U16::new(6),
                reserved: [0; 12],
                drive_number: 0x80,
                reserved1: 0,
                boot_signature: 0x29,
                volume_id: U32::new(0x1234_5678),
                label: *b"BONEBOOT   ",
                fs_type: *b"FAT32   ",
            };
            let boot = builder.sector(start);
            boot[..size_of::<BootSector>()].copy_from_slice(bpb.as_bytes());
            boot[510..].copy_from_slice(&[0x55, 0xAA]);

            builder.set_fat(0, 0x0FFF_FFF8);
            builder.set_fat(1, 0x0FFF_FFFF);
            builder.set_fat(ROOT, 0x0FFF_FFFF);
            builder
        }

        pub fn finish(self) -> Vec<u8> {
            self.image
        }

        pub fn boot_sector(&mut self) -> &mut [u8] {
            let start = self.start;
            self.sector(start)
        }

        pub fn set_fat(&mut self, cluster: u32, value: u32) {
            for fat in 0..2 {
                let lba = self.start + RESERVED + fat * FAT_SIZE;
                let at = cluster as usize * 4;
                self.sector(lba)[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        /// Adds a raw 32-byte entry to the (single cluster) directory `dir`.
        pub fn raw_entry(&mut self, dir: u32, raw: &[u8; 32]) {
            let lba = self.cluster_lba(dir);
            let sector = self.sector(lba);
            let slot = sector
                .chunks_exact_mut(32)
                .find(|e| e[0] == ENTRY_END)
                .expect("directory full");
            slot.copy_from_slice(raw);
        }

        fn entry(&mut self, dir: u32, name: &[u8; 11], attr: u8, cluster: u32, size: u32) {
            let mut entry = DirEntry::new_zeroed();
            entry.name = *name;
            entry.attr = attr;
            entry.cluster_hi = U16::new((cluster >> 16) as u16);
            entry.cluster_lo = U16::new(cluster as u16);
            entry.size = U32::new(size);
            let mut raw = [0; 32];
            raw.copy_from_slice(entry.as_bytes());
            self.raw_entry(dir, &raw);
        }

        pub fn dir(&mut self, parent: u32, name: &[u8; 11]) -> u32 {
            let cluster = self.next_free;
            self.next_free += 1;
            self.set_fat(cluster, 0x0FFF_FFFF);
            self.entry(parent, name, ATTR_DIRECTORY, cluster, 0);
            cluster
        }

        /// Adds a file stored in consecutive clusters.
        pub fn file(&mut self, dir: u32, name: &[u8; 11], data: &[u8]) {
            let count = (data.len() + SECTOR - 1) / SECTOR;
            let chain: Vec<u32> = (self.next_free..).take(count).collect();
            self.next_free += count as u32;
            self.file_in(dir, name, data, &chain);
        }

        /// Adds a file stored in the given clusters, in order.
        pub fn file_in(&mut self, dir: u32, name: &[u8; 11], data: &[u8], chain: &[u32]) {
            for (i, &cluster) in chain.iter().enumerate() {
                let next = chain.get(i + 1).copied().unwrap_or(0x0FFF_FFFF);
                self.set_fat(cluster, next);
                let lba = self.cluster_lba(cluster);
                let chunk = &data[i * SECTOR..data.len().min((i + 1) * SECTOR)];
                self.sector(lba)[..chunk.len()].copy_from_slice(chunk);
            }
            let first = chain.first().copied().unwrap_or(0);
            self.entry(dir, name, 0x20, first, data.len() as u32);
        }

        fn cluster_lba(&self, cluster: u32) -> u32 {
            self.start + RESERVED + 2 * FAT_SIZE + cluster - 2
        }

        fn sector(&mut self, lba: u32) -> &mut [u8] {
            let at = lba as usize * SECTOR;
            &mut self.image[at..at + SECTOR]
        }
    }
}
