// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named files, as the boot sequencer sees them.

use crate::disk::BlockDevice;
use crate::fat::{self, Volume};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Read,
    /// Create the file, or truncate it if it exists, for writing.
    CreateAlways,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no filesystem mounted")]
    NotMounted,
    #[error("file not found")]
    NotFound,
    #[error("file is read only")]
    ReadOnly,
    #[error("no room left for file")]
    Full,
    #[error("seek past end of file")]
    OutOfRange,
    #[error(transparent)]
    Fat(fat::Error),
}

impl From<fat::Error> for Error {
    fn from(e: fat::Error) -> Self {
        match e {
            fat::Error::NotFound => Error::NotFound,
            fat::Error::OutOfRange => Error::OutOfRange,
            e => Error::Fat(e),
        }
    }
}

/// A filesystem with open/read/write/seek/close over named files.
pub trait FileStore {
    type File;

    fn mount(&mut self) -> Result<(), Error>;
    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File, Error>;

    /// Reads from the current position, returning the number of bytes read;
    /// zero at end of file.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Error>;

    /// Writes at the current position, returning the number of bytes
    /// written.
    fn write(&mut self, file: &mut Self::File, buf: &[u8]) -> Result<usize, Error>;

    fn seek(&mut self, file: &mut Self::File, pos: u32) -> Result<(), Error>;
    fn close(&mut self, file: Self::File) -> Result<(), Error>;
}

/// Handle for files in a [`StagedStore`].
#[derive(Debug)]
pub enum Handle {
    Card(fat::File),
    Staged { pos: usize, writable: bool },
}

/// The card, read through FAT, plus one file that lives in RAM.
///
/// The card can't be written, so a newly received image is kept in a
/// staging area instead. Once anything has been written to the staged path
/// it shadows the card's copy until reset.
pub struct StagedStore<D> {
    dev: D,
    drive: u8,
    volume: Option<Volume>,
    staged_path: &'static str,
    staging: &'static mut [u8],
    /// Length of the staged file, if it has been created.
    staged_len: Option<usize>,
}

impl<D: BlockDevice> StagedStore<D> {
    pub fn new(dev: D, drive: u8, staged_path: &'static str, staging: &'static mut [u8]) -> Self {
        Self {
            dev,
            drive,
            volume: None,
            staged_path,
            staging,
            staged_len: None,
        }
    }

    fn is_staged(&self, path: &str) -> bool {
        path.trim_start_matches('/')
            .eq_ignore_ascii_case(self.staged_path.trim_start_matches('/'))
    }
}

impl<D: BlockDevice> FileStore for StagedStore<D> {
    type File = Handle;

    fn mount(&mut self) -> Result<(), Error> {
        self.volume = Some(Volume::mount(&mut self.dev, self.drive)?);
        Ok(())
    }

    fn open(&mut self, path: &str, mode: Mode) -> Result<Handle, Error> {
        let volume = self.volume.as_ref().ok_or(Error::NotMounted)?;
        match mode {
            Mode::CreateAlways if self.is_staged(path) => {
                self.staged_len = Some(0);
                Ok(Handle::Staged {
                    pos: 0,
                    writable: true,
                })
            }
            Mode::CreateAlways => Err(Error::ReadOnly),
            Mode::Read if self.is_staged(path) && self.staged_len.is_some() => Ok(Handle::Staged {
                pos: 0,
                writable: false,
            }),
            Mode::Read => Ok(Handle::Card(volume.open(&mut self.dev, path)?)),
        }
    }

    fn read(&mut self, file: &mut Handle, buf: &mut [u8]) -> Result<usize, Error> {
        match file {
            Handle::Card(file) => {
                let volume = self.volume.as_ref().ok_or(Error::NotMounted)?;
                Ok(volume.read(&mut self.dev, file, buf)?)
            }
            Handle::Staged { pos, .. } => {
                let len = self.staged_len.unwrap_or(0);
                let available = self.staging.get(*pos..len).unwrap_or(&[]);
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                *pos += n;
                Ok(n)
            }
        }
    }

    fn write(&mut self, file: &mut Handle, buf: &[u8]) -> Result<usize, Error> {
        let Handle::Staged {
            pos,
            writable: true,
        } = file
        else {
            return Err(Error::ReadOnly);
        };
        let dst = self
            .staging
            .get_mut(*pos..*pos + buf.len())
            .ok_or(Error::Full)?;
        dst.copy_from_slice(buf);
        *pos += buf.len();
        let len = self.staged_len.get_or_insert(0);
        *len = (*len).max(*pos);
        Ok(buf.len())
    }

    fn seek(&mut self, file: &mut Handle, to: u32) -> Result<(), Error> {
        match file {
            Handle::Card(file) => {
                let volume = self.volume.as_ref().ok_or(Error::NotMounted)?;
                Ok(volume.seek(file, to)?)
            }
            Handle::Staged { pos, .. } => {
                if to as usize > self.staged_len.unwrap_or(0) {
                    return Err(Error::OutOfRange);
                }
                *pos = to as usize;
                Ok(())
            }
        }
    }

    fn close(&mut self, _file: Handle) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::fat::testing::{Builder, ROOT};

    fn store(staging: usize) -> StagedStore<MemDisk> {
        let mut b = Builder::new(false);
        b.file(ROOT, b"APP        ", b"image on the card");
        b.file(ROOT, b"README  TXT", b"hello");
        let area = Box::leak(vec![0u8; staging].into_boxed_slice());
        StagedStore::new(MemDisk::new(b.finish()), 0, "/app", area)
    }

    fn read_all(store: &mut StagedStore<MemDisk>, path: &str) -> Vec<u8> {
        let mut file = store.open(path, Mode::Read).unwrap();
        let mut out = vec![0; 64];
        let n = store.read(&mut file, &mut out).unwrap();
        out.truncate(n);
        store.close(file).unwrap();
        out
    }

    #[test]
    fn must_mount_first() {
        let mut store = store(16);
        assert_eq!(store.open("/app", Mode::Read).unwrap_err(), Error::NotMounted);
    }

    #[test]
    fn reads_come_from_the_card() {
        let mut store = store(16);
        store.mount().unwrap();
        assert_eq!(read_all(&mut store, "/app"), b"image on the card");
        assert_eq!(read_all(&mut store, "/readme.txt"), b"hello");
        assert_eq!(store.open("/nope", Mode::Read).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn staged_file_shadows_the_card() {
        let mut store = store(64);
        store.mount().unwrap();

        let mut file = store.open("/APP", Mode::CreateAlways).unwrap();
        assert_eq!(store.write(&mut file, b"new "), Ok(4));
        assert_eq!(store.write(&mut file, b"image"), Ok(5));
        store.close(file).unwrap();

        assert_eq!(read_all(&mut store, "/app"), b"new image");
        assert_eq!(read_all(&mut store, "/readme.txt"), b"hello");
    }

    #[test]
    fn create_truncates() {
        let mut store = store(64);
        store.mount().unwrap();

        let mut file = store.open("/app", Mode::CreateAlways).unwrap();
        store.write(&mut file, b"partial").unwrap();
        store.close(file).unwrap();
        let file = store.open("/app", Mode::CreateAlways).unwrap();
        store.close(file).unwrap();

        assert_eq!(read_all(&mut store, "/app"), b"");
    }

    #[test]
    fn only_the_staged_path_is_writable() {
        let mut store = store(64);
        store.mount().unwrap();
        assert_eq!(
            store.open("/readme.txt", Mode::CreateAlways).unwrap_err(),
            Error::ReadOnly
        );
        let mut file = store.open("/app", Mode::Read).unwrap();
        assert_eq!(store.write(&mut file, b"x"), Err(Error::ReadOnly));
    }

    #[test]
    fn staging_area_fills_up() {
        let mut store = store(8);
        store.mount().unwrap();
        let mut file = store.open("/app", Mode::CreateAlways).unwrap();
        assert_eq!(store.write(&mut file, b"12345"), Ok(5));
        assert_eq!(store.write(&mut file, b"6789"), Err(Error::Full));
    }

    #[test]
    fn seek_within_staged_file() {
        let mut store = store(64);
        store.mount().unwrap();
        let mut file = store.open("/app", Mode::CreateAlways).unwrap();
        store.write(&mut file, b"abcdef").unwrap();
        store.seek(&mut file, 2).unwrap();
        store.write(&mut file, b"XY").unwrap();
        assert_eq!(store.seek(&mut file, 7), Err(Error::OutOfRange));
        store.close(file).unwrap();

        let mut file = store.open("/app", Mode::Read).unwrap();
        store.seek(&mut file, 1).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(store.read(&mut file, &mut buf), Ok(4));
        assert_eq!(&buf, b"bXYe");
    }
}
