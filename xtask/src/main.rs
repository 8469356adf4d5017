// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use anyhow::{bail, Context, Result};
use boneboot::{ImageHeader, HEADER_SIZE};
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use zerocopy::AsBytes;

const TARGET: &str = "armv7a-none-eabi";

/// Where the ROM puts the MLO; must agree with memory.x.
const SRAM_LOAD_ADDRESS: u32 = 0x402F_0400;
/// Largest MLO the ROM will load.
const SRAM_MAX_IMAGE: usize = 0x1_B400;

#[derive(Debug, Parser)]
enum Xtask {
    /// Builds the bootloader and writes it out with the ROM's GP header.
    ///
    /// The bootloader does not initialize DDR. The result only gets past its
    /// RAM test if something has brought DDR up before it runs.
    Dist {
        #[clap(long, default_value = "beaglebone")]
        board: String,
        #[clap(long)]
        out: PathBuf,
    },
    /// Wraps a raw application binary as an /app image
    Image {
        /// Address the bootloader copies the application to, and jumps to
        #[clap(long, value_parser = parse_address)]
        load: u32,
        input: PathBuf,
        output: PathBuf,
    },
    /// Wraps a raw bootloader binary in the ROM's GP header (DDR must
    /// already be up when it runs)
    Mlo { input: PathBuf, output: PathBuf },
}

fn parse_address(s: &str) -> Result<u32> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16)?,
        None => s.parse()?,
    };
    Ok(value)
}

// borrowed from hubris
fn remap_paths() -> Result<BTreeMap<PathBuf, &'static str>> {
    // Panic messages in crates have a long prefix; we'll shorten it using
    // the --remap-path-prefix argument to reduce message size.  We'll remap
    // local crates to /boneboot, crates.io to /crates.io, and git
    // dependencies to /git
    let mut remap_paths = BTreeMap::new();

    if let Ok(home) = std::env::var("CARGO_HOME") {
        let cargo_home = PathBuf::from(home);
        remap_paths.insert(cargo_home.join("git").join("checkouts"), "/git");

        // These hashes are canonical-ish: Cargo tries hard not to change them.
        // The first is the old git index, the second the sparse one.
        for index in ["github.com-1ecc6299db9ec823", "index.crates.io-6f17d22bba15001f"] {
            remap_paths.insert(
                cargo_home.join("registry").join("src").join(index),
                "/crates.io",
            );
        }
    }

    if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let mut root = PathBuf::from(dir);
        root.pop();
        remap_paths.insert(root, "/boneboot");
    }
    Ok(remap_paths)
}

/// Prepends an image header to `body`. `header_counts` says whether the
/// size field includes the header itself.
fn wrap(body: &[u8], load: u32, header_counts: bool) -> Result<Vec<u8>> {
    let size = if header_counts {
        body.len() + HEADER_SIZE
    } else {
        body.len()
    };
    let size = u32::try_from(size).context("image too large")?;
    if load.checked_add(size).is_none() {
        bail!("image at {load:#010x} runs off the end of memory");
    }

    let mut out = ImageHeader::new(size, load).as_bytes().to_vec();
    out.extend_from_slice(body);
    Ok(out)
}

fn app_image(body: &[u8], load: u32) -> Result<Vec<u8>> {
    wrap(body, load, true)
}

fn mlo_image(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > SRAM_MAX_IMAGE {
        bail!(
            "bootloader is {} bytes; the ROM loads at most {SRAM_MAX_IMAGE}",
            body.len()
        );
    }
    wrap(body, SRAM_LOAD_ADDRESS, false)
}

fn convert(input: &Path, output: &Path, f: impl FnOnce(&[u8]) -> Result<Vec<u8>>) -> Result<()> {
    let body = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let image = f(&body)?;
    std::fs::write(output, image).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

fn run(command: &mut Command) -> Result<()> {
    let status = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?
        .wait()?;
    if !status.success() {
        bail!("{:?} failed: {}", command.get_program(), status);
    }
    Ok(())
}

fn dist(board: String, out: PathBuf) -> Result<()> {
    let remap_path_prefix = remap_paths()?.iter().fold(String::new(), |mut output, r| {
        let _ = write!(output, " --remap-path-prefix={}={}", r.0.display(), r.1);
        output
    });

    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
    let mut command = Command::new(cargo);
    command.args(["build", "--release", "--bin", "boneboot", "--target", TARGET]);
    command.arg("--no-default-features");
    command.arg("--features");
    command.arg(format!("target-board-{}", board));
    command.env("RUSTFLAGS", remap_path_prefix.trim_start());
    run(&mut command)?;

    let elf = PathBuf::from("target").join(TARGET).join("release").join("boneboot");
    let raw = elf.with_extension("bin");
    run(Command::new("rust-objcopy")
        .args(["-O", "binary"])
        .arg(&elf)
        .arg(&raw))
    .context("rust-objcopy is part of cargo-binutils")?;

    convert(&raw, &out, mlo_image)
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();

    match xtask {
        Xtask::Dist { board, out } => dist(board, out)?,
        Xtask::Image {
            load,
            input,
            output,
        } => convert(&input, &output, |body| app_image(body, load))?,
        Xtask::Mlo { input, output } => convert(&input, &output, mlo_image)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_size_includes_header() {
        let image = app_image(&[0xAA; 4], 0x8000_0000).unwrap();
        assert_eq!(
            image,
            [12, 0, 0, 0, 0x00, 0x00, 0x00, 0x80, 0xAA, 0xAA, 0xAA, 0xAA]
        );
        let header = ImageHeader::parse(&image).unwrap();
        assert_eq!(header.body_len(), Some(4));
    }

    #[test]
    fn mlo_size_excludes_header() {
        let image = mlo_image(&[0; 16]).unwrap();
        assert_eq!(&image[..8], &[16, 0, 0, 0, 0x00, 0x04, 0x2F, 0x40]);
        assert!(mlo_image(&vec![0; SRAM_MAX_IMAGE + 1]).is_err());
    }

    #[test]
    fn image_must_fit_in_address_space() {
        assert!(app_image(&[0; 0x100], 0xFFFF_FFF0).is_err());
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_address("0x8000_0000").unwrap(), 0x8000_0000);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xzz").is_err());
    }
}
