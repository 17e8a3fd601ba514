// Copyright 2023 Red Hat, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Access to the base ISO image.
//!
//! The kargs code never walks the ISO itself; it goes through the
//! `FileLocator` and `IsoImage` traits so tests can substitute fakes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::io::*;
use crate::iso9660::{IsoFs, Record};

/// Where a named file lives inside the base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

impl FileSpec {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Byte range, in absolute image coordinates, that a kargs stream
/// substitutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRegion {
    pub offset: u64,
    pub length: u64,
}

/// Resolves paths inside an image.
pub trait FileLocator {
    /// Absolute offset and length of the file at `path`.  Fails with
    /// `NotFound` in the chain if there's no such file.
    fn locate(&mut self, path: &str) -> Result<FileSpec>;

    /// Full contents of the file at `path`.
    fn read_whole(&mut self, path: &str) -> Result<Vec<u8>>;
}

pub trait IsoImage: FileLocator {
    /// Opens a new handle onto the raw image bytes.  The caller owns it.
    fn open_base(&mut self) -> Result<Box<dyn ReadSeek>>;

    /// Unpacks every directory and file in the image below `dest`.
    /// Paths under `dest` are the lowercased on-disc names.
    fn extract_all(&mut self, dest: &Path) -> Result<()>;

    /// Where `extract_all` puts the file at `path`, relative to `dest`.
    /// Differs from `path` when the on-disc name is truncated.
    fn extracted_path(&mut self, path: &str) -> Result<PathBuf>;
}

/// A live ISO on disk.
pub struct LiveIso {
    path: PathBuf,
    iso: IsoFs<File>,
}

impl LiveIso {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_image(&path)?;
        let iso = IsoFs::from_reader(file)
            .with_context(|| format!("parsing ISO9660 image {}", path.display()))?;
        log::debug!("opened {} (volume '{}')", path.display(), iso.volume_id());
        Ok(Self { path, iso })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get_file(&mut self, path: &str) -> Result<(String, Record)> {
        self.iso
            .resolve_file(path)
            .with_context(|| format!("looking up '{}' in {}", path, self.path.display()))
    }
}

impl FileLocator for LiveIso {
    fn locate(&mut self, path: &str) -> Result<FileSpec> {
        let (_, file) = self.get_file(path)?;
        Ok(FileSpec {
            path: path.to_string(),
            offset: file.offset(),
            length: file.length as u64,
        })
    }

    fn read_whole(&mut self, path: &str) -> Result<Vec<u8>> {
        let (_, file) = self.get_file(path)?;
        let mut data = Vec::with_capacity(file.length as usize);
        self.iso
            .read_file(&file)?
            .read_to_end(&mut data)
            .with_context(|| format!("reading '{}'", path))?;
        Ok(data)
    }
}

impl IsoImage for LiveIso {
    fn open_base(&mut self) -> Result<Box<dyn ReadSeek>> {
        Ok(Box::new(open_image(&self.path)?))
    }

    fn extract_all(&mut self, dest: &Path) -> Result<()> {
        let records = self.iso.walk().context("walking ISO")?;
        let mut buf = vec![0u8; BUFFER_SIZE];
        for (path, record) in records {
            let target = dest.join(path.to_lowercase());
            if record.is_dir {
                create_dir_all(&target)
                    .with_context(|| format!("creating {}", target.display()))?;
                continue;
            }
            let mut outf = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .with_context(|| format!("opening {}", target.display()))?;
            let mut bufw = BufWriter::with_capacity(BUFFER_SIZE, &mut outf);
            copy_exactly_n(
                &mut self.iso.read_file(&record)?,
                &mut bufw,
                record.length as u64,
                &mut buf,
            )
            .with_context(|| format!("extracting {}", path))?;
            bufw.flush().context("flushing buffer")?;
        }
        log::debug!(
            "extracted {} to {}",
            self.path.display(),
            dest.display()
        );
        Ok(())
    }

    fn extracted_path(&mut self, path: &str) -> Result<PathBuf> {
        let (disc_path, _) = self.get_file(path)?;
        Ok(PathBuf::from(disc_path.to_lowercase()))
    }
}

fn open_image(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))
}

/// CPU architecture of a live image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86_64,
    Aarch64,
    Ppc64le,
    S390x,
}

impl Architecture {
    pub fn injection_strategy(&self) -> InjectionStrategy {
        match self {
            Self::S390x => InjectionStrategy::ReservationTable,
            _ => InjectionStrategy::Marker,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
        }
    }
}

impl FromStr for Architecture {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "x86_64" | "amd64" => Self::X86_64,
            "aarch64" | "arm64" => Self::Aarch64,
            "ppc64le" => Self::Ppc64le,
            "s390x" => Self::S390x,
            _ => bail!("unknown architecture: {}", s),
        })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How kernel arguments get into a boot config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionStrategy {
    /// Overlay the embed area marked by `COREOS_KARG_EMBED_AREA`.  The
    /// result is a virtual view over the unmodified image.
    Marker,
    /// Rewrite the reservation declared in kargs.json inside an extracted
    /// copy of the image.
    ReservationTable,
}

/// Everything needed to customize one image.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageDescriptor {
    pub path: PathBuf,
    pub arch: Architecture,
    /// Parent for the extracted copy used by the reservation strategy;
    /// the system temporary directory if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl ImageDescriptor {
    pub fn new(path: impl Into<PathBuf>, arch: Architecture) -> Self {
        Self {
            path: path.into(),
            arch,
            scratch_dir: None,
        }
    }

    pub fn injection_strategy(&self) -> InjectionStrategy {
        self.arch.injection_strategy()
    }
}
