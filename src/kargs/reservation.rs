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

//! Karg reservations for images without marker-based embed areas.
//!
//! kargs.json records, for each boot file, an area at a fixed offset that
//! holds the default kargs followed by a terminator and padding.  Since
//! there is no marker to overlay, the image is extracted and the area is
//! rewritten in the extracted copy.  The original image is never touched.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::{KargsContent, KargsFileEntry, KargsManifest, OutputFile, KARGS_CONFIG_PATH};
use crate::errors::{FormatError, NotFound};
use crate::image::{FileSpec, IsoImage, PatchRegion};
use crate::io::LimitWriter;

const DEFAULT_END: &[u8] = b"\n";
const DEFAULT_PAD: &[u8] = b"#";
// sanity limit on the declared area size
const MAX_AREA_SIZE: usize = 2048;

/// A boot file inside an extracted copy of the image, modified in place.
///
/// The extraction directory is shared by every file produced by one
/// injection and is removed when the last of them is dropped or closed.
pub struct ScratchFile {
    // dropped before dir
    file: File,
    path: PathBuf,
    dir: Arc<TempDir>,
}

impl ScratchFile {
    /// Location of the modified file in the extraction directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .with_context(|| format!("getting metadata of {}", self.path.display()))?
            .len())
    }

    /// Closes the file, and removes the extraction directory if no other
    /// file still uses it.
    pub fn close(self) -> Result<()> {
        drop(self.file);
        match Arc::try_unwrap(self.dir) {
            Ok(dir) => {
                let path = dir.path().to_path_buf();
                dir.close()
                    .with_context(|| format!("removing {}", path.display()))
            }
            Err(_) => Ok(()),
        }
    }
}

impl Read for ScratchFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for ScratchFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Rewrites karg reservations for one injection.  The image is extracted
/// at most once, on the first file.
pub(super) struct Reservations<'a> {
    manifest: KargsManifest,
    scratch_parent: Option<&'a Path>,
    scratch: Option<Arc<TempDir>>,
}

impl<'a> Reservations<'a> {
    pub fn for_image(
        image: &mut (impl IsoImage + ?Sized),
        scratch_parent: Option<&'a Path>,
    ) -> Result<Self> {
        let manifest = KargsManifest::for_image(image)?.ok_or_else(|| {
            NotFound(format!(
                "{} not found; image has no karg reservations",
                KARGS_CONFIG_PATH
            ))
        })?;
        if manifest.size > MAX_AREA_SIZE {
            bail!(FormatError(format!(
                "karg area size larger than {} (found {})",
                MAX_AREA_SIZE, manifest.size
            )));
        }
        if manifest.default.len() > manifest.size && manifest.size > 0 {
            bail!(FormatError(format!(
                "default kargs size {} larger than karg area ({})",
                manifest.default.len(),
                manifest.size
            )));
        }
        Ok(Self {
            manifest,
            scratch_parent,
            scratch: None,
        })
    }

    /// Appends `append` to the kargs in the reservation of `path`.
    pub fn inject(
        &mut self,
        image: &mut (impl IsoImage + ?Sized),
        path: &str,
        append: &str,
    ) -> Result<OutputFile> {
        let entry = self.manifest.entry(path)?.clone();
        let spec = image.locate(path)?;
        let (start, length) = self.area(&entry, &spec)?;
        let region = PatchRegion {
            offset: spec.offset + start,
            length,
        };
        log::debug!(
            "{}: file at {}+{}, karg area at {}+{}",
            path,
            spec.offset,
            spec.length,
            region.offset,
            region.length
        );

        let dir = self.scratch(image)?;
        let extracted = dir.path().join(image.extracted_path(path)?);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&extracted)
            .with_context(|| format!("opening {}", extracted.display()))?;
        rewrite_area(&mut file, start, length, &entry, append)
            .with_context(|| format!("rewriting karg area of {}", extracted.display()))?;
        let content = ScratchFile {
            file,
            path: extracted,
            dir,
        };
        Ok(OutputFile {
            filename: path.to_string(),
            length: content.len()?,
            region,
            content: KargsContent::Rewritten(content),
        })
    }

    /// Returns the area's start relative to the file, skipping the
    /// default kargs, and the length remaining in the area.
    fn area(&self, entry: &KargsFileEntry, spec: &FileSpec) -> Result<(u64, u64)> {
        let start = entry.offset + self.manifest.default.len() as u64;
        let end = match self.manifest.size {
            0 => spec.length,
            size => entry.offset + size as u64,
        };
        if end > spec.length || start > end {
            bail!(FormatError(format!(
                "karg area {}..{} of {} lies outside file of length {}",
                start, end, spec.path, spec.length
            )));
        }
        Ok((start, end - start))
    }

    fn scratch(&mut self, image: &mut (impl IsoImage + ?Sized)) -> Result<Arc<TempDir>> {
        if let Some(dir) = &self.scratch {
            return Ok(dir.clone());
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix(".iso-kargs-");
        let dir = match self.scratch_parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .context("creating scratch directory")?;
        log::debug!("extracting image to {}", dir.path().display());
        // on failure the TempDir is dropped and removes the partial tree
        image
            .extract_all(dir.path())
            .context("extracting image")?;
        let dir = Arc::new(dir);
        self.scratch = Some(dir.clone());
        Ok(dir)
    }
}

/// Appends `append` after the existing kargs in the `length` bytes at
/// `start`, then restores the terminator and padding so that the file
/// keeps its size.  Leaves the file positioned at its start.
fn rewrite_area(
    file: &mut File,
    start: u64,
    length: u64,
    entry: &KargsFileEntry,
    append: &str,
) -> Result<()> {
    let end = match entry.end.as_bytes() {
        b"" => DEFAULT_END,
        end => end,
    };
    let pad = match entry.pad.as_bytes() {
        b"" => DEFAULT_PAD,
        pad => pad,
    };

    let mut existing = vec![0u8; length as usize];
    file.seek(SeekFrom::Start(start))
        .with_context(|| format!("seeking to offset {}", start))?;
    file.read_exact(&mut existing)
        .with_context(|| format!("reading {} bytes at {}", length, start))?;
    let kept = match existing.windows(end.len()).position(|w| w == end) {
        Some(pos) => &existing[..pos],
        None => {
            let mut kept = &existing[..];
            while kept.ends_with(pad) {
                kept = &kept[..kept.len() - pad.len()];
            }
            kept
        }
    };

    let mut contents = Vec::with_capacity(length as usize);
    contents.extend_from_slice(kept);
    contents.extend_from_slice(append.trim_end_matches(['\r', '\n']).as_bytes());
    contents.extend_from_slice(end);
    if contents.len() as u64 > length {
        bail!(FormatError(format!(
            "kargs too large for area: {} vs {}",
            contents.len(),
            length
        )));
    }
    contents.extend(pad.iter().cycle().take(length as usize - contents.len()));

    file.seek(SeekFrom::Start(start))
        .with_context(|| format!("seeking to offset {}", start))?;
    let mut w = LimitWriter::new(&mut *file, length, "karg area");
    w.write_all(&contents)
        .with_context(|| format!("writing {} bytes at {}", length, start))?;
    w.flush().context("flushing karg area")?;
    file.sync_all().context("syncing karg area")?;
    file.seek(SeekFrom::Start(0)).context("seeking to start")?;
    Ok(())
}
