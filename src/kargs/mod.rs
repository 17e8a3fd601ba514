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

//! Kernel argument injection.
//!
//! For each boot config that carries kargs, produce a stream with the
//! new kargs in place.  The caller writes these over the corresponding
//! files while copying the image; the base image is never modified.
//!
//! Most images reserve a commented-out area after the kernel command line,
//! marked with `COREOS_KARG_EMBED_AREA`, and the stream is a lazy overlay
//! of that area onto the base image.  s390x boot files have no such marker,
//! so their reservations, described in `/coreos/kargs.json`, are rewritten
//! in an extracted copy of the image instead.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::image::{ImageDescriptor, InjectionStrategy, IsoImage, LiveIso, PatchRegion};
use crate::io::{IsolatedFile, OverlayReader, ReadSeek};

mod codec;
mod embed;
mod manifest;
mod reservation;

pub use self::codec::*;
pub use self::embed::{find_embed_area, kargs_embed_area};
pub use self::manifest::*;
pub use self::reservation::ScratchFile;

use self::embed::overlay_kargs;
use self::reservation::Reservations;

/// Replacement contents for one boot config file in the image.
pub struct OutputFile {
    /// Path of the file inside the image
    pub filename: String,
    /// Length of `content`, which always equals the original file length
    pub length: u64,
    /// Absolute image range holding the new kargs
    pub region: PatchRegion,
    pub content: KargsContent,
}

impl OutputFile {
    /// Releases the stream and any scratch files behind it.
    pub fn close(self) -> Result<()> {
        self.content
            .close()
            .with_context(|| format!("closing kargs stream for {}", self.filename))
    }
}

impl fmt::Debug for OutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = match &self.content {
            KargsContent::Overlay(_) => "overlay",
            KargsContent::Rewritten(_) => "rewritten",
        };
        f.debug_struct("OutputFile")
            .field("filename", &self.filename)
            .field("length", &self.length)
            .field("region", &self.region)
            .field("content", &content)
            .finish()
    }
}

pub enum KargsContent {
    /// Virtual view over the unmodified base image.
    Overlay(IsolatedFile<OverlayReader<Box<dyn ReadSeek>>>),
    /// Modified copy of the file, extracted from the image.
    Rewritten(ScratchFile),
}

impl KargsContent {
    pub fn close(self) -> Result<()> {
        match self {
            Self::Overlay(f) => {
                drop(f);
                Ok(())
            }
            Self::Rewritten(f) => f.close(),
        }
    }
}

impl Read for KargsContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Overlay(f) => f.read(buf),
            Self::Rewritten(f) => f.read(buf),
        }
    }
}

impl Seek for KargsContent {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Overlay(f) => f.seek(pos),
            Self::Rewritten(f) => f.seek(pos),
        }
    }
}

/// Returns None if there is nothing to append.  Overlaid kargs must end
/// the kernel command line, so they get a trailing newline; reservations
/// supply their own terminator.
fn normalize_append(append: &str, strategy: InjectionStrategy) -> Option<String> {
    if append.is_empty() || append == "\n" {
        return None;
    }
    let mut append = append.to_string();
    if strategy == InjectionStrategy::Marker && !append.ends_with('\n') {
        append.push('\n');
    }
    Some(append)
}

/// Appends `append` to the kargs of each of `targets`, returning one
/// output per target in the same order.  Returns an empty list if
/// `append` is empty.  On failure, nothing stays open.
pub fn inject(
    image: &mut (impl IsoImage + ?Sized),
    strategy: InjectionStrategy,
    targets: &[String],
    append: &str,
) -> Result<Vec<OutputFile>> {
    inject_in(image, strategy, targets, append, None)
}

/// Like `inject`, but extracts the image below `scratch_dir`, if the
/// strategy needs to extract it at all.
pub fn inject_in(
    image: &mut (impl IsoImage + ?Sized),
    strategy: InjectionStrategy,
    targets: &[String],
    append: &str,
    scratch_dir: Option<&Path>,
) -> Result<Vec<OutputFile>> {
    let append = match normalize_append(append, strategy) {
        Some(append) => append,
        None => {
            log::debug!("no kargs to append");
            return Ok(Vec::new());
        }
    };
    let mut outputs = Vec::with_capacity(targets.len());
    if let Err(e) = build_outputs(image, strategy, targets, &append, scratch_dir, &mut outputs) {
        release(outputs);
        return Err(e);
    }
    Ok(outputs)
}

fn build_outputs(
    image: &mut (impl IsoImage + ?Sized),
    strategy: InjectionStrategy,
    targets: &[String],
    append: &str,
    scratch_dir: Option<&Path>,
    outputs: &mut Vec<OutputFile>,
) -> Result<()> {
    let mut reservations = match strategy {
        InjectionStrategy::Marker => None,
        InjectionStrategy::ReservationTable => Some(Reservations::for_image(image, scratch_dir)?),
    };
    let patch = Bytes::copy_from_slice(append.as_bytes());
    for path in targets {
        let output = match reservations.as_mut() {
            Some(reservations) => reservations.inject(image, path, append),
            None => overlay_kargs(image, path, &patch),
        }
        .with_context(|| format!("injecting kargs into {}", path))?;
        outputs.push(output);
    }
    Ok(())
}

/// Closes outputs, most recent first.
fn release(mut outputs: Vec<OutputFile>) {
    if !outputs.is_empty() {
        log::debug!("releasing {} kargs streams", outputs.len());
    }
    while let Some(output) = outputs.pop() {
        if let Err(e) = output.close() {
            log::warn!("{:#}", e);
        }
    }
}

/// Appends `append` to every boot config of the image that carries kargs.
pub fn new_kargs_reader(
    image: &mut (impl IsoImage + ?Sized),
    strategy: InjectionStrategy,
    append: &str,
) -> Result<Vec<OutputFile>> {
    let targets = kargs_files(image)?;
    inject(image, strategy, &targets, append)
}

/// Opens the image described by `desc` and appends `append` to every
/// boot config that carries kargs.
pub fn kargs_reader_for(desc: &ImageDescriptor, append: &str) -> Result<Vec<OutputFile>> {
    let mut iso = LiveIso::open(&desc.path)?;
    let targets = kargs_files(&mut iso)?;
    log::debug!(
        "{}: injecting kargs into {} for {}",
        desc.path.display(),
        targets.join(", "),
        desc.arch
    );
    inject_in(
        &mut iso,
        desc.injection_strategy(),
        &targets,
        append,
        desc.scratch_dir.as_deref(),
    )
}
