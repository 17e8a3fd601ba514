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

//! Marker-based embed areas in grub and isolinux configs.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::bytes::Regex;

use super::{KargsContent, OutputFile};
use crate::errors::FormatError;
use crate::image::{FileLocator, IsoImage, PatchRegion};
use crate::io::*;

lazy_static! {
    // The capture group is the writable area: the newline ending the
    // kernel command line plus the run of comment characters padding the
    // marker line.
    static ref KARG_EMBED_AREA_RE: Regex =
        Regex::new(r"(\n#*)# COREOS_KARG_EMBED_AREA").unwrap();
}

/// Finds the karg embed area in the raw contents of a boot config that
/// starts at absolute offset `file_offset`.
pub fn find_embed_area(file_offset: u64, content: &[u8]) -> Result<PatchRegion> {
    let mut matches = KARG_EMBED_AREA_RE.captures_iter(content);
    let area = matches
        .next()
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| FormatError("failed to find COREOS_KARG_EMBED_AREA".into()))?;
    if matches.next().is_some() {
        return Err(FormatError("found multiple COREOS_KARG_EMBED_AREA markers".into()).into());
    }
    Ok(PatchRegion {
        offset: file_offset + area.start() as u64,
        length: (area.end() - area.start()) as u64,
    })
}

/// Locates the karg embed area of the boot config at `path`.
pub fn kargs_embed_area(locator: &mut (impl FileLocator + ?Sized), path: &str) -> Result<PatchRegion> {
    let spec = locator.locate(path)?;
    let content = locator.read_whole(path)?;
    find_embed_area(spec.offset, &content)
        .with_context(|| format!("searching {} for karg embed area", path))
}

/// Builds a view of the boot config at `path` with `append` written over
/// the start of its embed area.  The base image is not modified.
pub(super) fn overlay_kargs(
    image: &mut (impl IsoImage + ?Sized),
    path: &str,
    append: &Bytes,
) -> Result<OutputFile> {
    let spec = image.locate(path)?;
    let content = image.read_whole(path)?;
    let region = find_embed_area(spec.offset, &content)
        .with_context(|| format!("searching {} for karg embed area", path))?;
    log::debug!(
        "{}: file at {}+{}, embed area at {}+{}",
        path,
        spec.offset,
        spec.length,
        region.offset,
        region.length
    );
    let length = append.len() as u64;
    if region.offset + length > spec.end() {
        bail!(FormatError(format!(
            "{}: kargs ({} bytes) at offset {} run past end of file ({} bytes)",
            path,
            length,
            region.offset - spec.offset,
            spec.length
        )));
    }
    if length > region.length {
        log::warn!(
            "{}: kargs ({} bytes) overrun embed area ({} bytes)",
            path,
            length,
            region.length
        );
    }

    let base = image.open_base()?;
    let overlay = OverlayReader::with_length(base, region.offset, append.clone(), length)?;
    // the embed area is already reserved inside the file, so no expansion
    let (isolated, _) = IsolatedFile::isolate(overlay, spec.offset, spec.length, 0)
        .with_context(|| format!("isolating {}", path))?;
    Ok(OutputFile {
        filename: path.to_string(),
        length: isolated.len(),
        region: PatchRegion {
            offset: region.offset,
            length,
        },
        content: KargsContent::Overlay(isolated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use maplit::btreemap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::image::LiveIso;
    use crate::testutil::{build_iso, grub_cfg};

    #[test]
    fn test_find_embed_area() {
        let content = grub_cfg(40);
        let region = find_embed_area(4096, &content).unwrap();
        let start = content
            .windows(10)
            .position(|w| w == b"firstboot\n")
            .unwrap()
            + 9;
        assert_eq!(region.offset, 4096 + start as u64);
        // newline plus the padding; the last '#' belongs to the marker
        assert_eq!(region.length, 41);
        let area = &content[start..start + region.length as usize];
        assert_eq!(area[0], b'\n');
        assert!(area[1..].iter().all(|b| *b == b'#'));
        assert_eq!(
            &content[start + 41..start + 41 + 24],
            b"# COREOS_KARG_EMBED_AREA"
        );
    }

    #[test]
    fn test_find_embed_area_minimal() {
        let content = b"linux /vmlinuz\n## COREOS_KARG_EMBED_AREA\n";
        let region = find_embed_area(0, content).unwrap();
        assert_eq!(region.offset, 14);
        assert_eq!(region.length, 2);
        assert_eq!(&content[14..16], b"\n#");

        // bare marker with no padding
        let region = find_embed_area(100, b"x\n# COREOS_KARG_EMBED_AREA").unwrap();
        assert_eq!(region.offset, 101);
        assert_eq!(region.length, 1);
    }

    #[test]
    fn test_find_embed_area_missing() {
        // no marker
        let err = find_embed_area(0, b"linux /vmlinuz\n").unwrap_err();
        assert!(err.is::<FormatError>());
        assert_eq!(err.to_string(), "failed to find COREOS_KARG_EMBED_AREA");
        // marker not at start of line
        assert!(find_embed_area(0, b"linux /vmlinuz # COREOS_KARG_EMBED_AREA\n")
            .unwrap_err()
            .is::<FormatError>());
        // marker twice
        let err = find_embed_area(
            0,
            b"a\n# COREOS_KARG_EMBED_AREA\nb\n# COREOS_KARG_EMBED_AREA\n",
        )
        .unwrap_err();
        assert!(err.is::<FormatError>());
    }

    #[test]
    fn test_overlay_past_end_of_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&build_iso(&btreemap! {
            "ISOLINUX/ISOLINUX.CFG" => b"linux /vmlinuz\n# COREOS_KARG_EMBED_AREA".to_vec(),
        }))
        .unwrap();
        let mut iso = LiveIso::open(file.path()).unwrap();
        let path = "/isolinux/isolinux.cfg";

        // overruns the area but stays inside the file
        let output = overlay_kargs(&mut iso, path, &Bytes::from_static(b" a\n")).unwrap();
        assert_eq!(output.length, 39);
        assert_eq!(output.region.length, 3);

        // would need bytes the file doesn't have
        let append = Bytes::from(format!(" {}\n", "x".repeat(30)));
        let err = overlay_kargs(&mut iso, path, &append).unwrap_err();
        assert!(err.is::<FormatError>());
        assert_eq!(
            err.to_string(),
            "/isolinux/isolinux.cfg: kargs (32 bytes) at offset 14 run past end of file (39 bytes)"
        );
    }
}
