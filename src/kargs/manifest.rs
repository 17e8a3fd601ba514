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

//! The kargs.json manifest shipped in newer live ISOs, and the list of
//! boot config files to patch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::{FormatError, NotFound};
use crate::image::FileLocator;

pub const DEFAULT_GRUB_CONFIG_PATH: &str = "/EFI/redhat/grub.cfg";
pub const DEFAULT_ISOLINUX_CONFIG_PATH: &str = "/isolinux/isolinux.cfg";
pub const KARGS_CONFIG_PATH: &str = "/coreos/kargs.json";

/// Contents of kargs.json.  Only `files[].path` is used by the marker
/// strategy; the reservation strategy also needs the offsets and sizes.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct KargsManifest {
    /// Kernel arguments the image was built with
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub files: Vec<KargsFileEntry>,
    /// Size of each karg area
    #[serde(default)]
    pub size: usize,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct KargsFileEntry {
    pub path: Option<String>,
    /// Offset of the karg area from the start of the file
    #[serde(default)]
    pub offset: u64,
    /// Terminator following the kargs
    #[serde(default)]
    pub end: String,
    /// Filler for the rest of the area
    #[serde(default)]
    pub pad: String,
}

impl KargsManifest {
    /// Returns Ok(None) if kargs.json doesn't exist.
    pub fn for_image(locator: &mut (impl FileLocator + ?Sized)) -> Result<Option<Self>> {
        let data = match locator.read_whole(KARGS_CONFIG_PATH) {
            Ok(data) => data,
            // old ISO without kargs.json
            Err(e) if e.is::<NotFound>() => return Ok(None),
            Err(e) => return Err(e).context("reading kargs config"),
        };
        Self::parse(&data).map(Some)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .context(FormatError(format!("decoding {}", KARGS_CONFIG_PATH)))
    }

    /// Paths of the files carrying kargs, in manifest order.  Entries
    /// without a path are skipped, as are repeats.
    pub fn paths(&self) -> Vec<String> {
        let mut ret: Vec<String> = Vec::new();
        for path in self.files.iter().filter_map(|f| f.path.as_ref()) {
            if ret.contains(path) {
                log::debug!("ignoring duplicate kargs file {}", path);
                continue;
            }
            ret.push(path.clone());
        }
        ret
    }

    pub fn entry(&self, path: &str) -> Result<&KargsFileEntry> {
        self.files
            .iter()
            .find(|f| f.path.as_deref() == Some(path))
            .ok_or_else(|| NotFound(format!("file {} not found in kargs config", path)).into())
    }
}

/// Returns the boot config files that need kargs appended.  Images
/// predating kargs.json get the default grub and isolinux configs.
pub fn kargs_files(locator: &mut (impl FileLocator + ?Sized)) -> Result<Vec<String>> {
    match KargsManifest::for_image(locator)? {
        Some(manifest) => Ok(manifest.paths()),
        None => {
            log::debug!("no {}; using default kargs files", KARGS_CONFIG_PATH);
            Ok(vec![
                DEFAULT_GRUB_CONFIG_PATH.to_string(),
                DEFAULT_ISOLINUX_CONFIG_PATH.to_string(),
            ])
        }
    }
}
