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

//! Read wrapper that substitutes a patch for one contiguous region of a
//! base stream.  The base is never copied; it is seeked and read lazily
//! as the overlay is consumed, and it is dropped along with the overlay.

use anyhow::{bail, Result};
use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};

pub struct OverlayReader<R: Read + Seek> {
    base: R,
    patch: Bytes,
    offset: u64,
    pos: u64,
    // where the base cursor is known to be, to skip redundant seeks
    base_pos: Option<u64>,
}

impl<R: Read + Seek> OverlayReader<R> {
    /// Overlay all of `patch` onto `base` starting at absolute `offset`.
    pub fn new(base: R, offset: u64, patch: impl Into<Bytes>) -> Self {
        Self {
            base,
            patch: patch.into(),
            offset,
            pos: 0,
            base_pos: None,
        }
    }

    /// Overlay the first `length` bytes of `patch`.  The declared length
    /// must be backed by patch bytes.
    pub fn with_length(base: R, offset: u64, patch: impl Into<Bytes>, length: u64) -> Result<Self> {
        let mut patch = patch.into();
        if length > patch.len() as u64 {
            bail!(
                "overlay length {} exceeds patch size {}",
                length,
                patch.len()
            );
        }
        patch.truncate(length as usize);
        Ok(Self::new(base, offset, patch))
    }

    fn patch_end(&self) -> u64 {
        self.offset + self.patch.len() as u64
    }

    fn read_base(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.base_pos != Some(self.pos) {
            self.base.seek(SeekFrom::Start(self.pos))?;
        }
        let count = match self.base.read(buf) {
            Ok(count) => count,
            Err(e) => {
                self.base_pos = None;
                return Err(e);
            }
        };
        self.base_pos = Some(self.pos + count as u64);
        Ok(count)
    }
}

impl<R: Read + Seek> Read for OverlayReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let count = if self.pos < self.offset {
            // stop at the start of the patch
            let allowed = (self.offset - self.pos).min(buf.len() as u64) as usize;
            self.read_base(&mut buf[..allowed])?
        } else if self.pos < self.patch_end() {
            let start = (self.pos - self.offset) as usize;
            let count = (self.patch.len() - start).min(buf.len());
            buf[..count].copy_from_slice(&self.patch[start..start + count]);
            count
        } else {
            self.read_base(buf)?
        };
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek> Seek for OverlayReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => {
                let base_len = self.base.seek(SeekFrom::End(0))?;
                self.base_pos = Some(base_len);
                base_len.max(self.patch_end()).checked_add_signed(d)
            }
        };
        self.pos = new.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        Ok(self.pos)
    }
}
