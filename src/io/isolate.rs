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

use anyhow::{Context, Result};
use std::io::{self, Read, Seek, SeekFrom};

/// A window onto one file's bytes inside a larger image stream.  Offsets
/// seen through the window are relative to the start of the file.
///
/// The declared length may be larger than what the source can supply; in
/// that case reads end early and the consumer is expected to pad.
pub struct IsolatedFile<R: Read + Seek> {
    source: R,
    start: u64,
    length: u64,
    pos: u64,
}

impl<R: Read + Seek> IsolatedFile<R> {
    /// Isolate `length` bytes of `source` at absolute offset `start`.  If
    /// `min_length` is larger, the window is extended to it and the second
    /// return value is true.
    pub fn isolate(mut source: R, start: u64, length: u64, min_length: u64) -> Result<(Self, bool)> {
        let (length, expanded) = if min_length > length {
            (min_length, true)
        } else {
            (length, false)
        };
        source
            .seek(SeekFrom::Start(start))
            .with_context(|| format!("seeking to file at offset {}", start))?;
        Ok((
            Self {
                source,
                start,
                length,
                pos: 0,
            },
            expanded,
        ))
    }

    /// Declared length of the window.
    pub fn len(&self) -> u64 {
        self.length
    }
}

impl<R: Read + Seek> Read for IsolatedFile<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let allowed = self.length.saturating_sub(self.pos).min(buf.len() as u64) as usize;
        if allowed == 0 {
            return Ok(0);
        }
        let count = self.source.read(&mut buf[..allowed])?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek> Seek for IsolatedFile<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.length.checked_add_signed(d),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.source.seek(SeekFrom::Start(self.start + new))?;
        self.pos = new;
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_isolate_file() {
        let data: Vec<u8> = (0..100).collect();
        let (mut file, expanded) = IsolatedFile::isolate(Cursor::new(data), 20, 10, 0).unwrap();
        assert!(!expanded);
        assert_eq!(file.len(), 10);
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out, (20..30).collect::<Vec<u8>>());

        // seeking is relative to the file
        assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 7);
        out.clear();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out, [27, 28, 29]);
        file.seek(SeekFrom::Current(-11)).unwrap_err();
    }

    #[test]
    fn test_isolate_min_length() {
        let data: Vec<u8> = (0..100).collect();

        // min length within the real length
        let (file, expanded) = IsolatedFile::isolate(Cursor::new(data.clone()), 0, 10, 10).unwrap();
        assert!(!expanded);
        assert_eq!(file.len(), 10);

        // extended beyond the real length
        let (mut file, expanded) =
            IsolatedFile::isolate(Cursor::new(data.clone()), 90, 5, 20).unwrap();
        assert!(expanded);
        assert_eq!(file.len(), 20);
        // source only has 10 bytes left; the rest is the consumer's problem
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out, (90..100).collect::<Vec<u8>>());
    }
}
