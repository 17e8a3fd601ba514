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

//! Just enough ISO 9660 to find boot files by path, read them, and unpack
//! the whole tree.  Rock Ridge and Joliet are ignored, so record names are
//! the primary volume's uppercase identifiers; lookups make up for that by
//! matching case-insensitively and against level 1 (8.3) truncations.
//!
//! Field offsets follow ECMA-119.  See also https://wiki.osdev.org/ISO_9660.

use anyhow::{bail, Context, Result};
use bytes::{Buf, Bytes};
use std::io::{Read, Seek, SeekFrom, Take};
use std::path::{Component, Path};

use crate::errors::NotFound;

// the standard allows others, but nobody uses them
const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR_SECTOR: u64 = 16;
const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;
const DESCRIPTOR_ID: &[u8] = b"CD001";
const DESCRIPTOR_VERSION: u8 = 1;
// fixed header plus a one-byte identifier
const MIN_RECORD_LEN: usize = 34;
const FLAG_DIRECTORY: u8 = 0x02;
// d-characters are alphanumerics and '_'
const EXTRA_FILE_CHARS: &[u8] = b"!\"%&'()*+,-.:<=>? ";

/// A file or directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    /// First sector of the extent
    pub sector: u32,
    pub length: u32,
    pub is_dir: bool,
}

impl Record {
    /// Absolute offset of the extent in the image.
    pub fn offset(&self) -> u64 {
        self.sector as u64 * SECTOR_SIZE
    }
}

pub struct IsoFs<R: Read + Seek> {
    source: R,
    volume_id: String,
    root: Record,
}

impl<R: Read + Seek> IsoFs<R> {
    pub fn from_reader(mut source: R) -> Result<Self> {
        let image_len = source
            .seek(SeekFrom::End(0))
            .context("getting length of ISO")?;
        let mut sector = FIRST_DESCRIPTOR_SECTOR;
        let mut pvd = loop {
            let mut raw = vec![0u8; SECTOR_SIZE as usize];
            read_at(&mut source, sector * SECTOR_SIZE, &mut raw)
                .with_context(|| format!("reading volume descriptor at sector {}", sector))?;
            let mut buf = Bytes::from(raw);
            let kind = buf.get_u8();
            if buf.copy_to_bytes(DESCRIPTOR_ID.len()) != DESCRIPTOR_ID
                || buf.get_u8() != DESCRIPTOR_VERSION
            {
                bail!("no ISO 9660 volume descriptor at sector {}", sector);
            }
            match kind {
                DESCRIPTOR_PRIMARY => break buf,
                DESCRIPTOR_TERMINATOR => bail!("no primary volume descriptor found in ISO"),
                _ => sector += 1,
            }
        };

        // cursor is past the 7-byte header; system ID is of no interest
        let volume_id =
            parse_a_string(&eat(&mut pvd, 40 - 7).copy_to_bytes(32)).context("parsing volume id")?;
        let volume_sectors = eat(&mut pvd, 80 - 72).get_u32_le() as u64;
        if volume_sectors * SECTOR_SIZE > image_len {
            bail!("ISO image is incomplete");
        }
        let root = parse_record(eat(&mut pvd, 156 - 84)).context("parsing root directory record")?;
        if !root.is_dir {
            bail!("root directory record is not a directory");
        }
        Ok(Self {
            source,
            volume_id,
            root,
        })
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    pub fn root(&self) -> &Record {
        &self.root
    }

    /// Returns the entries of a directory in on-disc order, without "."
    /// and "..".
    pub fn read_dir(&mut self, dir: &Record) -> Result<Vec<Record>> {
        if !dir.is_dir {
            bail!("{} is not a directory", dir.name);
        }
        let mut raw = vec![0u8; dir.length as usize];
        read_at(&mut self.source, dir.offset(), &mut raw)
            .with_context(|| format!("reading directory {}", dir.name))?;
        let mut buf = Bytes::from(raw);
        let mut entries = Vec::new();
        while buf.has_remaining() {
            if buf[0] == 0 {
                // records never cross a sector boundary; a zero length
                // byte pads out the rest of the sector
                let pos = dir.length as usize - buf.remaining();
                let jump = SECTOR_SIZE as usize - pos % SECTOR_SIZE as usize;
                buf.advance(jump.min(buf.remaining()));
                continue;
            }
            let record = parse_record(&mut buf)
                .with_context(|| format!("parsing entry of directory {}", dir.name))?;
            if record.name != "." && record.name != ".." {
                entries.push(record);
            }
        }
        Ok(entries)
    }

    /// Resolves `path` from the root.  "." and ".." are handled
    /// lexically.
    pub fn get_path(&mut self, path: &str) -> Result<Record> {
        Ok(self.resolve(path)?.1)
    }

    /// Like `get_path`, but also returns the on-disc path of the record
    /// relative to the root, as `walk` would report it.
    pub fn resolve(&mut self, path: &str) -> Result<(String, Record)> {
        let mut current = self.root.clone();
        let mut disc_path = String::new();
        for component in path_components(path) {
            if !current.is_dir {
                bail!(NotFound(format!(
                    "/{} in path {} is not a directory",
                    disc_path, path
                )));
            }
            current = self
                .read_dir(&current)?
                .into_iter()
                .find(|r| name_matches(&r.name, component))
                .ok_or_else(|| {
                    NotFound(format!(
                        "no record for {} in directory /{}",
                        component, disc_path
                    ))
                })?;
            if !disc_path.is_empty() {
                disc_path.push('/');
            }
            disc_path.push_str(&current.name);
        }
        Ok((disc_path, current))
    }

    /// Like `resolve`, but the record must be a file.
    pub fn resolve_file(&mut self, path: &str) -> Result<(String, Record)> {
        let (disc_path, record) = self.resolve(path)?;
        if record.is_dir {
            bail!("{} is a directory", path);
        }
        Ok((disc_path, record))
    }

    /// Returns a reader over the contents of a file.
    pub fn read_file(&mut self, file: &Record) -> Result<Take<&mut R>> {
        self.source
            .seek(SeekFrom::Start(file.offset()))
            .with_context(|| format!("seeking to file {}", file.name))?;
        Ok((&mut self.source).take(file.length as u64))
    }

    /// Lists every record below the root depth-first, each parent before
    /// its children, with paths relative to the root.
    pub fn walk(&mut self) -> Result<Vec<(String, Record)>> {
        let mut walked = Vec::new();
        let mut pending = Vec::new();
        let root = self.root.clone();
        self.push_children(&mut pending, "", &root)?;
        while let Some((path, record)) = pending.pop() {
            if record.is_dir {
                self.push_children(&mut pending, &path, &record)?;
            }
            walked.push((path, record));
        }
        Ok(walked)
    }

    fn push_children(
        &mut self,
        pending: &mut Vec<(String, Record)>,
        prefix: &str,
        dir: &Record,
    ) -> Result<()> {
        let children = self
            .read_dir(dir)
            .with_context(|| format!("walking /{}", prefix))?;
        for child in children.into_iter().rev() {
            let path = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{}/{}", prefix, child.name)
            };
            pending.push((path, child));
        }
        Ok(())
    }
}

fn read_at<R: Read + Seek>(source: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    source
        .seek(SeekFrom::Start(offset))
        .with_context(|| format!("seeking to offset {}", offset))?;
    source
        .read_exact(buf)
        .with_context(|| format!("reading {} bytes at offset {}", buf.len(), offset))
}

fn eat(buf: &mut Bytes, n: usize) -> &mut Bytes {
    buf.advance(n);
    buf
}

/// Parses the directory record at the cursor and advances past it.
fn parse_record(buf: &mut Bytes) -> Result<Record> {
    if !buf.has_remaining() {
        bail!("incomplete directory record; corrupt ISO?");
    }
    let len = buf.get_u8() as usize;
    // + 1 because len includes the length byte
    if len < MIN_RECORD_LEN || len > buf.remaining() + 1 {
        bail!("incomplete directory record; corrupt ISO?");
    }
    let mut record = buf.copy_to_bytes(len - 1);
    // skip extended attribute length; both-endian fields are read LE
    let sector = eat(&mut record, 1).get_u32_le();
    let length = eat(&mut record, 4).get_u32_le();
    // skip the BE length and the recording date
    let flags = eat(&mut record, 4 + 7).get_u8();
    let name_len = eat(&mut record, 32 - 26).get_u8() as usize;
    if name_len > record.remaining() {
        bail!("directory record name overruns record; corrupt ISO?");
    }
    let ident = record.copy_to_bytes(name_len);
    let name = match &ident[..] {
        [0] => ".".to_string(),
        [1] => "..".to_string(),
        ident => parse_file_identifier(ident)?,
    };
    Ok(Record {
        name,
        sector,
        length,
        is_dir: flags & FLAG_DIRECTORY != 0,
    })
}

/// Strips the version suffix and the dot of an empty extension, so
/// "GRUB.CFG;1" becomes "GRUB.CFG" and "README.;1" becomes "README".
fn parse_file_identifier(ident: &[u8]) -> Result<String> {
    let mut name = match ident.iter().rposition(|b| *b == b';') {
        Some(pos) => &ident[..pos],
        None => ident,
    };
    if let Some(stripped) = name.strip_suffix(b".") {
        name = stripped;
    }
    if name.is_empty()
        || !name
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || EXTRA_FILE_CHARS.contains(b))
    {
        bail!(
            "invalid file identifier {:?}",
            String::from_utf8_lossy(ident)
        );
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}

/// Parses a space-padded a-characters field.
fn parse_a_string(field: &[u8]) -> Result<String> {
    let end = field
        .iter()
        .rposition(|b| *b != b' ' && *b != 0)
        .map_or(0, |pos| pos + 1);
    let s = &field[..end];
    if !s.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bail!("invalid string {:?}", String::from_utf8_lossy(s));
    }
    Ok(String::from_utf8_lossy(s).into_owned())
}

/// Splits `path` into components relative to the root, resolving "."
/// and "..".  "" and "/" both name the root.
fn path_components(path: &str) -> Vec<&str> {
    let mut ret = Vec::new();
    for c in Path::new(path).components() {
        match c {
            Component::Normal(c) => {
                if let Some(c) = c.to_str() {
                    ret.push(c);
                }
            }
            Component::ParentDir => {
                ret.pop();
            }
            _ => (),
        }
    }
    ret
}

/// Whether an on-disc record name identifies the requested component.
/// Boot files are referenced by their Rock Ridge names, e.g.
/// "kargs.json", which a plain ISO 9660 volume stores as "KARGS.JSO".
fn name_matches(record: &str, wanted: &str) -> bool {
    record.eq_ignore_ascii_case(wanted) || record.eq_ignore_ascii_case(&level1_name(wanted))
}

fn level1_name(name: &str) -> String {
    let truncate = |s: &str, n: usize| s.chars().take(n).collect::<String>();
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.{}", truncate(stem, 8), truncate(ext, 3))
        }
        _ => truncate(name, 8),
    }
}
