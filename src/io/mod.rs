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

use anyhow::{bail, Context, Result};
use std::io::{ErrorKind, Read, Seek, Write};

mod isolate;
mod limit;
mod overlay;

pub use self::isolate::*;
pub use self::limit::*;
pub use self::overlay::*;

// The default BufReader/BufWriter buffer size is 8 KiB, which isn't large
// enough to fully amortize system call overhead.
// https://github.com/rust-lang/rust/issues/49921
// https://github.com/coreutils/coreutils/blob/6a3d2883/src/ioblksize.h
pub const BUFFER_SIZE: usize = 256 * 1024;

/// A seekable byte source that can be handed to another thread.  Base
/// images and everything layered over them are boxed as this.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Copies exactly `n` bytes from `reader` to `writer` through `buf`.
/// Running out of input first is an error.
pub fn copy_exactly_n(
    reader: &mut (impl Read + ?Sized),
    writer: &mut (impl Write + ?Sized),
    n: u64,
    buf: &mut [u8],
) -> Result<u64> {
    let mut remaining = n;
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        let count = match reader.read(&mut buf[..chunk]) {
            Ok(0) => bail!(
                "unexpected end of input after {} of {} bytes",
                n - remaining,
                n
            ),
            Ok(count) => count,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading input"),
        };
        writer.write_all(&buf[..count]).context("writing output")?;
        remaining -= count as u64;
    }
    Ok(n)
}
