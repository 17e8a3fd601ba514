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

use std::io::{self, Write};

/// Writer confined to a fixed number of bytes, such as a karg area inside
/// a boot file.  A write that doesn't fit is refused whole, so nothing
/// lands past the end of the area.
pub struct LimitWriter<W: Write> {
    inner: W,
    written: u64,
    remaining: u64,
    area: String,
}

impl<W: Write> LimitWriter<W> {
    pub fn new(inner: W, limit: u64, area: impl Into<String>) -> Self {
        Self {
            inner,
            written: 0,
            remaining: limit,
            area: area.into(),
        }
    }
}

impl<W: Write> Write for LimitWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "{} bytes at offset {} would overrun {} of {} bytes",
                    buf.len(),
                    self.written,
                    self.area,
                    self.written + self.remaining
                ),
            ));
        }
        let count = self.inner.write(buf)?;
        self.written += count as u64;
        self.remaining -= count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
