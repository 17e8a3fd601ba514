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

//! Kernel argument injection for CoreOS live ISO images.
//!
//! Rather than rewriting a multi-gigabyte image, callers get back one
//! replacement byte stream per boot config file.  Each stream is meant to
//! be overlaid at the file's original offset while the image is copied.

pub mod errors;
pub mod image;
pub mod io;
pub mod iso9660;
pub mod kargs;

#[cfg(test)]
mod testutil;
