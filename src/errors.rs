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

//! Error marker types.  Everything is reported through `anyhow`; these
//! types sit in the error chain so callers can tell the failure classes
//! apart with `anyhow::Error::is()`.

/// Requested path or manifest entry was not found.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NotFound(pub String);

/// Malformed manifest, argument list, or boot config.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FormatError(pub String);

/// Kernel argument record carrying an operation other than append.
#[derive(Debug, thiserror::Error)]
#[error("only 'append' operation is allowed; got '{0}'")]
pub struct UnsupportedOperation(pub String);
