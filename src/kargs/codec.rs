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

//! JSON form of a kernel argument list, as exchanged with callers:
//! `[{"operation": "append", "value": "rd.net.timeout.carrier=60"}]`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::{FormatError, UnsupportedOperation};

const APPEND: &str = "append";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KernelArgument {
    /// Only `append` is accepted.  Kept as a plain string so unknown or
    /// missing operations are reported as such rather than as bad JSON.
    #[serde(default)]
    pub operation: String,
    /// `<parameter>` or `<parameter>=<value>`, e.g. `quiet` or
    /// `isolcpus=1,2,10-20,100-2000:2/25`.  Not validated; the kernel's
    /// own parsing is much looser than any pattern we'd impose.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// Serializes arguments as a list of append operations.
pub fn kargs_to_json<S: AsRef<str>>(args: &[S]) -> Result<String> {
    let kargs: Vec<KernelArgument> = args
        .iter()
        .map(|arg| KernelArgument {
            operation: APPEND.to_string(),
            value: arg.as_ref().to_string(),
        })
        .collect();
    serde_json::to_string(&kargs).context("failed to marshal kernel arguments")
}

/// Parses a list of append operations.  Any other operation is rejected
/// rather than skipped.
pub fn kargs_from_json(json: &str) -> Result<Vec<String>> {
    let kargs: Option<Vec<KernelArgument>> = serde_json::from_str(json)
        .context(FormatError("failed to unmarshal kernel arguments".into()))?;
    kargs
        .unwrap_or_default()
        .into_iter()
        .map(|karg| {
            if karg.operation == APPEND {
                Ok(karg.value)
            } else {
                Err(anyhow::Error::from(UnsupportedOperation(karg.operation)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kargs_to_json() {
        assert_eq!(
            kargs_to_json(&["quiet", "rd.net.timeout.carrier=60"]).unwrap(),
            r#"[{"operation":"append","value":"quiet"},{"operation":"append","value":"rd.net.timeout.carrier=60"}]"#
        );
        assert_eq!(kargs_to_json::<&str>(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_round_trip() {
        let args = vec![
            "quiet".to_string(),
            "isolcpus=1,2,10-20,100-2000:2/25".to_string(),
            "console=ttyS0,115200n8".to_string(),
            "foo=\"a b\"".to_string(),
        ];
        assert_eq!(kargs_from_json(&kargs_to_json(&args).unwrap()).unwrap(), args);
    }

    #[test]
    fn test_kargs_from_json() {
        assert_eq!(
            kargs_from_json(r#"[{"operation": "append", "value": "a=b"}, {"operation": "append"}]"#)
                .unwrap(),
            vec!["a=b", ""]
        );
        assert!(kargs_from_json("null").unwrap().is_empty());
        assert!(kargs_from_json("[]").unwrap().is_empty());

        // other operations are errors, not skipped
        let err = kargs_from_json(
            r#"[{"operation": "append", "value": "a"}, {"operation": "delete", "value": "b"}]"#,
        )
        .unwrap_err();
        assert!(err.is::<UnsupportedOperation>());
        assert_eq!(
            err.to_string(),
            "only 'append' operation is allowed; got 'delete'"
        );
        assert!(
            kargs_from_json(r#"[{"operation": "replace", "value": "a=b=c"}]"#)
                .unwrap_err()
                .is::<UnsupportedOperation>()
        );

        // unknown or missing operations
        let err = kargs_from_json(r#"[{"operation": "frobnicate", "value": "a"}]"#).unwrap_err();
        assert!(err.is::<UnsupportedOperation>());
        assert_eq!(
            err.to_string(),
            "only 'append' operation is allowed; got 'frobnicate'"
        );
        let err = kargs_from_json(r#"[{"value": "a"}]"#).unwrap_err();
        assert!(err.is::<UnsupportedOperation>());
        assert_eq!(err.to_string(), "only 'append' operation is allowed; got ''");
        assert!(kargs_from_json(r#"[{"operation": "Append", "value": "a"}]"#)
            .unwrap_err()
            .is::<UnsupportedOperation>());

        // malformed
        for json in [
            "",
            "{}",
            r#"[{"operation": "append", "value": "a"}"#,
            r#"[{"operation": 1, "value": "a"}]"#,
        ] {
            assert!(kargs_from_json(json).unwrap_err().is::<FormatError>(), "{}", json);
        }
    }
}
