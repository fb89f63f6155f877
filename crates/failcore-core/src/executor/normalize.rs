//! Output normalization into a closed set of kinds.
//!
//! | Tool output                 | Kind      | Stored value            |
//! |-----------------------------|-----------|-------------------------|
//! | object, array, number, bool | JSON      | as is                   |
//! | string                      | TEXT      | as is                   |
//! | bytes                       | BYTES     | `{"length": n}` only    |
//! | artifacts                   | ARTIFACTS | artifact list           |
//! | null, opaque                | UNKNOWN   | null / `{"type": name}` |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::tool::ToolOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputKind {
    Json,
    Text,
    Bytes,
    Artifacts,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub kind: OutputKind,
    pub value: Value,
}

pub fn normalize(output: ToolOutput) -> StepOutput {
    match output {
        ToolOutput::Value(Value::Null) => StepOutput {
            kind: OutputKind::Unknown,
            value: Value::Null,
        },
        ToolOutput::Value(Value::String(text)) => StepOutput {
            kind: OutputKind::Text,
            value: Value::String(text),
        },
        ToolOutput::Value(value) => StepOutput {
            kind: OutputKind::Json,
            value,
        },
        // raw bytes never reach the trace
        ToolOutput::Bytes(bytes) => StepOutput {
            kind: OutputKind::Bytes,
            value: json!({"length": bytes.len()}),
        },
        ToolOutput::Artifacts(artifacts) => StepOutput {
            kind: OutputKind::Artifacts,
            value: serde_json::to_value(&artifacts).unwrap_or(Value::Null),
        },
        ToolOutput::Opaque(type_name) => StepOutput {
            kind: OutputKind::Unknown,
            value: json!({"type": type_name}),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tool::Artifact;

    #[test]
    fn test_kind_mapping() {
        let cases = [
            (ToolOutput::Value(json!({"a": 1})), OutputKind::Json),
            (ToolOutput::Value(json!(3.5)), OutputKind::Json),
            (ToolOutput::Value(json!(true)), OutputKind::Json),
            (ToolOutput::Value(json!([1, 2])), OutputKind::Json),
            (ToolOutput::from("hi"), OutputKind::Text),
            (ToolOutput::Value(Value::Null), OutputKind::Unknown),
            (ToolOutput::Opaque("Socket".into()), OutputKind::Unknown),
            (
                ToolOutput::Artifacts(vec![Artifact::new("file:///tmp/a.png")]),
                OutputKind::Artifacts,
            ),
        ];
        for (output, kind) in cases {
            assert_eq!(normalize(output).kind, kind);
        }
    }

    #[test]
    fn test_bytes_keep_length_only() {
        let out = normalize(ToolOutput::Bytes(vec![0u8; 42]));
        assert_eq!(out.kind, OutputKind::Bytes);
        assert_eq!(out.value, json!({"length": 42}));
    }
}
