//! IPC request/response shapes.
//!
//! One JSON object per frame. A request names an operation and carries
//! its params verbatim; a response is either `{ok: <payload>}` or
//! `{error: {kind, detail}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::ops::OpOutput;

/// Output format requested by the client. The daemon always returns the
/// typed payload; this is advisory for renderers that stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Human-oriented text.
    #[default]
    Plain,
    /// Machine-oriented JSON.
    Json,
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Operation name, e.g. `grep` or `workspace-add`.
    pub op: String,
    /// Operation parameters.
    #[serde(default)]
    pub params: Value,
    /// Requested output format.
    #[serde(default)]
    pub format: Format,
}

impl Request {
    /// Builds a request from typed params.
    pub fn new<P: Serialize>(op: &str, params: P, format: Format) -> Self {
        Self {
            op: op.to_string(),
            params: serde_json::to_value(params).unwrap_or(Value::Null),
            format,
        }
    }
}

/// Wire form of a taxonomy error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable kind string (§ error taxonomy).
    pub kind: String,
    /// Human-readable detail.
    pub detail: String,
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind().to_string(),
            detail: error.to_string(),
        }
    }
}

/// A daemon response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    /// Success.
    Ok {
        /// The operation's typed result.
        ok: OpOutput,
    },
    /// Failure.
    Error {
        /// The taxonomy error.
        error: ErrorBody,
    },
}

impl Response {
    /// Wraps a handler result.
    pub fn from_result(result: crate::error::Result<OpOutput>) -> Self {
        match result {
            Ok(output) => Response::Ok { ok: output },
            Err(error) => Response::Error {
                error: ErrorBody::from(&error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let request = Request::new(
            "grep",
            serde_json::json!({"pattern": "Handler$"}),
            Format::Json,
        );
        let wire = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.op, "grep");
        assert_eq!(back.format, Format::Json);
        assert_eq!(back.params["pattern"], "Handler$");
    }

    #[test]
    fn test_format_defaults_to_plain() {
        let back: Request = serde_json::from_str(r#"{"op": "files"}"#).unwrap();
        assert_eq!(back.format, Format::Plain);
        assert!(back.params.is_null());
    }

    #[test]
    fn test_response_untagged_shapes() {
        let ok = Response::Ok {
            ok: OpOutput::Message {
                text: "done".into(),
            },
        };
        let wire = serde_json::to_string(&ok).unwrap();
        assert!(wire.starts_with(r#"{"ok":"#));
        let back: Response = serde_json::from_str(&wire).unwrap();
        assert!(matches!(back, Response::Ok { .. }));

        let error = Response::from_result(Err(Error::NotFound("save".into())));
        let wire = serde_json::to_string(&error).unwrap();
        let back: Response = serde_json::from_str(&wire).unwrap();
        let Response::Error { error } = back else {
            panic!("expected error shape");
        };
        assert_eq!(error.kind, "NotFound");
        assert!(error.detail.contains("save"));
    }
}
