//! Error types for leta.
//!
//! The taxonomy here is the stable, user-visible contract: every failure
//! surfaced over IPC or printed by the CLI is one of these kinds. Handlers
//! never panic on server misbehavior; they convert into a taxonomy value.

use std::time::Duration;

use thiserror::Error;

/// One candidate in an [`Error::Ambiguous`] listing.
///
/// The `qualified` field is formatted so the user can paste it back as the
/// next symbol argument.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Candidate {
    /// Fully qualified name, e.g. `UserStore.save`.
    pub qualified: String,
    /// Workspace-relative path of the defining file.
    pub path: String,
    /// 1-based line of the symbol's selection range.
    pub line: u32,
    /// Human-readable symbol kind.
    pub kind: String,
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}:{}",
            self.qualified, self.kind, self.path, self.line
        )
    }
}

/// The unified error type for all leta operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A symbol expression matched zero entries.
    #[error("no symbol matches '{0}'")]
    NotFound(String),

    /// A symbol expression matched more than one entry after
    /// disambiguation. Carries the surviving candidates.
    #[error("'{expr}' is ambiguous; candidates:\n{}", format_candidates(.candidates))]
    Ambiguous {
        /// The expression as the user wrote it.
        expr: String,
        /// Candidates that survived disambiguation.
        candidates: Vec<Candidate>,
    },

    /// The language server does not advertise the required capability.
    #[error("{server} does not support {capability}")]
    NotSupported {
        /// The LSP capability that was missing.
        capability: String,
        /// The server executable name.
        server: String,
    },

    /// An LSP request exceeded its deadline.
    #[error("language server request timed out after {0:?}")]
    TimedOut(Duration),

    /// The language server subprocess exited while a request was in flight.
    #[error("language server exited: {0}")]
    ServerDead(String),

    /// A workspace restart invalidated the request.
    #[error("request invalidated by server restart")]
    Restarted,

    /// Malformed frame or unparseable payload on a JSON-RPC stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server returned a JSON-RPC error response.
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Filesystem or IPC I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input from the user.
    #[error("{0}")]
    Usage(String),

    /// A replace-function signature check failed and the edit was rolled
    /// back.
    #[error("signature changed: expected '{expected}', got '{actual}'")]
    SignatureChanged {
        /// First signature line before the edit.
        expected: String,
        /// First signature line after the edit.
        actual: String,
    },

    /// Call-hierarchy search exhausted without reaching the target.
    #[error("no call path from '{from}' to '{to}' within depth {depth}")]
    PathNotFound {
        /// Source symbol expression.
        from: String,
        /// Target symbol expression.
        to: String,
        /// Depth limit that was searched.
        depth: u32,
    },
}

impl Error {
    /// Stable kind string used on the IPC wire and in CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::Ambiguous { .. } => "Ambiguous",
            Error::NotSupported { .. } => "NotSupported",
            Error::TimedOut(_) => "TimedOut",
            Error::ServerDead(_) => "ServerDead",
            Error::Restarted => "Restarted",
            Error::Protocol(_) => "ProtocolError",
            Error::Server { .. } => "ServerError",
            Error::Io(_) => "IOError",
            Error::Usage(_) => "UsageError",
            Error::SignatureChanged { .. } => "SignatureChanged",
            Error::PathNotFound { .. } => "PathNotFound",
        }
    }

    /// Whether an aggregate operation should keep going after this error.
    ///
    /// Transient per-file failures become warnings; everything else aborts
    /// the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TimedOut(_) | Error::ServerDead(_) | Error::Restarted
        )
    }
}

fn format_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("  {c}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A specialized Result type for leta operations.
pub type Result<T> = std::result::Result<T, Error>;
