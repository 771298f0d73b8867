//! leta — daemon-backed LSP client for the command line.
//!
//! leta exposes semantic code navigation (definitions, references, call
//! hierarchies, renames, diagnostics, …) from any mix of LSP servers
//! across a set of polyglot workspace roots, without paying language
//! server startup cost on every invocation. A short-lived CLI talks over
//! local IPC to a long-lived daemon that keeps the servers warm.
//!
//! ```text
//! ┌───────┐  length-prefixed   ┌─────────────┐   Content-Length    ┌────────────────┐
//! │ leta  │◄──────────────────►│ leta-daemon │◄───────────────────►│ rust-analyzer  │
//! │ (CLI) │   JSON over IPC    │             │   JSON-RPC (LSP)    │ gopls, pyright │
//! └───────┘                    └─────────────┘   one per language  │ tsserver, …    │
//!                                                per workspace     └────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`lsp`] — wire codec, per-subprocess client, server registry
//! - [`workspace`] — sessions, capability gates, document sync
//! - [`index`] — symbol tree cache and symbol-expression resolution
//! - [`hover`] — hover cache
//! - [`ops`] — one handler per CLI operation
//! - [`daemon`] — IPC server, protocol, CLI-side spawn
//! - [`config`] / [`paths`] — user configuration and persisted state
//! - [`error`] — the stable error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod hover;
pub mod index;
pub mod lsp;
pub mod ops;
pub mod paths;
pub mod workspace;

pub use error::{Error, Result};
