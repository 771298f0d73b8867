//! LSP plumbing: wire framing, the per-subprocess client, the server
//! registry, and position/kind helpers.

pub mod client;
pub mod codec;
pub mod registry;
pub mod types;

pub use client::{LspClient, ServerNotification};
pub use registry::{Registry, ServerSpec};
