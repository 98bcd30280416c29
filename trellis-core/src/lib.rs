//! # Trellis Core
//!
//! Plugin host core for a social-platform backend.
//!
//! Trellis discovers, validates, installs, enables, configures, and
//! sandboxes third-party plugins that extend host behavior (content audit,
//! SMS channels, object storage, third-party login, voting) without
//! modifying the host application. The HTTP layer, relational schema, and
//! admin UI live outside this crate and consume it through narrow
//! contracts.
//!
//! ## Components
//!
//! - [`plugin::manifest`]: plugin identity and declared capabilities
//! - [`plugin::discovery`]: directory scanning into a manifest catalog
//! - [`plugin::ledger`]: persisted installed/enabled state with history
//! - [`plugin::settings`]: schema-validated plugin configuration
//! - [`plugin::sandbox`]: time/memory/operation enforcement around plugin
//!   code
//! - [`plugin::health`]: error counting and health verdicts
//! - [`plugin::orchestrator`]: the lifecycle state machine tying it together
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis_core::config::HostConfig;
//! use trellis_core::plugin::{PluginHost, PluginRegistry};
//!
//! # struct VotesPlugin;
//! # #[async_trait::async_trait]
//! # impl trellis_core::plugin::Plugin for VotesPlugin {
//! #     fn manifest(&self) -> trellis_core::plugin::PluginManifest {
//! #         trellis_core::plugin::PluginManifest::load_str(
//! #             "[plugin]\nname = \"votes\"\nversion = \"1.0.0\"\n").unwrap()
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = PluginRegistry::new();
//!     registry.register(Arc::new(VotesPlugin))?;
//!
//!     let host = PluginHost::new(HostConfig::default(), registry)?;
//!     host.discover();
//!     host.install("votes").await?;
//!     host.enable("votes").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Sandbox honesty
//!
//! The sandbox is a cooperative, best-effort guard inside a single trusted
//! process (resource ceilings, a forbidden-operation gate, and real
//! deadline cancellation), not an OS-level isolation boundary. See
//! [`plugin::sandbox`] for the full statement.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod plugin;
pub mod prelude;
pub mod types;

pub use crate::{
    config::HostConfig,
    error::{Error, Result},
    plugin::{PluginHost, PluginRegistry},
    types::{HostInfo, Timestamp},
};
