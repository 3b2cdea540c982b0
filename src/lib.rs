//! Swagman - a configuration engine for SWAG reverse-proxy deployments.
//!
//! Swagman manages the flat directory of nginx snippets a SWAG gateway
//! loads: it creates configurations from templates, performs surgical
//! in-place edits (upstream host, port, MCP location blocks), keeps
//! timestamped backups with retention, and probes the proxied services over
//! HTTPS. The library exposes the core building blocks so a dispatch
//! front-end (an MCP tool, a CLI, an HTTP API) can drive them.
//!
//! # Features
//! - Template-driven creation of `subdomain` / `subfolder` configurations,
//!   with MCP and QUIC variants
//! - Structural validation of every rendered or edited file before it is
//!   written
//! - Atomic writes (temp file + fsync + rename) under per-path locks, plus
//!   rollback-capable multi-file transactions
//! - Targeted field updates driven by anchored pattern matching, never a
//!   full nginx parser
//! - Timestamped backups with age-based retention
//! - Bounded multi-endpoint health probing over one pooled HTTPS client
//! - Tail-reading of the gateway's log files
//!
//! # Quick Example
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//!
//! use swagman::{SwagService, config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let settings = config::load_settings()?;
//! let service = SwagService::new(settings).await?;
//! let listing = service
//!     .list(Default::default(), &CancellationToken::new())
//!     .await?;
//! println!("{} configurations", listing.total);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping business logic inside `core`. The
//! [`SwagService`] facade owns the managers in dependency order; end users
//! should prefer the re-exports documented below instead of reaching into
//! internal modules directly.
//!
//! # Error Handling
//! Core APIs return [`core::OpError`], a closed taxonomy of machine-readable
//! kinds; the binary boundary uses `eyre` for context-rich reports.
//!
//! # Concurrency
//! Operations are cooperative-async on tokio. Every public operation takes a
//! `CancellationToken` checked before each suspension point. Mutations of a
//! single file are totally ordered by a per-path lock; distinct files
//! proceed in parallel.
//!
//! # License
//! Dual-licensed under either MIT or Apache-2.0 at your option.
pub mod config;
pub mod core;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::HttpProbeAdapter,
    core::{OpError, OpResult, SwagService},
    ports::http_client::HttpProbe,
    utils::GracefulShutdown,
};
