//! # minifs
//!
//! A replicated file store with a single coordinator:
//! - Every file is kept on exactly R storage nodes ("replicas")
//! - Stores and removes commit only once every replica acknowledges
//! - Per-file locking keeps concurrent store/remove/load consistent
//! - Loads fail over to the next replica holding the file
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            ┌──────────────────────────────┐
//!  clients ─►│         Coordinator          │
//!   (ctrl)   │  catalog · registry · locks  │
//!            └──────┬──────────┬────────────┘
//!                   │ JOIN/LIST/REMOVE/ACKs
//!        ┌──────────┴───┐  ┌───┴──────────┐
//!        │  Replica A   │  │  Replica B   │  ...
//!        │  (data dir)  │  │  (data dir)  │
//!        └──────▲───────┘  └──────▲───────┘
//!               └── clients (STORE / LOAD_DATA bytes)
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minifs-coord --bind 0.0.0.0:12345 --replication-factor 2 --timeout-ms 1000
//! # or, positionally: cport R timeout rebalance_period
//! minifs-coord 12345 2 1000 10000
//! ```
//!
//! ### Start replicas
//! ```bash
//! minifs-replica --bind 0.0.0.0:4001 --coordinator 127.0.0.1:12345 --data ./r1
//! minifs-replica --bind 0.0.0.0:4002 --coordinator 127.0.0.1:12345 --data ./r2
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minifs store report.pdf --file ./report.pdf
//! minifs load report.pdf --output ./copy.pdf
//! minifs list --json
//! minifs remove report.pdf
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod replica;

// Re-export commonly used types
pub use client::Client;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use replica::ReplicaServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
