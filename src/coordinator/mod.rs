//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Replica membership (who is connected, what each one holds)
//! - Placement decisions (least-loaded replicas first)
//! - Store/remove orchestration (ACK collection with a deadline)
//! - Per-file locking and the reload cursor

pub mod catalog;
pub mod operations;
pub mod registry;
pub mod replica_link;
pub mod server;
pub mod session;

pub use operations::{LoadTarget, OperationCoordinator, PendingStore};
pub use server::Coordinator;
