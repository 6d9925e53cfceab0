//! Common utilities and types shared across minifs

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{Config, CoordinatorConfig, ReplicaConfig};
pub use error::{Error, Result};
pub use protocol::{ReplicaId, RequestKind};
pub use utils::{format_bytes, retry_with_backoff, validate_filename};
