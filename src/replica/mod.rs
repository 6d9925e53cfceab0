//! Storage node implementation
//!
//! A replica:
//! - Joins the coordinator and answers its LIST and REMOVE commands
//! - Accepts file uploads from clients and acknowledges them upstream
//! - Serves file contents back to clients on LOAD_DATA

pub mod server;
pub mod store;

pub use server::ReplicaServer;
pub use store::FileStore;
