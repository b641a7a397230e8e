//! atsync: bidirectional synchronization between an OPC-UA node tree and a source directory
//!
//! Pulling browses the server and writes every node as a definition file plus a value file,
//! splitting displays and scripts into editable parts. Pushing walks the source directory and
//! writes or creates the nodes on the server. Both directions hand a node to its handler only
//! after every node it references was handled.

pub mod browse;
pub mod coding;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod model;
pub mod server;
pub mod sync;
pub mod tooling;
pub mod transform;
pub mod types;

pub use error::SyncError;
