//! In-memory node model

pub mod node;
pub mod node_id;
pub mod references;
pub mod variant;

pub use node::{BrowsedInfo, Definition, FileInfo, Node, Origin};
pub use node_id::NodeId;
pub use references::{ReferenceMap, References};
pub use variant::{Value, ValueSlot, Variant};
