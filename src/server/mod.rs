//! Server access
//!
//! The transport itself lives outside this crate. Everything here is written against the
//! `Session` trait: one handle per run, shared by every browse, read and write task.

pub mod api;
pub mod session;

use crate::error::SyncError;
use crate::model::{NodeId, Variant};
use crate::types::{DataType, NodeClass, StatusCode};
use async_trait::async_trait;

pub use session::{with_session, Connector, SessionScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseDirection {
    Forward,
    Inverse,
}

/// One relationship returned by a browse call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    pub reference_type: i32,
    pub target: NodeId,
    pub node_class: NodeClass,
    pub browse_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub value: Option<Variant>,
    pub status: StatusCode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodResult {
    pub status: StatusCode,
    pub outputs: Vec<Variant>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send + Sync {
    async fn browse(
        &self,
        id: &NodeId,
        direction: BrowseDirection,
    ) -> Result<Vec<ReferenceDescription>, SyncError>;

    async fn read_value(&self, id: &NodeId) -> Result<ReadResult, SyncError>;

    /// Data type and value rank attributes, used when a variable has no value.
    async fn read_type_info(&self, id: &NodeId) -> Result<(DataType, i32), SyncError>;

    async fn write_value(&self, id: &NodeId, value: &Variant) -> Result<StatusCode, SyncError>;

    async fn call_method(&self, id: &NodeId, args: Vec<Variant>)
        -> Result<MethodResult, SyncError>;

    async fn close(&self) -> Result<(), SyncError>;
}
