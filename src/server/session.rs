//! Session lifetime
//!
//! A pooled scope hands out a long-lived handle that outlives the run. A per-run scope opens a
//! session through its connector and closes it when the run ends, whether it succeeded or not.

use super::Session;
use crate::error::SyncError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens new sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Session>, SyncError>;
}

#[derive(Clone)]
pub enum SessionScope {
    Pooled(Arc<dyn Session>),
    PerRun(Arc<dyn Connector>),
}

impl SessionScope {
    /// Closes a pooled session. Per-run scopes have nothing to shut down.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        match self {
            SessionScope::Pooled(session) => session.close().await,
            SessionScope::PerRun(_) => Ok(()),
        }
    }
}

/// Runs `action` with a session from `scope`.
pub async fn with_session<T, F, Fut>(scope: &SessionScope, action: F) -> Result<T, SyncError>
where
    F: FnOnce(Arc<dyn Session>) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    match scope {
        SessionScope::Pooled(session) => action(session.clone()).await,
        SessionScope::PerRun(connector) => {
            let session = connector.connect().await?;
            debug!("Session opened");
            let result = action(session.clone()).await;
            let closed = session.close().await;
            debug!("Session closed");
            match (result, closed) {
                (Ok(value), Ok(())) => Ok(value),
                (Ok(_), Err(close_error)) => Err(close_error),
                (Err(error), Ok(())) => Err(error),
                (Err(error), Err(close_error)) => {
                    warn!(error = %close_error, "Failed to close session after error");
                    Err(error)
                }
            }
        }
    }
}
