//! Repository seams between the domain and the control-plane API.
//!
//! The scheduler and commands work against these traits; the HTTP-backed
//! implementations live elsewhere, and tests supply in-memory fakes.
//! Dropping the returned future cancels an in-flight call.

use crate::server::Server;
use crate::task::{GDTask, GDTaskStatus};
use async_trait::async_trait;
use gameapd_common::Result;
use std::sync::Arc;

/// Access to the servers managed by this node.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Ids of every server assigned to this node.
    async fn ids(&self) -> Result<Vec<i64>>;

    /// Load one server. `None` means the control plane does not know it.
    async fn find_by_id(&self, id: i64) -> Result<Option<Arc<Server>>>;

    /// Record the server's current state for upload. Must not block on the
    /// network.
    async fn save(&self, server: &Arc<Server>) -> Result<()>;
}

/// Access to the daemon task feed.
#[async_trait]
pub trait GDTaskRepository: Send + Sync {
    async fn find_by_status(&self, status: GDTaskStatus) -> Result<Vec<Arc<GDTask>>>;

    /// Persist the task's current status.
    async fn save(&self, task: &Arc<GDTask>) -> Result<()>;

    /// Persist a chunk of task output.
    async fn append_output(&self, task: &Arc<GDTask>, output: &[u8]) -> Result<()>;
}
