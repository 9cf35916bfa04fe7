use crate::types::RequestId;
use tokio::sync::{Mutex, MutexGuard};

/// Serializes work on the same [RequestId] while letting unrelated requests proceed.
///
/// Requests are spread across a fixed number of shards, so two requests can share a shard
/// and wait on each other. The table never grows.
pub(super) struct Locks {
    shards: Vec<Mutex<()>>,
}

impl Locks {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, request_id: &RequestId) -> MutexGuard<'_, ()> {
        self.shards[request_id.shard(self.shards.len())].lock().await
    }
}
