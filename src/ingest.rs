//! Event ingestion — per-channel listener bindings.
//!
//! One listener per configured source channel, bound to the active account's
//! connection. Listener tasks drain their subscription into the service's
//! central event queue. Rebinding during rotation removes the old binding
//! before installing the new one, so there is never a window with two live
//! bindings for the same channel. The converse window (no binding at all)
//! exists briefly during rotation; events arriving then are not observed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::ChannelEntity;
use crate::error::ClientError;
use crate::message::Message;
use crate::platform::PlatformClient;

/// Registry of live listener bindings, keyed by canonical channel id.
pub struct ListenerRegistry {
    bindings: HashMap<String, JoinHandle<()>>,
    events_tx: mpsc::Sender<Message>,
}

impl ListenerRegistry {
    pub fn new(events_tx: mpsc::Sender<Message>) -> Self {
        Self {
            bindings: HashMap::new(),
            events_tx,
        }
    }

    /// Bind a listener for one channel on the given client. An existing
    /// binding for the channel is removed first.
    pub async fn bind(
        &mut self,
        client: &Arc<dyn PlatformClient>,
        channel: &ChannelEntity,
    ) -> Result<(), ClientError> {
        self.unbind(&channel.canonical_id);

        let mut subscription = client.subscribe(&channel.canonical_id).await?;
        let events_tx = self.events_tx.clone();
        let channel_id = channel.canonical_id.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = subscription.events.recv().await {
                if events_tx.send(message).await.is_err() {
                    debug!(channel = %channel_id, "Event queue closed, listener exiting");
                    return;
                }
            }
        });

        info!(
            channel = %channel.display_name,
            id = %channel.canonical_id,
            "Listener bound"
        );
        self.bindings.insert(channel.canonical_id.clone(), handle);
        Ok(())
    }

    /// Bind listeners for every channel. Stops at the first failure.
    pub async fn bind_all(
        &mut self,
        client: &Arc<dyn PlatformClient>,
        channels: &[ChannelEntity],
    ) -> Result<(), ClientError> {
        for channel in channels {
            self.bind(client, channel).await?;
        }
        Ok(())
    }

    /// Remove one binding, aborting its listener task.
    pub fn unbind(&mut self, channel_id: &str) -> bool {
        if let Some(handle) = self.bindings.remove(channel_id) {
            handle.abort();
            debug!(channel = %channel_id, "Listener unbound");
            true
        } else {
            false
        }
    }

    /// Remove every binding. Used at rotation and at shutdown.
    pub fn unbind_all(&mut self) {
        for (channel_id, handle) in self.bindings.drain() {
            handle.abort();
            debug!(channel = %channel_id, "Listener unbound");
        }
    }

    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_bound(&self, channel_id: &str) -> bool {
        self.bindings.contains_key(channel_id)
    }
}

impl Drop for ListenerRegistry {
    fn drop(&mut self) {
        self.unbind_all();
    }
}
