//! Platform client abstraction.
//!
//! Everything the relay needs from the messaging platform sits behind one
//! trait: entity resolution, per-channel new-message subscription, message
//! forwarding, and connection liveness/connect. Delivery-path failures are
//! reported as typed [`SendError`] signals so the delivery engine can branch
//! on rate limits, permission denials, and transient errors.

pub mod telegram;

pub use telegram::TelegramClient;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::ChannelEntity;
use crate::error::{ClientError, SendError};
use crate::message::Message;

/// A live per-channel subscription. Only events received after the
/// subscription was installed are delivered; there is no historical replay.
/// Dropping the receiver ends the subscription.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<Message>,
}

/// Collaborator surface consumed from the messaging platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Resolve a raw channel identifier (id, handle, or link) to an entity.
    async fn resolve(&self, raw: &str) -> Result<ChannelEntity, ClientError>;

    /// Subscribe to new messages on a channel, by canonical id.
    async fn subscribe(&self, channel_id: &str) -> Result<Subscription, ClientError>;

    /// Forward a message to the destination channel.
    async fn forward(&self, message: &Message, destination: &str) -> Result<(), SendError>;

    /// Connection liveness.
    async fn is_connected(&self) -> bool;

    /// Establish (or re-establish) the connection.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Tear the connection down.
    async fn disconnect(&self);
}
