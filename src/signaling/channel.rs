//! Outbound half of a control connection.

use crate::error::ChannelError;
use crate::signaling::protocol::ServerMessage;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Where the hub sends messages for one client.
///
/// `send` never blocks. Delivery to one channel is independent of every
/// other channel; a failed send is reported to the caller and nothing else.
pub trait ClientChannel: Send + Sync {
    fn id(&self) -> Uuid;
    fn send(&self, message: &ServerMessage) -> Result<(), ChannelError>;
    fn close(&self);
}

/// Send `message` to every channel, logging the ones that are gone.
pub fn broadcast(channels: &[Arc<dyn ClientChannel>], message: &ServerMessage) {
    for channel in channels {
        if let Err(err) = channel.send(message) {
            debug!(connection = %channel.id(), error = %err, "Dropped outbound message");
        }
    }
}
