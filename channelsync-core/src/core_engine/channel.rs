/*
    channel.rs - Pub/sub channel seam

    The engine does not own a network stack. It talks to the realtime
    channel through this trait: publishing outgoing object messages and
    inspecting the channel's state, modes, and negotiated limits. Production
    code implements it over a realtime client; tests implement it over an
    in-memory mock.
*/

use crate::core_engine::errors::ObjectsResult;
use crate::core_protocol::message::ObjectMessage;
use async_trait::async_trait;
use std::fmt;

/// Lifecycle states of the underlying channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
    /// States in which object messages may be published
    pub fn can_publish(&self) -> bool {
        matches!(
            self,
            ChannelState::Initialized | ChannelState::Attaching | ChannelState::Attached
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Initialized => "initialized",
            ChannelState::Attaching => "attaching",
            ChannelState::Attached => "attached",
            ChannelState::Detached => "detached",
            ChannelState::Suspended => "suspended",
            ChannelState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Channel modes negotiated on attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Receive object messages and sync sequences
    ObjectSubscribe,
    /// Publish object messages
    ObjectPublish,
}

/// The engine's view of the realtime channel
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Current channel state
    fn state(&self) -> ChannelState;

    /// Modes negotiated for this channel; empty before attach
    fn modes(&self) -> Vec<ChannelMode>;

    /// Maximum serialized message size accepted by the server, if the
    /// connection has negotiated one
    fn max_message_size(&self) -> Option<usize>;

    /// Whether published messages are echoed back to this connection
    fn echo_enabled(&self) -> bool;

    /// Client identity attached to published messages
    fn client_id(&self) -> Option<String>;

    /// Connection identity attached to published messages
    fn connection_id(&self) -> Option<String>;

    /// Publish a batch of object messages to the channel
    async fn publish(&self, messages: Vec<ObjectMessage>) -> ObjectsResult<()>;
}
