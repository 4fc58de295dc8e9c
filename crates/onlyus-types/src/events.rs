use serde::{Deserialize, Serialize};

use crate::models::{Message, User};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// The connection now speaks for `pin`
    IdentityAccepted { pin: String, display_name: String },

    /// Full ordered history, reply to open-channel
    ChannelHistory {
        channel_id: String,
        messages: Vec<Message>,
    },

    /// Who is on the other end, reply to open-channel
    ChannelMeta { other_user: User, online: bool },

    /// A new message was stored in a channel
    MessagePosted(Message),

    /// Toast for a recipient that has not opened the channel
    DirectNotify {
        from_pin: String,
        from_display_name: String,
        text: String,
    },

    /// A message body changed (deleted for everyone)
    MessageUpdated { message_id: String, new_text: String },

    /// Reply to delete-all-chats
    AllChatsDeleted {},

    /// A PIN came online or went offline
    PresenceChanged { pin: String, online: bool },

    /// Something the caller asked for did not happen
    OperationFailed { message: String },
}

impl GatewayEvent {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::OperationFailed {
            message: message.into(),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Bind this connection to a PIN and mark it online
    DeclareIdentity { pin: String },

    /// Subscribe to the 1:1 channel with `other_pin` and fetch its history
    OpenChannel { my_pin: String, other_pin: String },

    SendMessage {
        my_pin: String,
        other_pin: String,
        text: String,
    },

    /// Only the original sender may delete; anything else is ignored
    DeleteMessage { my_pin: String, message_id: String },

    /// Erase every channel `my_pin` belongs to, for both members
    DeleteAllChats { my_pin: String },
}
