use serde::{Deserialize, Serialize};

use crate::channel::derive_channel_id;

/// Text that replaces a message body once it has been deleted for everyone.
pub const TOMBSTONE_TEXT: &str = "🗑️ This message was deleted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub pin: String,
    pub display_name: String,
}

/// A 1:1 conversation. `members` is kept sorted so the pair is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_id: String,
    pub members: [String; 2],
}

impl Channel {
    pub fn between(pin_a: &str, pin_b: &str) -> Self {
        let mut members = [pin_a.to_string(), pin_b.to_string()];
        members.sort();
        Self {
            channel_id: derive_channel_id(pin_a, pin_b),
            members,
        }
    }
}

/// A stored direct message.
///
/// `from_display_name` is a snapshot taken at send time, so history keeps
/// showing the name the sender had when the message was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub from_pin: String,
    pub from_display_name: String,
    pub to_pin: String,
    pub text: String,
    pub sent_at_epoch_millis: i64,
    pub deleted_for_all: bool,
}
