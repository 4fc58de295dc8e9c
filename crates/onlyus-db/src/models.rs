//! Database row types. Distinct from onlyus-types models to keep the DB
//! layer independent of the wire format.
use onlyus_types::models::{Channel, Message, User};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub pin: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: String,
    pub member_a: String,
    pub member_b: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub channel_id: String,
    pub from_pin: String,
    pub from_display_name: String,
    pub to_pin: String,
    pub text: String,
    pub sent_at: i64,
    pub deleted_for_all: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            pin: row.pin,
            display_name: row.display_name,
        }
    }
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Self {
            channel_id: row.id,
            members: [row.member_a, row.member_b],
        }
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            channel_id: row.channel_id,
            from_pin: row.from_pin,
            from_display_name: row.from_display_name,
            to_pin: row.to_pin,
            text: row.text,
            sent_at_epoch_millis: row.sent_at,
            deleted_for_all: row.deleted_for_all,
        }
    }
}
