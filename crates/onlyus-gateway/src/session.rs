use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use onlyus_db::Database;
use onlyus_types::events::{GatewayCommand, GatewayEvent};
use onlyus_types::models::{Channel, Message, TOMBSTONE_TEXT, User};
use onlyus_types::pin::is_valid_pin;

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::presence::ConnHandle;

/// Longest message body accepted, in characters, after trimming.
pub const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(User),
}

/// Per-connection protocol handler.
///
/// Starts `Unauthenticated`; `declare-identity` binds it to a PIN. Any number
/// of channels can be open at once, each `open-channel` adds one more
/// subscription. Every command runs to completion before the next one is
/// read from the same connection.
pub struct Session {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    conn: ConnHandle,
    state: SessionState,
}

impl Session {
    pub fn new(dispatcher: Dispatcher, db: Arc<Database>, conn: ConnHandle) -> Self {
        Self {
            dispatcher,
            db,
            conn,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn.conn_id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run one command. Failures are reported to this connection only.
    pub async fn handle(&mut self, cmd: GatewayCommand) {
        let result = match cmd {
            GatewayCommand::DeclareIdentity { pin } => self.declare_identity(pin).await,
            GatewayCommand::OpenChannel { my_pin, other_pin } => {
                self.open_channel(&my_pin, &other_pin).await
            }
            GatewayCommand::SendMessage {
                my_pin,
                other_pin,
                text,
            } => self.send_message(&my_pin, &other_pin, &text).await,
            GatewayCommand::DeleteMessage { my_pin, message_id } => {
                self.delete_message(&my_pin, &message_id).await
            }
            GatewayCommand::DeleteAllChats { my_pin } => self.delete_all_chats(&my_pin).await,
        };

        if let Err(err) = result {
            match &err {
                SessionError::Persistence(cause) => {
                    error!("Connection {}: store failure: {:#}", self.conn_id(), cause)
                }
                other => debug!("Connection {}: rejected: {}", self.conn_id(), other),
            }
            self.conn.send(GatewayEvent::failed(err.to_string()));
        }
    }

    /// Transport closed. Releases presence if this connection still owns it.
    pub async fn close(self) {
        if let SessionState::Authenticated(user) = &self.state {
            self.dispatcher.user_offline(&user.pin, self.conn_id()).await;
            info!("{} ({}) disconnected", user.display_name, user.pin);
        }
        self.dispatcher.unregister_connection(self.conn_id()).await;
    }

    async fn declare_identity(&mut self, pin: String) -> Result<(), SessionError> {
        let user = self.lookup_user(&pin).await?.ok_or(SessionError::InvalidPin)?;

        let switching_from = match &self.state {
            SessionState::Authenticated(previous) if previous.pin != user.pin => {
                Some(previous.pin.clone())
            }
            _ => None,
        };
        if let Some(previous) = switching_from {
            info!(
                "Connection {} switching identity {} -> {}",
                self.conn_id(),
                previous,
                user.pin
            );
            self.dispatcher.user_offline(&previous, self.conn_id()).await;
            // The old PIN's conversations are not the new PIN's to read
            self.dispatcher.clear_subscriptions(self.conn_id()).await;
        }

        // Who was already here before our own online event goes out
        let already_online = self.dispatcher.presence().online_pins().await;

        // Register before replying so follow-up commands see this PIN online
        self.dispatcher.user_online(&user.pin, self.conn.clone()).await;
        info!(
            "{} ({}) online on connection {}",
            user.display_name,
            user.pin,
            self.conn_id()
        );

        self.conn.send(GatewayEvent::IdentityAccepted {
            pin: user.pin.clone(),
            display_name: user.display_name.clone(),
        });
        for pin in already_online.into_iter().filter(|p| *p != user.pin) {
            self.conn.send(GatewayEvent::PresenceChanged { pin, online: true });
        }

        self.state = SessionState::Authenticated(user);
        Ok(())
    }

    async fn open_channel(&self, my_pin: &str, other_pin: &str) -> Result<(), SessionError> {
        let me = self.require_identity(my_pin)?;
        if !is_valid_pin(other_pin) {
            return Err(SessionError::InvalidPin);
        }

        let channel = Channel::between(&me.pin, other_pin);
        let channel_id = channel.channel_id.clone();

        let other_pin = other_pin.to_string();
        let other = self
            .blocking(move |db| {
                let Some(other) = db.get_user_by_pin(&other_pin)? else {
                    return Ok(None);
                };
                db.create_channel_if_absent(&channel)?;
                Ok(Some(User::from(other)))
            })
            .await?
            .ok_or(SessionError::InvalidPin)?;

        // Subscribe before reading history so nothing posted in between is missed
        self.dispatcher
            .subscribe_channel(self.conn_id(), &channel_id)
            .await;

        let cid = channel_id.clone();
        let messages: Vec<Message> = self
            .blocking(move |db| {
                let rows = db.list_messages(&cid)?;
                Ok(rows.into_iter().map(Message::from).collect())
            })
            .await?;

        debug!(
            "{} opened {} ({} messages)",
            me.pin,
            channel_id,
            messages.len()
        );

        let online = self.dispatcher.presence().is_online(&other.pin).await;
        self.conn.send(GatewayEvent::ChannelHistory {
            channel_id,
            messages,
        });
        self.conn.send(GatewayEvent::ChannelMeta {
            other_user: other,
            online,
        });
        Ok(())
    }

    async fn send_message(
        &self,
        my_pin: &str,
        other_pin: &str,
        text: &str,
    ) -> Result<(), SessionError> {
        let me = self.require_identity(my_pin)?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(SessionError::MessageTooLong);
        }
        if !is_valid_pin(other_pin) {
            return Err(SessionError::InvalidPin);
        }

        let channel = Channel::between(&me.pin, other_pin);
        let channel_id = channel.channel_id.clone();
        let msg = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.clone(),
            from_pin: me.pin.clone(),
            from_display_name: me.display_name.clone(),
            to_pin: other_pin.to_string(),
            text: text.to_string(),
            sent_at_epoch_millis: chrono::Utc::now().timestamp_millis(),
            deleted_for_all: false,
        };

        let msg = self
            .blocking(move |db| {
                if db.get_user_by_pin(&msg.to_pin)?.is_none() {
                    return Ok(None);
                }
                // The sender may never have opened this channel
                db.create_channel_if_absent(&channel)?;
                db.append_message(&msg)?;
                Ok(Some(msg))
            })
            .await?
            .ok_or(SessionError::InvalidPin)?;

        debug!("{} -> {} in {} ({})", msg.from_pin, msg.to_pin, channel_id, msg.id);

        let notify = GatewayEvent::DirectNotify {
            from_pin: msg.from_pin.clone(),
            from_display_name: msg.from_display_name.clone(),
            text: msg.text.clone(),
        };
        let to_pin = msg.to_pin.clone();

        self.dispatcher
            .broadcast_to_channel(&channel_id, &GatewayEvent::MessagePosted(msg))
            .await;
        self.dispatcher
            .notify_pin_unless_subscribed(&to_pin, &channel_id, notify)
            .await;
        Ok(())
    }

    async fn delete_message(&self, my_pin: &str, message_id: &str) -> Result<(), SessionError> {
        let me = self.require_identity(my_pin)?;

        let (owner, id) = (me.pin.clone(), message_id.to_string());
        let deleted = self
            .blocking(move |db| {
                let Some(row) = db.find_message_by_id(&id)? else {
                    return Ok(None);
                };
                if row.from_pin != owner {
                    return Ok(None);
                }
                if !row.deleted_for_all {
                    db.mark_message_deleted(&row.id, TOMBSTONE_TEXT)?;
                }
                Ok(Some(row.channel_id))
            })
            .await?;

        // Missing and not-yours look the same to the caller
        let Some(channel_id) = deleted else {
            debug!("{} delete of {} ignored", me.pin, message_id);
            return Ok(());
        };

        debug!("{} deleted {} in {}", me.pin, message_id, channel_id);
        self.dispatcher
            .broadcast_to_channel(
                &channel_id,
                &GatewayEvent::MessageUpdated {
                    message_id: message_id.to_string(),
                    new_text: TOMBSTONE_TEXT.to_string(),
                },
            )
            .await;
        Ok(())
    }

    async fn delete_all_chats(&self, my_pin: &str) -> Result<(), SessionError> {
        let me = self.require_identity(my_pin)?;

        let pin = me.pin.clone();
        let purged = self.blocking(move |db| db.purge_channels_for(&pin)).await?;

        info!("{} deleted all chats ({} channels)", me.pin, purged.len());
        for channel in &purged {
            debug!("{} purged {}", me.pin, channel.channel_id);
        }
        self.conn.send(GatewayEvent::AllChatsDeleted {});
        Ok(())
    }

    fn require_identity(&self, my_pin: &str) -> Result<&User, SessionError> {
        match &self.state {
            SessionState::Unauthenticated => Err(SessionError::NotIdentified),
            SessionState::Authenticated(user) if user.pin == my_pin => Ok(user),
            SessionState::Authenticated(_) => Err(SessionError::PinMismatch),
        }
    }

    async fn lookup_user(&self, pin: &str) -> Result<Option<User>, SessionError> {
        if !is_valid_pin(pin) {
            return Ok(None);
        }
        let pin = pin.to_string();
        self.blocking(move |db| Ok(db.get_user_by_pin(&pin)?.map(User::from)))
            .await
    }

    /// Run blocking store work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| SessionError::Persistence(anyhow::anyhow!("blocking task failed: {}", e)))?
            .map_err(SessionError::Persistence)
    }
}
