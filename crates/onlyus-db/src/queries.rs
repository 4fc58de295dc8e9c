use crate::error::{DbError, MAX_DISPLAY_NAME_LEN};
use crate::models::{ChannelRow, MessageRow, UserRow};
use crate::Database;
use anyhow::Result;
use onlyus_types::models::{Channel, Message};
use onlyus_types::pin::generate_pin;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

impl Database {
    // -- Users --

    /// Create a user under a fresh random PIN.
    pub fn create_user(&self, display_name: &str) -> Result<UserRow> {
        self.create_user_with(display_name, generate_pin)
    }

    /// Create a user, drawing candidate PINs from `next_pin` until one is
    /// free. The `UNIQUE` key on `pin` decides collisions.
    pub fn create_user_with<F>(&self, display_name: &str, mut next_pin: F) -> Result<UserRow>
    where
        F: FnMut() -> String,
    {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(DbError::EmptyDisplayName.into());
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(DbError::DisplayNameTooLong.into());
        }

        self.with_conn(|conn| {
            loop {
                let pin = next_pin();
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO users (pin, display_name) VALUES (?1, ?2)",
                    (&pin, display_name),
                )?;
                if inserted == 1 {
                    info!("Created user {} ({})", display_name, pin);
                    return Ok(UserRow {
                        pin,
                        display_name: display_name.to_string(),
                    });
                }
                debug!("PIN {} already taken, drawing another", pin);
            }
        })
    }

    pub fn get_user_by_pin(&self, pin: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT pin, display_name FROM users WHERE pin = ?1",
                    [pin],
                    |row| {
                        Ok(UserRow {
                            pin: row.get(0)?,
                            display_name: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Channels --

    /// Insert the channel unless it already exists. Returns `true` if this
    /// call created it.
    pub fn create_channel_if_absent(&self, channel: &Channel) -> Result<bool> {
        let [member_a, member_b] = &channel.members;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channels (id, member_a, member_b) VALUES (?1, ?2, ?3)",
                (&channel.channel_id, member_a, member_b),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, member_a, member_b FROM channels WHERE id = ?1",
                    [channel_id],
                    channel_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_channels_containing(&self, pin: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| query_channels_containing(conn, pin))
    }

    pub fn delete_channels(&self, channel_ids: &[String]) -> Result<usize> {
        self.with_conn(|conn| delete_where_in(conn, "channels", "id", channel_ids))
    }

    /// Remove every channel `pin` belongs to together with its messages, in
    /// one transaction. Returns the removed channels.
    pub fn purge_channels_for(&self, pin: &str) -> Result<Vec<Channel>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let channels: Vec<Channel> = query_channels_containing(&tx, pin)?
                .into_iter()
                .map(Channel::from)
                .collect();
            let ids: Vec<String> = channels.iter().map(|c| c.channel_id.clone()).collect();
            let messages = delete_where_in(&tx, "messages", "channel_id", &ids)?;
            delete_where_in(&tx, "channels", "id", &ids)?;
            tx.commit()?;

            info!(
                "Purged {} channels ({} messages) for {}",
                channels.len(),
                messages,
                pin
            );
            Ok(channels)
        })
    }

    // -- Messages --

    pub fn append_message(&self, msg: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, channel_id, from_pin, from_display_name, to_pin, text,
                     sent_at, deleted_for_all)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id,
                    msg.channel_id,
                    msg.from_pin,
                    msg.from_display_name,
                    msg.to_pin,
                    msg.text,
                    msg.sent_at_epoch_millis,
                    msg.deleted_for_all,
                ],
            )?;
            Ok(())
        })
    }

    /// Full history of a channel, oldest first. Insertion order breaks
    /// timestamp ties.
    pub fn list_messages(&self, channel_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE channel_id = ?1
                 ORDER BY sent_at ASC, seq ASC"
            ))?;
            let rows = stmt
                .query_map([channel_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn find_message_by_id(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    [id],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Flip `deleted_for_all` and overwrite the text. Only touches rows that
    /// are not deleted yet, so the transition is one-way. Returns `true` if
    /// a row changed.
    pub fn mark_message_deleted(&self, id: &str, tombstone: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET deleted_for_all = 1, text = ?2
                 WHERE id = ?1 AND deleted_for_all = 0",
                (id, tombstone),
            )?;
            Ok(changed == 1)
        })
    }

    pub fn delete_messages(&self, channel_ids: &[String]) -> Result<usize> {
        self.with_conn(|conn| delete_where_in(conn, "messages", "channel_id", channel_ids))
    }
}

const MESSAGE_COLUMNS: &str =
    "seq, id, channel_id, from_pin, from_display_name, to_pin, text, sent_at, deleted_for_all";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        channel_id: row.get(2)?,
        from_pin: row.get(3)?,
        from_display_name: row.get(4)?,
        to_pin: row.get(5)?,
        text: row.get(6)?,
        sent_at: row.get(7)?,
        deleted_for_all: row.get(8)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        member_a: row.get(1)?,
        member_b: row.get(2)?,
    })
}

fn query_channels_containing(conn: &Connection, pin: &str) -> Result<Vec<ChannelRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, member_a, member_b FROM channels
         WHERE member_a = ?1 OR member_b = ?1
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([pin], channel_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// `DELETE FROM {table} WHERE {column} IN (...)`. Table and column names are
/// internal constants, never user input.
fn delete_where_in(
    conn: &Connection,
    table: &str,
    column: &str,
    values: &[String],
) -> Result<usize> {
    if values.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        table,
        column,
        placeholders.join(", ")
    );
    let removed = conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use onlyus_types::channel::derive_channel_id;
    use onlyus_types::models::TOMBSTONE_TEXT;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn message(id: &str, from: &str, to: &str, sent_at: i64) -> Message {
        Message {
            id: id.to_string(),
            channel_id: derive_channel_id(from, to),
            from_pin: from.to_string(),
            from_display_name: format!("user {from}"),
            to_pin: to.to_string(),
            text: format!("text {id}"),
            sent_at_epoch_millis: sent_at,
            deleted_for_all: false,
        }
    }

    fn open(db: &Database, a: &str, b: &str) -> String {
        let channel = Channel::between(a, b);
        db.create_channel_if_absent(&channel).unwrap();
        channel.channel_id
    }

    #[test]
    fn create_user_trims_and_validates() {
        let db = setup();
        let user = db.create_user("  Ana  ").unwrap();
        assert_eq!(user.display_name, "Ana");
        assert_eq!(user.pin.len(), 6);

        let fetched = db.get_user_by_pin(&user.pin).unwrap().unwrap();
        assert_eq!(fetched.display_name, "Ana");

        let err = db.create_user("   ").unwrap_err();
        assert_eq!(err.downcast_ref::<DbError>(), Some(&DbError::EmptyDisplayName));

        let err = db.create_user(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1)).unwrap_err();
        assert_eq!(err.downcast_ref::<DbError>(), Some(&DbError::DisplayNameTooLong));
    }

    #[test]
    fn create_user_retries_on_pin_collision() {
        let db = setup();
        let first = db.create_user_with("Ana", || "111111".to_string()).unwrap();
        assert_eq!(first.pin, "111111");

        let mut candidates = vec!["222222", "111111", "111111"];
        let second = db
            .create_user_with("Ben", || candidates.pop().unwrap().to_string())
            .unwrap();
        assert_eq!(second.pin, "222222");
        assert_eq!(db.get_user_by_pin("111111").unwrap().unwrap().display_name, "Ana");
    }

    #[test]
    fn unknown_pin_is_none() {
        let db = setup();
        assert!(db.get_user_by_pin("123456").unwrap().is_none());
    }

    #[test]
    fn channel_creation_is_idempotent() {
        let db = setup();
        let first = Channel::between("222222", "111111");
        let second = Channel::between("111111", "222222");
        assert!(db.create_channel_if_absent(&first).unwrap());
        assert!(!db.create_channel_if_absent(&second).unwrap());

        let channels = db.list_channels_containing("111111").unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].member_a, "111111");
        assert_eq!(channels[0].member_b, "222222");
    }

    #[test]
    fn history_is_ordered_with_stable_ties() {
        let db = setup();
        let channel = open(&db, "111111", "222222");

        db.append_message(&message("c", "111111", "222222", 30)).unwrap();
        db.append_message(&message("a", "222222", "111111", 10)).unwrap();
        db.append_message(&message("b1", "111111", "222222", 20)).unwrap();
        db.append_message(&message("b2", "222222", "111111", 20)).unwrap();

        let ids: Vec<String> = db
            .list_messages(&channel)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["a", "b1", "b2", "c"]);
    }

    #[test]
    fn mark_deleted_is_one_way() {
        let db = setup();
        open(&db, "111111", "222222");
        db.append_message(&message("m1", "111111", "222222", 1)).unwrap();

        assert!(db.mark_message_deleted("m1", TOMBSTONE_TEXT).unwrap());
        assert!(!db.mark_message_deleted("m1", "something else").unwrap());
        assert!(!db.mark_message_deleted("missing", TOMBSTONE_TEXT).unwrap());

        let row = db.find_message_by_id("m1").unwrap().unwrap();
        assert!(row.deleted_for_all);
        assert_eq!(row.text, TOMBSTONE_TEXT);
    }

    #[test]
    fn purge_only_touches_member_channels() {
        let db = setup();
        let ab = open(&db, "111111", "222222");
        let ac = open(&db, "333333", "111111");
        let bc = open(&db, "222222", "333333");

        db.append_message(&message("ab", "111111", "222222", 1)).unwrap();
        db.append_message(&message("ac", "333333", "111111", 2)).unwrap();
        db.append_message(&message("bc", "222222", "333333", 3)).unwrap();

        let mut purged: Vec<String> = db
            .purge_channels_for("111111")
            .unwrap()
            .into_iter()
            .map(|c| c.channel_id)
            .collect();
        purged.sort();
        let mut expected = vec![ab.clone(), ac.clone()];
        expected.sort();
        assert_eq!(purged, expected);

        assert!(db.get_channel(&ab).unwrap().is_none());
        assert!(db.get_channel(&ac).unwrap().is_none());
        assert!(db.list_messages(&ab).unwrap().is_empty());
        assert!(db.list_messages(&ac).unwrap().is_empty());

        assert!(db.get_channel(&bc).unwrap().is_some());
        assert_eq!(db.list_messages(&bc).unwrap().len(), 1);
    }

    #[test]
    fn bulk_deletes_accept_empty_input() {
        let db = setup();
        assert_eq!(db.delete_messages(&[]).unwrap(), 0);
        assert_eq!(db.delete_channels(&[]).unwrap(), 0);
    }
}
