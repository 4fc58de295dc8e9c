use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, channels, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                pin           TEXT PRIMARY KEY,
                display_name  TEXT NOT NULL,
                created_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- member_a <= member_b, id is derived from the pair
            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                member_a    TEXT NOT NULL,
                member_b    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_channels_member_a ON channels(member_a);
            CREATE INDEX idx_channels_member_b ON channels(member_b);

            CREATE TABLE messages (
                seq                INTEGER PRIMARY KEY AUTOINCREMENT,
                id                 TEXT NOT NULL UNIQUE,
                channel_id         TEXT NOT NULL,
                from_pin           TEXT NOT NULL,
                from_display_name  TEXT NOT NULL,
                to_pin             TEXT NOT NULL,
                text               TEXT NOT NULL,
                sent_at            INTEGER NOT NULL,
                deleted_for_all    INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, sent_at, seq);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
