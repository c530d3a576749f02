use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::warn;
use uuid::Uuid;

use terminal_types::models::{Notification, NotificationKind, Settings};
use terminal_types::records::Record;

use crate::models::UserRow;
use crate::{Database, format_timestamp, parse_timestamp};

impl Database {
    // -- Users --

    /// Returns false when the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, format_timestamp(Utc::now())),
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Replace a user's password hash and drop their sessions.
    /// Returns false when the user does not exist.
    pub fn set_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let user_id: Option<String> = tx
                .query_row("SELECT id FROM users WHERE username = ?1", [username], |row| row.get(0))
                .optional()?;
            let Some(user_id) = user_id else {
                return Ok(false);
            };
            tx.execute("UPDATE users SET password = ?1 WHERE id = ?2", (password_hash, &user_id))?;
            tx.execute("DELETE FROM sessions WHERE user_id = ?1", [&user_id])?;
            tx.commit()?;
            Ok(true)
        })
    }

    // -- Sessions --

    pub fn create_session(&self, token_hash: &str, user_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                (token_hash, user_id, format_timestamp(Utc::now()), format_timestamp(expires_at)),
            )?;
            Ok(())
        })
    }

    /// Resolve a live session to its full user row. Expired sessions resolve
    /// to `None` even before the cleanup loop removes them.
    pub fn get_session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.username, u.password, u.created_at
                     FROM sessions s
                     JOIN users u ON u.id = s.user_id
                     WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                    (token_hash, format_timestamp(now)),
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
            Ok(n > 0)
        })
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                [format_timestamp(now)],
            )?;
            Ok(n)
        })
    }

    // -- Records --

    pub fn list_records<R: Record>(&self, user_id: &str) -> Result<Vec<R>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, data FROM records WHERE user_id = ?1 AND collection = ?2",
            )?;
            let rows = stmt
                .query_map((user_id, R::COLLECTION), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let records = rows
                .into_iter()
                .filter_map(|(id, data)| match serde_json::from_str::<R>(&data) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Skipping corrupt {} record '{}': {}", R::COLLECTION, id, e);
                        None
                    }
                })
                .collect();
            Ok(records)
        })
    }

    pub fn get_record<R: Record>(&self, user_id: &str, id: Uuid) -> Result<Option<R>> {
        self.with_conn(|conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM records WHERE collection = ?1 AND id = ?2 AND user_id = ?3",
                    (R::COLLECTION, id.to_string(), user_id),
                    |row| row.get(0),
                )
                .optional()?;
            data.map(|d| serde_json::from_str(&d).map_err(Into::into)).transpose()
        })
    }

    /// Insert or replace a record. Ownership of an existing id never changes:
    /// a conflicting row owned by someone else is left untouched.
    pub fn save_record<R: Record>(&self, user_id: &str, record: &R) -> Result<bool> {
        let data = serde_json::to_string(record)?;
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO records (collection, id, user_id, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(collection, id) DO UPDATE
                    SET data = excluded.data, updated_at = excluded.updated_at
                    WHERE records.user_id = excluded.user_id",
                params![R::COLLECTION, record.id().to_string(), user_id, data, now],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_record<R: Record>(&self, user_id: &str, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2 AND user_id = ?3",
                (R::COLLECTION, id.to_string(), user_id),
            )?;
            Ok(n > 0)
        })
    }

    // -- Settings --

    pub fn get_settings(&self, user_id: &str) -> Result<Option<Settings>> {
        self.with_conn(|conn| {
            let data: Option<String> = conn
                .query_row("SELECT data FROM settings WHERE user_id = ?1", [user_id], |row| row.get(0))
                .optional()?;
            data.map(|d| serde_json::from_str(&d).map_err(Into::into)).transpose()
        })
    }

    pub fn put_settings(&self, user_id: &str, settings: &Settings) -> Result<()> {
        let data = serde_json::to_string(settings)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (user_id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                (user_id, data, format_timestamp(Utc::now())),
            )?;
            Ok(())
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, user_id: &str, n: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, title, message, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    n.id.to_string(),
                    user_id,
                    n.kind.as_str(),
                    n.title,
                    n.message,
                    n.read,
                    format_timestamp(n.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.with_conn(|conn| query_notifications(conn, user_id))
    }

    pub fn unread_notifications(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    pub fn mark_notification_read(&self, user_id: &str, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                (id.to_string(), user_id),
            )?;
            Ok(n > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(n)
        })
    }

    pub fn delete_notification(&self, user_id: &str, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                (id.to_string(), user_id),
            )?;
            Ok(n > 0)
        })
    }

    pub fn clear_notifications(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM notifications WHERE user_id = ?1", [user_id])?;
            Ok(n)
        })
    }

    // -- Chat --

    /// Serialized chat tabs for a user, as last persisted.
    pub fn load_chat_state(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let data = conn
                .query_row("SELECT data FROM chat_state WHERE user_id = ?1", [user_id], |row| row.get(0))
                .optional()?;
            Ok(data)
        })
    }

    pub fn save_chat_state(&self, user_id: &str, data: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_state (user_id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                (user_id, data, format_timestamp(Utc::now())),
            )?;
            Ok(())
        })
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = match column {
        "id" => "SELECT id, username, password, created_at FROM users WHERE id = ?1",
        _ => "SELECT id, username, password, created_at FROM users WHERE username = ?1",
    };
    let row = conn.query_row(sql, [value], user_from_row).optional()?;
    Ok(row)
}

fn query_notifications(conn: &Connection, user_id: &str) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, title, message, read, created_at
         FROM notifications
         WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC",
    )?;

    let rows = stmt
        .query_map([user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let notifications = rows
        .into_iter()
        .filter_map(|(id, kind, title, message, read, created_at)| {
            let parsed = (|| {
                Some(Notification {
                    id: id.parse().ok()?,
                    kind: NotificationKind::parse(&kind)?,
                    title,
                    message,
                    read,
                    created_at: parse_timestamp(&created_at).ok()?,
                })
            })();
            if parsed.is_none() {
                warn!("Skipping corrupt notification '{}'", id);
            }
            parsed
        })
        .collect();

    Ok(notifications)
}
