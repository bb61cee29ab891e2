//! SQLite-based mail storage
//!
//! One database file per local day. The file is shipped to the replica
//! as-is, so it stays in rollback-journal mode (no WAL side files).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::MailStore;
use crate::models::{
    AttachmentRef, EmailAddress, IngestedMessage, MessageId, join_addresses, split_addresses,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per ingested message, keyed by the mailbox message ID
            CREATE TABLE fund_mail (
                email_id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                sender_address TEXT NOT NULL,
                sender_name TEXT,
                from_address TEXT NOT NULL,
                from_name TEXT,
                to_recipients TEXT NOT NULL,
                cc_recipients TEXT NOT NULL,
                email_time TEXT NOT NULL,   -- UTC, RFC 3339
                local_time TEXT NOT NULL,   -- fixed local offset, RFC 3339
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_fund_mail_email_time ON fund_mail(email_time DESC);

            -- Attachment files written next to the database
            CREATE TABLE fund_mail_attach (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id TEXT NOT NULL,
                save_folder TEXT NOT NULL,
                file_name TEXT NOT NULL,
                UNIQUE (save_folder, file_name),
                FOREIGN KEY (email_id) REFERENCES fund_mail(email_id) ON DELETE CASCADE
            );

            CREATE INDEX idx_fund_mail_attach_email ON fund_mail_attach(email_id);
            "#,
        ),
    ])
}

/// SQLite-based mail storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and migrate it
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;
        Self::from_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        // synchronous = FULL: a committed cycle must survive power loss
        // before the checkpoint is advanced past it.
        // foreign_keys = ON: attachment rows can't outlive their message.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = DELETE;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Location of the database file (`None` for in-memory databases)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn insert_attachment_row(conn: &Connection, attachment: &AttachmentRef) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO fund_mail_attach (email_id, save_folder, file_name)
             VALUES (?, ?, ?)",
            params![
                attachment.parent_message_id.as_str(),
                attachment.storage_folder.to_string_lossy(),
                attachment.file_name,
            ],
        )
        .with_context(|| {
            format!(
                "Failed to insert attachment {} for message {}",
                attachment.file_name, attachment.parent_message_id
            )
        })?;
        Ok(())
    }

    fn load_attachments(conn: &Connection, message_id: &str) -> Result<Vec<AttachmentRef>> {
        let mut stmt = conn.prepare(
            "SELECT save_folder, file_name FROM fund_mail_attach
             WHERE email_id = ? ORDER BY id",
        )?;

        let rows = stmt
            .query_map([message_id], |row| {
                let folder: String = row.get(0)?;
                let file_name: String = row.get(1)?;
                Ok(AttachmentRef::new(
                    MessageId::new(message_id),
                    PathBuf::from(folder),
                    file_name,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn parse_time(raw: &str) -> Result<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).with_context(|| format!("Bad timestamp in database: {raw}"))
}

impl MailStore for SqliteMailStore {
    fn upsert_message(&self, message: &IngestedMessage) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO fund_mail
             (email_id, subject, sender_address, sender_name, from_address, from_name,
              to_recipients, cc_recipients, email_time, local_time, content)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                message.id.as_str(),
                message.subject,
                message.sender.email,
                message.sender.name,
                message.from.email,
                message.from.name,
                join_addresses(&message.to),
                join_addresses(&message.cc),
                message.received_at.to_rfc3339(),
                message.received_at_local.to_rfc3339(),
                message.body,
            ],
        )?;

        if inserted == 0 {
            // Already stored by an earlier cycle; leave its rows untouched
            return Ok(false);
        }

        for attachment in &message.attachments {
            Self::insert_attachment_row(&tx, attachment)?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn insert_attachment(&self, attachment: &AttachmentRef) -> Result<()> {
        let conn = self.lock()?;
        Self::insert_attachment_row(&conn, attachment)
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM fund_mail WHERE email_id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<IngestedMessage>> {
        let conn = self.lock()?;

        let row: Option<(
            String,
            String,
            Option<String>,
            String,
            Option<String>,
            String,
            String,
            String,
            String,
            String,
        )> = conn
            .query_row(
                "SELECT subject, sender_address, sender_name, from_address, from_name,
                        to_recipients, cc_recipients, email_time, local_time, content
                 FROM fund_mail WHERE email_id = ?",
                [id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            subject,
            sender_address,
            sender_name,
            from_address,
            from_name,
            to_recipients,
            cc_recipients,
            email_time,
            local_time,
            content,
        )) = row
        else {
            return Ok(None);
        };

        let received_at = parse_time(&email_time)?.with_timezone(&Utc);
        let received_at_local = parse_time(&local_time)?;
        let attachments = Self::load_attachments(&conn, id.as_str())?;

        Ok(Some(IngestedMessage {
            id: id.clone(),
            subject,
            sender: EmailAddress {
                name: sender_name,
                email: sender_address,
            },
            from: EmailAddress {
                name: from_name,
                email: from_address,
            },
            to: split_addresses(&to_recipients),
            cc: split_addresses(&cc_recipients),
            received_at,
            received_at_local,
            body: content,
            attachments,
        }))
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fund_mail", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_attachments(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM fund_mail_attach", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query_attachment_paths(&self) -> Result<Vec<(PathBuf, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT save_folder, file_name FROM fund_mail_attach ORDER BY id")?;

        let rows = stmt
            .query_map([], |row| {
                let folder: String = row.get(0)?;
                let file_name: String = row.get(1)?;
                Ok((PathBuf::from(folder), file_name))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_message(id: &str, attachments: &[&str]) -> IngestedMessage {
        IngestedMessage::builder(MessageId::new(id))
            .subject(format!("Subject {}", id))
            .sender(EmailAddress::with_name("Fund Desk", "desk@example.com"))
            .to(vec![
                EmailAddress::new("ops@example.com"),
                EmailAddress::new("risk@example.com"),
            ])
            .received_at(Utc.with_ymd_and_hms(2025, 6, 25, 4, 47, 45).unwrap())
            .body("<p>NAV attached</p>")
            .attachments(
                attachments
                    .iter()
                    .map(|name| AttachmentRef::new(MessageId::new(id), "/data/attach", *name))
                    .collect(),
            )
            .build()
    }

    #[test]
    fn test_round_trip_message() {
        let store = SqliteMailStore::in_memory().unwrap();
        let message = make_message("m1", &["nav.pdf"]);
        assert!(store.upsert_message(&message).unwrap());

        let loaded = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(loaded.subject, "Subject m1");
        assert_eq!(loaded.sender.name.as_deref(), Some("Fund Desk"));
        assert_eq!(loaded.to.len(), 2);
        assert_eq!(loaded.to[1].email, "risk@example.com");
        assert!(loaded.cc.is_empty());
        assert_eq!(loaded.received_at, message.received_at);
        assert_eq!(loaded.received_at_local.to_rfc3339(), "2025-06-25T13:47:45+09:00");
        assert_eq!(loaded.attachments, message.attachments);
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let store = SqliteMailStore::in_memory().unwrap();
        assert!(store.upsert_message(&make_message("m1", &["a.pdf"])).unwrap());
        assert!(!store.upsert_message(&make_message("m1", &["b.pdf"])).unwrap());

        assert_eq!(store.count_messages().unwrap(), 1);
        assert_eq!(store.count_attachments().unwrap(), 1);
        let paths = store.query_attachment_paths().unwrap();
        assert_eq!(paths, vec![(PathBuf::from("/data/attach"), "a.pdf".to_string())]);
    }

    #[test]
    fn test_orphan_attachment_rejected() {
        let store = SqliteMailStore::in_memory().unwrap();
        let orphan = AttachmentRef::new(MessageId::new("ghost"), "/data/attach", "x.pdf");
        assert!(store.insert_attachment(&orphan).is_err());
        assert_eq!(store.count_attachments().unwrap(), 0);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("2025_06_25").join("fm_2025_06_25.db");

        {
            let store = SqliteMailStore::new(&db_path).unwrap();
            store.upsert_message(&make_message("m1", &[])).unwrap();
            assert_eq!(store.path(), Some(db_path.as_path()));
        }

        let reopened = SqliteMailStore::new(&db_path).unwrap();
        assert!(reopened.has_message(&MessageId::new("m1")).unwrap());
        assert!(!reopened.has_message(&MessageId::new("m2")).unwrap());
    }
}
