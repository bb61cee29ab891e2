//! In-memory storage implementation
//!
//! Used by tests and dry runs. Mirrors the SQLite semantics: messages are
//! insert-or-ignore and attachment rows require a stored parent.

use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::MailStore;
use crate::models::{AttachmentRef, IngestedMessage, MessageId};

#[derive(Default)]
struct Tables {
    /// Messages keyed by ID, stored without their attachment list
    messages: HashMap<String, IngestedMessage>,
    /// Attachment rows in insertion order
    attachments: Vec<AttachmentRef>,
}

/// In-memory implementation of MailStore
pub struct InMemoryMailStore {
    tables: RwLock<Tables>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_message(&self, message: &IngestedMessage) -> Result<bool> {
        let mut tables = self.write()?;
        if tables.messages.contains_key(message.id.as_str()) {
            return Ok(false);
        }

        let mut row = message.clone();
        let attachments = std::mem::take(&mut row.attachments);
        tables.messages.insert(message.id.0.clone(), row);
        tables.attachments.extend(attachments);
        Ok(true)
    }

    fn insert_attachment(&self, attachment: &AttachmentRef) -> Result<()> {
        let mut tables = self.write()?;
        if !tables
            .messages
            .contains_key(attachment.parent_message_id.as_str())
        {
            bail!(
                "attachment {} references unknown message {}",
                attachment.file_name,
                attachment.parent_message_id
            );
        }
        tables.attachments.push(attachment.clone());
        Ok(())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.messages.contains_key(id.as_str()))
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<IngestedMessage>> {
        let tables = self.read()?;
        let Some(message) = tables.messages.get(id.as_str()) else {
            return Ok(None);
        };

        let mut message = message.clone();
        message.attachments = tables
            .attachments
            .iter()
            .filter(|a| &a.parent_message_id == id)
            .cloned()
            .collect();
        Ok(Some(message))
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(self.read()?.messages.len())
    }

    fn count_attachments(&self) -> Result<usize> {
        Ok(self.read()?.attachments.len())
    }

    fn query_attachment_paths(&self) -> Result<Vec<(PathBuf, String)>> {
        Ok(self
            .read()?
            .attachments
            .iter()
            .map(|a| (a.storage_folder.clone(), a.file_name.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;

    fn make_message(id: &str, attachments: &[&str]) -> IngestedMessage {
        IngestedMessage::builder(MessageId::new(id))
            .sender(EmailAddress::new("desk@example.com"))
            .subject(format!("Subject {}", id))
            .attachments(
                attachments
                    .iter()
                    .map(|name| AttachmentRef::new(MessageId::new(id), "/tmp/attach", *name))
                    .collect(),
            )
            .build()
    }

    #[test]
    fn test_insert_or_ignore() {
        let store = InMemoryMailStore::new();
        assert!(store.upsert_message(&make_message("m1", &["a.pdf"])).unwrap());
        assert!(!store.upsert_message(&make_message("m1", &["a.pdf"])).unwrap());

        assert_eq!(store.count_messages().unwrap(), 1);
        assert_eq!(store.count_attachments().unwrap(), 1);
    }

    #[test]
    fn test_get_message_includes_attachments() {
        let store = InMemoryMailStore::new();
        store.upsert_message(&make_message("m1", &["a.pdf", "b.xlsx"])).unwrap();
        store.upsert_message(&make_message("m2", &["c.pdf"])).unwrap();

        let msg = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(msg.attachments.len(), 2);
        assert!(store.get_message(&MessageId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_attachment_requires_parent() {
        let store = InMemoryMailStore::new();
        let orphan = AttachmentRef::new(MessageId::new("ghost"), "/tmp/attach", "x.pdf");
        assert!(store.insert_attachment(&orphan).is_err());
        assert_eq!(store.count_attachments().unwrap(), 0);
    }
}
