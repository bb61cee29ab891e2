//! Day database opened on first use
//!
//! A cycle that only seeds the checkpoint or finds no new mail never
//! touches the store, so no empty `fm_YYYY_MM_DD.db` is left behind.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use log::debug;

use super::sqlite::SqliteMailStore;
use super::traits::MailStore;
use crate::models::{AttachmentRef, IngestedMessage, MessageId};

pub struct DeferredSqliteStore {
    path: PathBuf,
    store: OnceLock<SqliteMailStore>,
}

impl DeferredSqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether any call has opened the database yet
    pub fn is_open(&self) -> bool {
        self.store.get().is_some()
    }

    fn open(&self) -> Result<&SqliteMailStore> {
        if let Some(store) = self.store.get() {
            return Ok(store);
        }
        debug!("[STORE] Opening {}", self.path.display());
        let store = SqliteMailStore::new(&self.path)?;
        Ok(self.store.get_or_init(|| store))
    }
}

impl MailStore for DeferredSqliteStore {
    fn upsert_message(&self, message: &IngestedMessage) -> Result<bool> {
        self.open()?.upsert_message(message)
    }

    fn insert_attachment(&self, attachment: &AttachmentRef) -> Result<()> {
        self.open()?.insert_attachment(attachment)
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        self.open()?.has_message(id)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<IngestedMessage>> {
        self.open()?.get_message(id)
    }

    fn count_messages(&self) -> Result<usize> {
        self.open()?.count_messages()
    }

    fn count_attachments(&self) -> Result<usize> {
        self.open()?.count_attachments()
    }

    fn query_attachment_paths(&self) -> Result<Vec<(PathBuf, String)>> {
        self.open()?.query_attachment_paths()
    }
}
