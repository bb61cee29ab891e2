//! Storage trait definitions

use crate::models::{AttachmentRef, IngestedMessage, MessageId};
use anyhow::Result;
use std::path::PathBuf;

/// Trait for persisting ingested mail
///
/// Abstracts over the SQLite database and the in-memory test store.
/// Writes use insert-or-ignore semantics keyed on the message ID.
pub trait MailStore: Send + Sync {
    /// Insert a message together with its attachment rows.
    ///
    /// The message and its attachments are written atomically. Returns
    /// `false` (and writes nothing) if a message with the same ID already
    /// exists.
    fn upsert_message(&self, message: &IngestedMessage) -> Result<bool>;

    /// Insert a single attachment row.
    ///
    /// Fails if the parent message has not been stored, so an attachment
    /// row can never reference a missing message.
    fn insert_attachment(&self, attachment: &AttachmentRef) -> Result<()>;

    /// Check if a message exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// Get a message (with its attachment refs) by ID
    fn get_message(&self, id: &MessageId) -> Result<Option<IngestedMessage>>;

    /// Count stored messages
    fn count_messages(&self) -> Result<usize>;

    /// Count stored attachment rows
    fn count_attachments(&self) -> Result<usize>;

    /// All stored attachment locations as `(folder, file_name)`
    fn query_attachment_paths(&self) -> Result<Vec<(PathBuf, String)>>;
}
