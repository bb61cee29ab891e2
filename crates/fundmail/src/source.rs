//! Mail source abstraction
//!
//! The ingestion cycle only needs three read operations from the remote
//! mailbox. The REST implementation lives in [`crate::graph`]; tests use
//! scripted fakes.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{EmailAddress, MessageId};
use crate::sync::FetchWindow;

/// Message header record as listed by the source
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    pub id: MessageId,
    pub subject: String,
    pub sender: EmailAddress,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub received_at: DateTime<Utc>,
    pub has_attachments: bool,
}

/// Downloaded attachment payload
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAttachment {
    pub name: String,
    pub content_type: String,
    /// Size as declared by the source (may differ from `data.len()`)
    pub size: u64,
    pub is_inline: bool,
    pub data: Vec<u8>,
}

/// Read access to the remote mailbox
///
/// All calls are synchronous and may block for as long as the remote
/// takes; callers never run two cycles against a source concurrently.
pub trait MailSource: Send + Sync {
    /// List message headers inside the window, newest first.
    ///
    /// Implementations follow continuation tokens themselves and stop at
    /// `window.max_messages` when it is set.
    fn list_messages(&self, window: &FetchWindow) -> Result<Vec<RemoteMessage>>;

    /// Fetch the body of a message. `None` when the source has no body.
    fn get_body(&self, id: &MessageId) -> Result<Option<String>>;

    /// Download the file attachments of a message
    fn list_attachments(&self, id: &MessageId) -> Result<Vec<RemoteAttachment>>;
}
