//! Ingested message and attachment records

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::default_local_offset;

/// Unique identifier for a message within the mailbox (the natural key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Join recipient addresses into the comma-separated column format
pub fn join_addresses(addrs: &[EmailAddress]) -> String {
    addrs
        .iter()
        .map(|a| a.email.as_str())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Split a comma-separated recipient column back into addresses
pub fn split_addresses(joined: &str) -> Vec<EmailAddress> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(EmailAddress::new)
        .collect()
}

/// A stored attachment file belonging to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Message the attachment was downloaded from
    pub parent_message_id: MessageId,
    /// Folder the file was written into
    pub storage_folder: PathBuf,
    /// Final (collision-free, length-limited) file name
    pub file_name: String,
}

impl AttachmentRef {
    pub fn new(
        parent_message_id: MessageId,
        storage_folder: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            parent_message_id,
            storage_folder: storage_folder.into(),
            file_name: file_name.into(),
        }
    }

    /// Build a reference from the full path the namer resolved
    pub fn from_path(parent_message_id: MessageId, path: &Path) -> Option<Self> {
        let folder = path.parent()?;
        let name = path.file_name()?.to_str()?;
        Some(Self::new(parent_message_id, folder, name))
    }

    /// Full local path of the file
    pub fn path(&self) -> PathBuf {
        self.storage_folder.join(&self.file_name)
    }
}

/// A message fetched from the mailbox, ready to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedMessage {
    /// Mailbox-unique message ID
    pub id: MessageId,
    /// Subject line
    pub subject: String,
    /// Sending mailbox
    pub sender: EmailAddress,
    /// Author (differs from `sender` for delegated mail)
    pub from: EmailAddress,
    /// Recipients (To field), in header order
    pub to: Vec<EmailAddress>,
    /// CC recipients, in header order
    pub cc: Vec<EmailAddress>,
    /// When the message was received, as reported by the source (UTC)
    pub received_at: DateTime<Utc>,
    /// `received_at` at the fixed local offset
    pub received_at_local: DateTime<FixedOffset>,
    /// Message body (HTML as delivered by the source)
    pub body: String,
    /// Stored attachments, logo-like images excluded
    pub attachments: Vec<AttachmentRef>,
}

impl IngestedMessage {
    /// Create a new message builder
    pub fn builder(id: MessageId) -> IngestedMessageBuilder {
        IngestedMessageBuilder::new(id)
    }
}

/// Builder for creating IngestedMessage instances
pub struct IngestedMessageBuilder {
    id: MessageId,
    subject: String,
    sender: Option<EmailAddress>,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    received_at: Option<DateTime<Utc>>,
    local_offset: FixedOffset,
    body: String,
    attachments: Vec<AttachmentRef>,
}

impl IngestedMessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            subject: String::new(),
            sender: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            received_at: None,
            local_offset: default_local_offset(),
            body: String::new(),
            attachments: Vec::new(),
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn sender(mut self, sender: EmailAddress) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn attachments(mut self, attachments: Vec<AttachmentRef>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn build(self) -> IngestedMessage {
        let received_at = self.received_at.unwrap_or_else(Utc::now);
        let sender = self.sender.unwrap_or_default();
        IngestedMessage {
            id: self.id,
            subject: self.subject,
            from: self.from.unwrap_or_else(|| sender.clone()),
            sender,
            to: self.to,
            cc: self.cc,
            received_at,
            received_at_local: received_at.with_timezone(&self.local_offset),
            body: self.body,
            attachments: self.attachments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_with_name() {
        let addr = EmailAddress::with_name("John Doe", "john@example.com");
        assert_eq!(addr.display(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_display_without_name() {
        let addr = EmailAddress::new("john@example.com");
        assert_eq!(addr.display(), "john@example.com");
    }

    #[test]
    fn test_address_columns_keep_order() {
        let addrs = vec![
            EmailAddress::with_name("B", "b@example.com"),
            EmailAddress::new(""),
            EmailAddress::new("a@example.com"),
        ];
        let joined = join_addresses(&addrs);
        assert_eq!(joined, "b@example.com, a@example.com");

        let split = split_addresses(&joined);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].email, "b@example.com");
        assert_eq!(split[1].email, "a@example.com");
        assert!(split_addresses("").is_empty());
    }

    #[test]
    fn test_builder_derives_local_time() {
        let received = Utc.with_ymd_and_hms(2025, 6, 25, 4, 47, 45).unwrap();
        let msg = IngestedMessage::builder(MessageId::new("m1"))
            .sender(EmailAddress::with_name("Desk", "desk@example.com"))
            .received_at(received)
            .build();

        assert_eq!(msg.received_at_local.to_rfc3339(), "2025-06-25T13:47:45+09:00");
        assert_eq!(msg.received_at_local, received);
        // from falls back to the sender
        assert_eq!(msg.from.email, "desk@example.com");
    }

    #[test]
    fn test_attachment_ref_from_path() {
        let path = Path::new("/data/2025_06_25/attach/report.pdf");
        let att = AttachmentRef::from_path(MessageId::new("m1"), path).unwrap();
        assert_eq!(att.storage_folder, Path::new("/data/2025_06_25/attach"));
        assert_eq!(att.file_name, "report.pdf");
        assert_eq!(att.path(), path);
    }
}
