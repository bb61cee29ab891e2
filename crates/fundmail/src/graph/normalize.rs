//! Graph API response normalization
//!
//! Converts Graph API records to the source records the ingestion cycle
//! works with.

use anyhow::{Context, Result};
use base64::prelude::*;

use super::api::{GraphAttachment, GraphEmailAddress, GraphMessage, Recipient};
use crate::models::{EmailAddress, MessageId};
use crate::source::{RemoteAttachment, RemoteMessage};

/// `@odata.type` of attachments that carry file content
const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

/// Normalize a listed Graph message to a source record
pub fn normalize_message(msg: GraphMessage) -> RemoteMessage {
    let sender = msg
        .sender
        .as_ref()
        .and_then(recipient_address)
        .unwrap_or_default();
    let from = msg
        .from
        .as_ref()
        .and_then(recipient_address)
        .unwrap_or_else(|| sender.clone());

    RemoteMessage {
        id: MessageId::new(msg.id),
        subject: msg.subject.unwrap_or_default(),
        sender,
        from,
        to: recipient_list(&msg.to_recipients),
        cc: recipient_list(&msg.cc_recipients),
        received_at: msg.received_date_time,
        has_attachments: msg.has_attachments,
    }
}

/// Normalize an attachment, decoding its content.
///
/// Returns `Ok(None)` for item and reference attachments, which have no
/// file content to store.
pub fn normalize_attachment(att: GraphAttachment) -> Result<Option<RemoteAttachment>> {
    if att.odata_type.as_deref() != Some(FILE_ATTACHMENT_TYPE) {
        return Ok(None);
    }

    let name = att.name.unwrap_or_default();
    let data = match att.content_bytes.as_deref() {
        Some(encoded) => BASE64_STANDARD
            .decode(encoded)
            .with_context(|| format!("Failed to decode content of attachment {}", name))?,
        None => Vec::new(),
    };

    Ok(Some(RemoteAttachment {
        name,
        content_type: att.content_type.unwrap_or_default(),
        size: att.size,
        is_inline: att.is_inline,
        data,
    }))
}

fn recipient_address(recipient: &Recipient) -> Option<EmailAddress> {
    let GraphEmailAddress { name, address } = recipient.email_address.as_ref()?;
    let email = address.as_deref().unwrap_or("").trim();
    if email.is_empty() {
        return None;
    }
    match name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Some(EmailAddress::with_name(name, email)),
        _ => Some(EmailAddress::new(email)),
    }
}

fn recipient_list(recipients: &[Recipient]) -> Vec<EmailAddress> {
    recipients.iter().filter_map(recipient_address).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::api::{AttachmentPage, MessagePage};

    #[test]
    fn test_normalize_message_page() {
        let json = r#"{
            "value": [{
                "id": "AAMk1",
                "subject": "기준가 안내",
                "from": {"emailAddress": {"name": "Fund Desk", "address": "desk@example.com"}},
                "sender": {"emailAddress": {"name": "Relay", "address": "relay@example.com"}},
                "toRecipients": [
                    {"emailAddress": {"name": "Ops", "address": "ops@example.com"}},
                    {"emailAddress": {"address": ""}}
                ],
                "receivedDateTime": "2025-06-30T01:23:45Z",
                "hasAttachments": true
            }],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next"
        }"#;

        let page: MessagePage = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_link.as_deref(), Some("https://graph.microsoft.com/v1.0/next"));

        let msg = normalize_message(page.value.into_iter().next().unwrap());
        assert_eq!(msg.id.as_str(), "AAMk1");
        assert_eq!(msg.subject, "기준가 안내");
        assert_eq!(msg.from, EmailAddress::with_name("Fund Desk", "desk@example.com"));
        assert_eq!(msg.sender.email, "relay@example.com");
        assert_eq!(msg.to, vec![EmailAddress::with_name("Ops", "ops@example.com")]);
        assert!(msg.cc.is_empty());
        assert!(msg.has_attachments);
        assert_eq!(msg.received_at.to_rfc3339(), "2025-06-30T01:23:45+00:00");
    }

    #[test]
    fn test_missing_from_falls_back_to_sender() {
        let json = r#"{
            "id": "m",
            "subject": null,
            "sender": {"emailAddress": {"address": "relay@example.com"}},
            "receivedDateTime": "2025-06-30T01:23:45Z"
        }"#;
        let msg = normalize_message(serde_json::from_str(json).unwrap());
        assert_eq!(msg.subject, "");
        assert_eq!(msg.from.email, "relay@example.com");
        assert!(!msg.has_attachments);
    }

    #[test]
    fn test_normalize_attachments() {
        let json = r##"{"value": [
            {
                "@odata.type": "#microsoft.graph.fileAttachment",
                "name": "nav.pdf",
                "contentType": "application/pdf",
                "size": 12,
                "isInline": false,
                "contentBytes": "aGVsbG8gd29ybGQ="
            },
            {
                "@odata.type": "#microsoft.graph.itemAttachment",
                "name": "forwarded",
                "size": 100
            }
        ]}"##;
        let page: AttachmentPage = serde_json::from_str(json).unwrap();
        let mut items = page.value.into_iter();

        let file = normalize_attachment(items.next().unwrap()).unwrap().unwrap();
        assert_eq!(file.name, "nav.pdf");
        assert_eq!(file.data, b"hello world");
        assert_eq!(file.size, 12);

        assert!(normalize_attachment(items.next().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_base64_is_error() {
        let json = r##"{
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": "bad.pdf",
            "contentBytes": "***"
        }"##;
        let att: GraphAttachment = serde_json::from_str(json).unwrap();
        assert!(normalize_attachment(att).is_err());
    }
}
