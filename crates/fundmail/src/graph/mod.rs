//! Microsoft Graph mail integration
//!
//! This module provides:
//! - Client-credentials token acquisition
//! - REST client implementing [`crate::source::MailSource`]
//! - Response normalization to source records

mod auth;
mod client;
mod normalize;

pub use auth::GraphAuth;
pub use client::GraphClient;
pub use normalize::{normalize_attachment, normalize_message};

/// Graph API response types
pub mod api {
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    /// One page of a message listing
    #[derive(Debug, Deserialize)]
    pub struct MessagePage {
        #[serde(default)]
        pub value: Vec<GraphMessage>,
        #[serde(rename = "@odata.nextLink")]
        pub next_link: Option<String>,
    }

    /// Message header fields selected by the listing query
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GraphMessage {
        pub id: String,
        pub subject: Option<String>,
        pub from: Option<Recipient>,
        pub sender: Option<Recipient>,
        #[serde(default)]
        pub to_recipients: Vec<Recipient>,
        #[serde(default)]
        pub cc_recipients: Vec<Recipient>,
        pub received_date_time: DateTime<Utc>,
        #[serde(default)]
        pub has_attachments: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Recipient {
        pub email_address: Option<GraphEmailAddress>,
    }

    #[derive(Debug, Deserialize)]
    pub struct GraphEmailAddress {
        pub name: Option<String>,
        pub address: Option<String>,
    }

    /// Response of a `$select=body` message fetch
    #[derive(Debug, Deserialize)]
    pub struct BodyResponse {
        pub body: Option<ItemBody>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ItemBody {
        pub content_type: Option<String>,
        pub content: Option<String>,
    }

    /// One page of a message's attachments
    #[derive(Debug, Deserialize)]
    pub struct AttachmentPage {
        #[serde(default)]
        pub value: Vec<GraphAttachment>,
        #[serde(rename = "@odata.nextLink")]
        pub next_link: Option<String>,
    }

    /// Attachment of any kind; only file attachments carry `contentBytes`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GraphAttachment {
        #[serde(rename = "@odata.type")]
        pub odata_type: Option<String>,
        pub name: Option<String>,
        pub content_type: Option<String>,
        #[serde(default)]
        pub size: u64,
        #[serde(default)]
        pub is_inline: bool,
        pub content_bytes: Option<String>,
    }

    /// Token endpoint response
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        #[serde(default)]
        pub expires_in: u64,
        #[allow(dead_code)]
        pub token_type: Option<String>,
    }
}
