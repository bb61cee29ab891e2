//! Graph API HTTP client
//!
//! Lists, reads and downloads attachments of messages in one mailbox.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::api::{AttachmentPage, BodyResponse, MessagePage};
use super::{GraphAuth, normalize_attachment, normalize_message};
use crate::error::AuthError;
use crate::models::MessageId;
use crate::source::{MailSource, RemoteAttachment, RemoteMessage};
use crate::sync::FetchWindow;

/// Header fields requested when listing
const SELECT_FIELDS: &str =
    "subject,from,sender,receivedDateTime,hasAttachments,id,toRecipients,ccRecipients";

/// Ask for HTML bodies regardless of how the message was sent
const PREFER_HTML_BODY: &str = "outlook.body-content-type=\"html\"";

/// Attempts per request before a transient failure is returned
const MAX_ATTEMPTS: u32 = 3;

/// Error for a resource the API reports as gone
#[derive(Debug, thiserror::Error)]
#[error("Resource not found")]
pub struct NotFoundError;

/// Graph API client for one mailbox
pub struct GraphClient {
    auth: GraphAuth,
    mailbox: String,
}

impl GraphClient {
    /// Graph API base URL
    const BASE_URL: &'static str = "https://graph.microsoft.com/v1.0";

    /// Create a client reading the mailbox of `mailbox` (UPN or user ID)
    pub fn new(auth: GraphAuth, mailbox: impl Into<String>) -> Self {
        Self {
            auth,
            mailbox: mailbox.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/users/{}/messages",
            Self::BASE_URL,
            urlencoding::encode(&self.mailbox)
        )
    }

    fn message_url(&self, id: &MessageId) -> String {
        format!("{}/{}", self.messages_url(), urlencoding::encode(id.as_str()))
    }

    /// GET a JSON document, retrying transient failures.
    ///
    /// Credential rejections are returned immediately as [`AuthError`].
    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        prefer: Option<&str>,
    ) -> Result<T> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..MAX_ATTEMPTS {
            match self.get_json_once(url, query, prefer) {
                Ok(value) => return Ok(value),
                Err(e) if e.is::<AuthError>() || e.is::<NotFoundError>() => return Err(e),
                Err(e) => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        warn!(
                            "[GRAPH] Request failed (attempt {}/{}), retrying in {:?}: {:#}",
                            attempt + 1,
                            MAX_ATTEMPTS,
                            delay,
                            e
                        );
                        std::thread::sleep(delay);
                        delay *= 2;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("No request attempted for {}", url)))
    }

    fn get_json_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        prefer: Option<&str>,
    ) -> Result<T> {
        let access_token = self.auth.get_access_token()?;

        let mut request = ureq::get(url).header("Authorization", &format!("Bearer {}", access_token));
        for (key, value) in query {
            request = request.query(*key, value);
        }
        if let Some(prefer) = prefer {
            request = request.header("Prefer", prefer);
        }

        match request.call() {
            Ok(mut resp) => resp
                .body_mut()
                .read_json::<T>()
                .with_context(|| format!("Failed to parse response from {}", url)),
            Err(ureq::Error::StatusCode(code @ (401 | 403))) => {
                self.auth.invalidate();
                Err(AuthError::new(format!("Graph API refused access with status {code}")).into())
            }
            Err(ureq::Error::StatusCode(404)) => Err(NotFoundError.into()),
            Err(e) => Err(anyhow!("Request to {} failed: {}", url, e)),
        }
    }
}

/// `$filter` expression for the window bounds, if it has any
pub fn build_filter(window: &FetchWindow) -> Option<String> {
    let fmt = "%Y-%m-%dT%H:%M:%SZ";
    let mut clauses = Vec::new();
    if let Some(lower) = window.lower_bound {
        clauses.push(format!("receivedDateTime ge {}", lower.format(fmt)));
    }
    if let Some(upper) = window.upper_bound {
        clauses.push(format!("receivedDateTime lt {}", upper.format(fmt)));
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" and "))
    }
}

/// Query parameters of the first listing page
fn list_query(window: &FetchWindow) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("$orderby", "receivedDateTime desc".to_string()),
        ("$top", window.page_size.to_string()),
        ("$select", SELECT_FIELDS.to_string()),
    ];
    if let Some(filter) = build_filter(window) {
        query.push(("$filter", filter));
    }
    query
}

impl MailSource for GraphClient {
    fn list_messages(&self, window: &FetchWindow) -> Result<Vec<RemoteMessage>> {
        let mut page: MessagePage = self
            .get_json(&self.messages_url(), &list_query(window), None)
            .context("Failed to list messages")?;

        let mut messages = Vec::new();
        loop {
            for msg in page.value {
                messages.push(normalize_message(msg));
                if window.max_messages.is_some_and(|max| messages.len() >= max) {
                    return Ok(messages);
                }
            }

            // nextLink already carries every query parameter
            match page.next_link {
                Some(link) => {
                    debug!("[GRAPH] Following next page ({} listed so far)", messages.len());
                    page = self
                        .get_json(&link, &[], None)
                        .context("Failed to list next page of messages")?;
                }
                None => break,
            }
        }

        debug!("[GRAPH] Listed {} messages ({})", messages.len(), window.mode.as_str());
        Ok(messages)
    }

    fn get_body(&self, id: &MessageId) -> Result<Option<String>> {
        let query = [("$select", "body".to_string())];
        match self.get_json::<BodyResponse>(&self.message_url(id), &query, Some(PREFER_HTML_BODY)) {
            Ok(resp) => Ok(resp.body.and_then(|body| body.content)),
            Err(e) if e.is::<NotFoundError>() => {
                warn!("[GRAPH] Message {} disappeared before its body was read", id);
                Ok(None)
            }
            Err(e) => Err(e.context(format!("Failed to fetch body of {}", id))),
        }
    }

    fn list_attachments(&self, id: &MessageId) -> Result<Vec<RemoteAttachment>> {
        let url = format!("{}/attachments", self.message_url(id));
        let mut page: AttachmentPage = self
            .get_json(&url, &[], None)
            .with_context(|| format!("Failed to list attachments of {}", id))?;

        let mut attachments = Vec::new();
        loop {
            for att in page.value {
                if let Some(file) = normalize_attachment(att)? {
                    attachments.push(file);
                }
            }
            match page.next_link {
                Some(link) => {
                    page = self
                        .get_json(&link, &[], None)
                        .with_context(|| format!("Failed to list attachments of {}", id))?;
                }
                None => break,
            }
        }

        Ok(attachments)
    }
}
