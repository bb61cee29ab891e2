//! Error taxonomy for ingestion cycles
//!
//! Collaborators (mail source, storage, replication target) report plain
//! `anyhow` errors. The cycle controller translates them into
//! [`IngestError`] exactly once, at the point where it decides what the
//! failure means for the checkpoint.

use std::path::PathBuf;

/// Credential or token failure reported by a mail source.
///
/// Collaborators wrap this into an `anyhow::Error`; the controller
/// recognises it by downcasting and classifies the failure as
/// [`IngestError::Auth`] instead of a transport failure.
#[derive(Debug, thiserror::Error)]
#[error("authentication rejected: {reason}")]
pub struct AuthError {
    pub reason: String,
}

impl AuthError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// An attachment path could not be made to fit the byte budget.
///
/// Never fails a cycle: the attachment is skipped and counted.
#[derive(Debug, thiserror::Error)]
#[error("cannot fit {file_name:?} under {} within {max_bytes} bytes", .folder.display())]
pub struct NamingError {
    pub folder: PathBuf,
    pub file_name: String,
    pub max_bytes: usize,
}

/// Cycle-level failure, classified by what it means for the checkpoint
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Token/credential failure. Fatal, never retried within a cycle.
    #[error("authentication failed: {0:#}")]
    Auth(anyhow::Error),

    /// Network or API failure while talking to the mail source
    #[error("mail source request failed: {0:#}")]
    Transport(anyhow::Error),

    /// Local persistence failure (database, attachment files, checkpoint)
    #[error("local storage failed: {0:#}")]
    Storage(anyhow::Error),

    /// Upload to the replica failed. Ingestion itself already committed.
    #[error("replication failed: {0:#}")]
    Replication(anyhow::Error),

    /// Invalid or missing configuration
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),
}

impl IngestError {
    /// Classify a mail source failure
    pub fn from_source(err: anyhow::Error) -> Self {
        if err.downcast_ref::<AuthError>().is_some() {
            IngestError::Auth(err)
        } else {
            IngestError::Transport(err)
        }
    }

    /// Short label used in cycle summaries
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Auth(_) => "auth",
            IngestError::Transport(_) => "transport",
            IngestError::Storage(_) => "storage",
            IngestError::Replication(_) => "replication",
            IngestError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_auth_error_is_classified() {
        let err = anyhow::Error::new(AuthError::new("token expired"))
            .context("Failed to list messages");
        let classified = IngestError::from_source(err);
        assert_eq!(classified.kind(), "auth");
        assert!(format!("{classified}").contains("token expired"));
    }

    #[test]
    fn test_source_other_error_is_transport() {
        let classified = IngestError::from_source(anyhow::anyhow!("connection reset"));
        assert_eq!(classified.kind(), "transport");
    }
}
