//! Replication of a day's batch to a secondary location
//!
//! Targets: [`SftpTarget`] for a remote server, [`DirectoryTarget`] for a
//! local or mounted directory.
//!
//! After a cycle has stored new mail, the day's database and every
//! attachment it references are copied to the target under
//! `<YYYY_MM_DD>/fm_YYYY_MM_DD.db` and `<YYYY_MM_DD>/attach/<file>`.
//! Attachments go first so the copied database never points at a file
//! the target does not have yet.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use log::{debug, info};
use std::fs;
use std::path::{Component, Path};

mod directory;
mod sftp;

pub use directory::DirectoryTarget;
pub use sftp::SftpTarget;

use crate::config::{ATTACH_DIR, day_folder_name, db_file_name};
use crate::error::IngestError;
use crate::storage::MailStore;

/// Destination for replicated files.
///
/// Remote paths are relative and `/`-separated.
pub trait ReplicationTarget: Send + Sync {
    /// Create a directory (and its parents) if it does not exist
    fn ensure_directory(&self, remote_path: &str) -> Result<()>;

    /// Copy a local file to `remote_path`, replacing any existing file
    fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()>;
}

/// Validate a target-relative path; anything that could escape the
/// target root is refused
pub(crate) fn checked_relative(remote_path: &str) -> Result<&Path> {
    let relative = Path::new(remote_path);
    if remote_path.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("Refusing remote path outside the target: {}", remote_path);
    }
    Ok(relative)
}

/// What one replication run copied
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicationStats {
    pub files: usize,
    pub bytes: u64,
}

/// Copy one day's database and attachments to the target
pub fn replicate_day(
    target: &dyn ReplicationTarget,
    store: &dyn MailStore,
    db_path: &Path,
    date: NaiveDate,
) -> Result<ReplicationStats, IngestError> {
    copy_day(target, store, db_path, date).map_err(IngestError::Replication)
}

fn copy_day(
    target: &dyn ReplicationTarget,
    store: &dyn MailStore,
    db_path: &Path,
    date: NaiveDate,
) -> Result<ReplicationStats> {
    let day = day_folder_name(date);
    let attach = format!("{}/{}", day, ATTACH_DIR);
    target.ensure_directory(&attach)?;

    let mut stats = ReplicationStats::default();
    for (folder, file_name) in store.query_attachment_paths()? {
        let local = folder.join(&file_name);
        let size = fs::metadata(&local)
            .with_context(|| format!("Attachment listed in database is missing: {}", local.display()))?
            .len();

        target.put_file(&local, &format!("{}/{}", attach, file_name))?;
        debug!("[REPLICATE] Copied {}", local.display());
        stats.files += 1;
        stats.bytes += size;
    }

    let db_size = fs::metadata(db_path)
        .with_context(|| format!("Database missing: {}", db_path.display()))?
        .len();
    target.put_file(db_path, &format!("{}/{}", day, db_file_name(date)))?;
    stats.files += 1;
    stats.bytes += db_size;

    info!(
        "[REPLICATE] Copied {} files ({} bytes) for {}",
        stats.files, stats.bytes, day
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentRef, EmailAddress, IngestedMessage, MessageId};
    use crate::storage::InMemoryMailStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    fn store_with(attach_dir: &Path, names: &[&str]) -> InMemoryMailStore {
        let store = InMemoryMailStore::new();
        let message = IngestedMessage::builder(MessageId::new("m1"))
            .sender(EmailAddress::new("desk@example.com"))
            .attachments(
                names
                    .iter()
                    .map(|n| AttachmentRef::new(MessageId::new("m1"), attach_dir, *n))
                    .collect(),
            )
            .build();
        store.upsert_message(&message).unwrap();
        store
    }

    #[test]
    fn test_replicates_layout() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let attach_dir = local.path().join("attach");
        fs::create_dir_all(&attach_dir).unwrap();
        fs::write(attach_dir.join("nav.pdf"), b"pdf").unwrap();
        fs::write(attach_dir.join("보고서.xlsx"), b"xlsx!").unwrap();
        let db = local.path().join("fm_2025_06_30.db");
        fs::write(&db, b"db").unwrap();

        let store = store_with(&attach_dir, &["nav.pdf", "보고서.xlsx"]);
        let target = DirectoryTarget::new(remote.path());
        let stats = replicate_day(&target, &store, &db, date()).unwrap();

        assert_eq!(stats, ReplicationStats { files: 3, bytes: 10 });
        let day = remote.path().join("2025_06_30");
        assert_eq!(fs::read(day.join("fm_2025_06_30.db")).unwrap(), b"db");
        assert_eq!(fs::read(day.join("attach/nav.pdf")).unwrap(), b"pdf");
        assert_eq!(fs::read(day.join("attach/보고서.xlsx")).unwrap(), b"xlsx!");
    }

    #[test]
    fn test_missing_attachment_is_replication_error() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let db = local.path().join("fm_2025_06_30.db");
        fs::write(&db, b"db").unwrap();

        let store = store_with(&local.path().join("attach"), &["gone.pdf"]);
        let err = replicate_day(&DirectoryTarget::new(remote.path()), &store, &db, date())
            .unwrap_err();

        assert_eq!(err.kind(), "replication");
        assert!(err.to_string().contains("gone.pdf"));
        assert!(!remote.path().join("2025_06_30/fm_2025_06_30.db").exists());
    }

    #[test]
    fn test_rerun_overwrites() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let db = local.path().join("fm.db");
        let store = InMemoryMailStore::new();
        let target = DirectoryTarget::new(remote.path());

        fs::write(&db, b"v1").unwrap();
        replicate_day(&target, &store, &db, date()).unwrap();
        fs::write(&db, b"v2").unwrap();
        replicate_day(&target, &store, &db, date()).unwrap();

        let copied = remote.path().join("2025_06_30/fm_2025_06_30.db");
        assert_eq!(fs::read(copied).unwrap(), b"v2");
    }

    #[test]
    fn test_checked_relative() {
        assert!(checked_relative("2025_06_30/attach/nav.pdf").is_ok());
        assert!(checked_relative("").is_err());
        assert!(checked_relative("a/../../b").is_err());
        assert!(checked_relative("./a").is_err());
    }
}
