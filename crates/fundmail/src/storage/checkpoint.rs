//! File-backed checkpoint store with crash-safe snapshots
//!
//! Layout on disk:
//! ```text
//! data/
//!   LAST_TIME.json            # live checkpoint
//!   LAST_TIME.json.previous   # pre-cycle snapshot, only while a cycle runs
//!   LAST_TIME.json.batch      # day folder of a batch that has not committed
//! ```
//!
//! Every write goes to a temp file, is fsynced, then renamed over the
//! target, so a crash leaves either the old or the new file. An empty
//! snapshot file records that no checkpoint existed when it was taken.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::models::{Checkpoint, MessageId};

/// File name of the live checkpoint inside the data directory
pub const CHECKPOINT_FILE: &str = "LAST_TIME.json";

/// Suffix appended to the checkpoint path for the pre-cycle snapshot
const SNAPSHOT_SUFFIX: &str = ".previous";

/// Suffix appended to the checkpoint path for the pending batch marker
const BATCH_SUFFIX: &str = ".batch";

const BATCH_DATE_FORMAT: &str = "%Y-%m-%d";

/// On-disk checkpoint record
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    last_fetch_time: DateTime<Utc>,
    last_email_id: String,
    /// Same instant at the local offset, for operators reading the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_fetch_time_kst: Option<String>,
    #[serde(default)]
    title: String,
}

/// Proof that a snapshot was taken; consumed by restore or discard
#[derive(Debug)]
#[must_use = "a snapshot must be restored or discarded"]
pub struct SnapshotHandle {
    path: PathBuf,
}

impl SnapshotHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Durable record of ingestion progress
///
/// Exactly one cycle may hold a snapshot at a time; `snapshot` refuses
/// to run while a previous snapshot still exists.
pub struct CheckpointStore {
    path: PathBuf,
    snapshot_path: PathBuf,
    batch_path: PathBuf,
    local_offset: FixedOffset,
}

impl CheckpointStore {
    /// Store rooted at `<data_dir>/LAST_TIME.json`
    pub fn in_dir(data_dir: impl AsRef<Path>, local_offset: FixedOffset) -> Self {
        Self::new(data_dir.as_ref().join(CHECKPOINT_FILE), local_offset)
    }

    /// Store at an explicit checkpoint path
    pub fn new(path: impl Into<PathBuf>, local_offset: FixedOffset) -> Self {
        let path = path.into();
        let mut snapshot = path.clone().into_os_string();
        snapshot.push(SNAPSHOT_SUFFIX);
        let mut batch = path.clone().into_os_string();
        batch.push(BATCH_SUFFIX);
        Self {
            path,
            snapshot_path: PathBuf::from(snapshot),
            batch_path: PathBuf::from(batch),
            local_offset,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn batch_path(&self) -> &Path {
        &self.batch_path
    }

    /// Day folder of a batch whose cycle has not committed yet.
    ///
    /// A retry must write into the same day database, otherwise the
    /// messages the failed attempt already stored are not recognised.
    pub fn pending_batch(&self) -> Result<Option<NaiveDate>> {
        let raw = match fs::read_to_string(&self.batch_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.batch_path.display()));
            }
        };
        let date = NaiveDate::parse_from_str(raw.trim(), BATCH_DATE_FORMAT)
            .with_context(|| format!("Corrupt batch marker {}", self.batch_path.display()))?;
        Ok(Some(date))
    }

    /// Record the day folder a checkpointed cycle is about to write into
    pub fn begin_batch(&self, date: NaiveDate) -> Result<()> {
        let raw = date.format(BATCH_DATE_FORMAT).to_string();
        write_atomic(&self.batch_path, raw.as_bytes())
    }

    /// Clear the marker once the batch's cycle has committed
    pub fn finish_batch(&self) -> Result<()> {
        remove_if_exists(&self.batch_path)
    }

    /// Read the live checkpoint. `Ok(None)` means no checkpoint yet.
    ///
    /// A file that exists but can't be parsed is an error, never "absent":
    /// treating it as absent would re-bootstrap and skip mail.
    pub fn read(&self) -> Result<Option<Checkpoint>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let record: CheckpointRecord = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt checkpoint file {}", self.path.display()))?;

        if record.last_email_id.is_empty() {
            bail!("Checkpoint file {} has an empty last_email_id", self.path.display());
        }

        Ok(Some(Checkpoint {
            last_fetch_time: record.last_fetch_time,
            last_message_id: MessageId::new(record.last_email_id),
            last_subject: record.title,
        }))
    }

    /// Copy the live checkpoint to the snapshot location.
    pub fn snapshot(&self) -> Result<SnapshotHandle> {
        if self.snapshot_path.exists() {
            bail!(
                "Snapshot {} already exists; another cycle is in flight or recovery was skipped",
                self.snapshot_path.display()
            );
        }

        let current = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        write_atomic(&self.snapshot_path, &current)?;
        Ok(SnapshotHandle {
            path: self.snapshot_path.clone(),
        })
    }

    /// Atomically replace the live checkpoint
    pub fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let record = CheckpointRecord {
            last_fetch_time: checkpoint.last_fetch_time,
            last_email_id: checkpoint.last_message_id.0.clone(),
            last_fetch_time_kst: Some(
                checkpoint
                    .last_fetch_time
                    .with_timezone(&self.local_offset)
                    .to_rfc3339(),
            ),
            title: checkpoint.last_subject.clone(),
        };

        let json = serde_json::to_vec_pretty(&record).context("Failed to encode checkpoint")?;
        write_atomic(&self.path, &json)?;

        info!(
            "[CHECKPOINT] Saved {} @ {} ({})",
            checkpoint.last_message_id,
            checkpoint.last_fetch_time.to_rfc3339(),
            checkpoint.last_subject
        );
        Ok(())
    }

    /// Put the snapshot back over the live checkpoint.
    ///
    /// Consumes the snapshot file. Calling it again after a successful
    /// restore is a no-op.
    pub fn restore(&self, handle: &SnapshotHandle) -> Result<()> {
        let saved = match fs::read(&handle.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read snapshot {}", handle.path.display()));
            }
        };

        if saved.is_empty() {
            remove_if_exists(&self.path)?;
        } else {
            write_atomic(&self.path, &saved)?;
        }
        remove_if_exists(&handle.path)?;

        warn!("[CHECKPOINT] Restored pre-cycle checkpoint from {}", handle.path.display());
        Ok(())
    }

    /// Delete the snapshot after a committed cycle
    pub fn discard(&self, handle: SnapshotHandle) -> Result<()> {
        remove_if_exists(&handle.path)
    }

    /// Roll back a cycle that was interrupted before it could finish.
    ///
    /// Run once at startup. Returns `true` when a leftover snapshot was
    /// found and restored.
    pub fn recover(&self) -> Result<bool> {
        if !self.snapshot_path.exists() {
            return Ok(false);
        }

        warn!(
            "[CHECKPOINT] Found leftover snapshot {}; previous cycle did not finish",
            self.snapshot_path.display()
        );
        let handle = SnapshotHandle {
            path: self.snapshot_path.clone(),
        };
        self.restore(&handle)?;
        Ok(true)
    }
}

/// Write `data` to `path` via temp file + fsync + rename
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file =
        File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", tmp.display()))?;
    drop(file);

    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
