//! One ingestion cycle: fetch → persist → advance checkpoint
//!
//! A checkpointed cycle walks
//! `Idle → SnapshotTaken → Fetching → Persisting → CheckpointAdvancing → Committed`
//! and on any failure after the snapshot goes `Failed → RolledBack`,
//! restoring the pre-cycle checkpoint before the error is returned.
//! The checkpoint commit is always the last write of a cycle.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use log::{debug, error, info, warn};

use super::window::{CycleRequest, DEFAULT_PAGE_SIZE, FetchMode, FetchWindow, plan_window, unseen_prefix};
use crate::artifacts::{ArtifactNamer, is_logo_like};
use crate::error::IngestError;
use crate::models::{AttachmentRef, Checkpoint, IngestedMessage, default_local_offset};
use crate::source::{MailSource, RemoteMessage};
use crate::storage::{CheckpointStore, MailStore};

/// Tunables for a cycle
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Messages requested per page
    pub page_size: usize,
    /// Offset used for local timestamps and day windows
    pub local_offset: FixedOffset,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            local_offset: default_local_offset(),
        }
    }
}

/// Where a cycle is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    SnapshotTaken,
    Fetching,
    Persisting,
    CheckpointAdvancing,
    Committed,
    Failed,
    RolledBack,
}

/// Counters reported for every cycle, successful or not
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    /// Messages returned by the source
    pub messages_listed: usize,
    /// Messages newer than the checkpoint
    pub messages_new: usize,
    /// Messages written to storage
    pub messages_stored: usize,
    /// Messages already present in storage
    pub messages_skipped: usize,
    /// Messages that could not be stored
    pub messages_failed: usize,
    /// Attachment files written and recorded
    pub attachments_stored: usize,
    /// Attachments dropped as logo-like
    pub attachments_filtered: usize,
    /// Attachments skipped because no valid name could be built
    pub attachments_unnamed: usize,
    /// Duration of the cycle
    pub duration_ms: u64,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// First run: checkpoint seeded from the newest message, nothing stored
    Seeded(Checkpoint),
    /// First run against an empty mailbox; still no checkpoint
    EmptyMailbox,
    /// Nothing newer than `since`
    NoNewMail { since: Option<DateTime<Utc>> },
    /// Messages were stored; `checkpoint` is `None` for day runs
    Ingested { checkpoint: Option<Checkpoint> },
}

/// Result of a finished cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub mode: FetchMode,
    pub outcome: CycleOutcome,
    pub stats: CycleStats,
}

impl CycleReport {
    /// Whether the cycle stored at least one new message
    pub fn stored_anything(&self) -> bool {
        self.stats.messages_stored > 0
    }

    /// Whether the day's batch changed or may not have been replicated yet.
    ///
    /// Messages found already stored belong to an earlier attempt that
    /// failed before replication, so they count as well.
    pub fn needs_replication(&self) -> bool {
        self.stored_anything()
            || (matches!(self.outcome, CycleOutcome::Ingested { .. })
                && self.stats.messages_skipped > 0)
    }

    /// Stored messages but had to skip some attachments
    pub fn is_partial(&self) -> bool {
        self.stats.attachments_unnamed > 0
    }

    pub fn summary(&self) -> String {
        let outcome = match &self.outcome {
            CycleOutcome::Seeded(cp) => format!("seeded checkpoint at {}", cp.last_message_id),
            CycleOutcome::EmptyMailbox => "mailbox empty, no checkpoint".to_string(),
            CycleOutcome::NoNewMail { since: Some(since) } => {
                format!("no new mail since {}", since.to_rfc3339())
            }
            CycleOutcome::NoNewMail { since: None } => "no new mail".to_string(),
            CycleOutcome::Ingested { .. } if self.is_partial() => "partially ingested".to_string(),
            CycleOutcome::Ingested { .. } => "ingested".to_string(),
        };
        format_summary(self.mode.as_str(), &outcome, &self.stats)
    }
}

fn format_summary(mode: &str, outcome: &str, stats: &CycleStats) -> String {
    format!(
        "{} cycle {}: messages listed {}, stored {}, already stored {}, failed {}; \
         attachments stored {}, filtered {}, unnamed {} ({}ms)",
        mode,
        outcome,
        stats.messages_listed,
        stats.messages_stored,
        stats.messages_skipped,
        stats.messages_failed,
        stats.attachments_stored,
        stats.attachments_filtered,
        stats.attachments_unnamed,
        stats.duration_ms
    )
}

/// Runs ingestion cycles against the given collaborators
pub struct IngestionCycle<'a> {
    source: &'a dyn MailSource,
    store: &'a dyn MailStore,
    checkpoints: &'a CheckpointStore,
    namer: &'a ArtifactNamer,
    attachment_dir: PathBuf,
    options: SyncOptions,
    phase: CyclePhase,
    stats: CycleStats,
}

impl<'a> IngestionCycle<'a> {
    pub fn new(
        source: &'a dyn MailSource,
        store: &'a dyn MailStore,
        checkpoints: &'a CheckpointStore,
        namer: &'a ArtifactNamer,
        attachment_dir: impl Into<PathBuf>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            store,
            checkpoints,
            namer,
            attachment_dir: attachment_dir.into(),
            options,
            phase: CyclePhase::Idle,
            stats: CycleStats::default(),
        }
    }

    /// Phase reached by the last `run`
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Counters of the last `run` (also filled when it failed)
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Run one cycle to a terminal state
    pub fn run(&mut self, request: CycleRequest) -> Result<CycleReport, IngestError> {
        let start = Instant::now();
        self.phase = CyclePhase::Idle;
        self.stats = CycleStats::default();

        let result = match request {
            CycleRequest::Checkpointed => self.run_checkpointed(),
            CycleRequest::Day(date) => self.run_fixed_day(date),
        };
        self.stats.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((mode, outcome)) => {
                let report = CycleReport {
                    mode,
                    outcome,
                    stats: self.stats.clone(),
                };
                info!("[SYNC] {}", report.summary());
                Ok(report)
            }
            Err(err) => {
                error!(
                    "[SYNC] {} ({} error, phase {:?}): {}",
                    format_summary("ingestion", "failed", &self.stats),
                    err.kind(),
                    self.phase,
                    err
                );
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: CyclePhase) {
        debug!("[SYNC] phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn run_checkpointed(&mut self) -> Result<(FetchMode, CycleOutcome), IngestError> {
        let checkpoints = self.checkpoints;
        let checkpoint = checkpoints.read().map_err(IngestError::Storage)?;

        // Nothing has been touched yet if this fails
        let handle = checkpoints.snapshot().map_err(IngestError::Storage)?;
        self.transition(CyclePhase::SnapshotTaken);

        match self.advance(checkpoint.as_ref()) {
            Ok(done) => {
                self.transition(CyclePhase::Committed);
                checkpoints.discard(handle).map_err(IngestError::Storage)?;
                Ok(done)
            }
            Err(err) => {
                self.transition(CyclePhase::Failed);
                match checkpoints.restore(&handle) {
                    Ok(()) => self.transition(CyclePhase::RolledBack),
                    Err(restore_err) => error!(
                        "[SYNC] Rollback failed, snapshot left at {} for startup recovery: {:#}",
                        handle.path().display(),
                        restore_err
                    ),
                }
                Err(err)
            }
        }
    }

    /// Everything between snapshot and commit
    fn advance(
        &mut self,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<(FetchMode, CycleOutcome), IngestError> {
        let window = plan_window(
            CycleRequest::Checkpointed,
            checkpoint,
            self.options.page_size,
            self.options.local_offset,
        );

        self.transition(CyclePhase::Fetching);
        let listed = self
            .source
            .list_messages(&window)
            .map_err(IngestError::from_source)?;
        self.stats.messages_listed = listed.len();

        let Some(current) = checkpoint else {
            return self.seed(&listed).map(|outcome| (FetchMode::Bootstrap, outcome));
        };

        let fresh = unseen_prefix(listed, &current.last_message_id);
        self.stats.messages_new = fresh.len();

        let Some(newest) = newest_of(&fresh) else {
            warn!(
                "[SYNC] No mail received since {}",
                current
                    .last_fetch_time
                    .with_timezone(&self.options.local_offset)
                    .to_rfc3339()
            );
            return Ok((
                FetchMode::Incremental,
                CycleOutcome::NoNewMail {
                    since: Some(current.last_fetch_time),
                },
            ));
        };
        let candidate = Checkpoint::new(newest.received_at, newest.id.clone(), newest.subject.clone());

        self.transition(CyclePhase::Persisting);
        self.persist_batch(&fresh)?;

        let next = current.advanced(candidate);
        self.transition(CyclePhase::CheckpointAdvancing);
        self.checkpoints.commit(&next).map_err(IngestError::Storage)?;

        Ok((
            FetchMode::Incremental,
            CycleOutcome::Ingested {
                checkpoint: Some(next),
            },
        ))
    }

    /// Bootstrap: record the newest message as the starting point
    fn seed(&mut self, listed: &[RemoteMessage]) -> Result<CycleOutcome, IngestError> {
        let Some(newest) = newest_of(listed) else {
            warn!("[SYNC] Mailbox is empty; checkpoint stays unset");
            return Ok(CycleOutcome::EmptyMailbox);
        };

        info!(
            "[SYNC] No checkpoint yet; starting after {} ({})",
            newest.id, newest.subject
        );
        let seeded = Checkpoint::new(newest.received_at, newest.id.clone(), newest.subject.clone());

        self.transition(CyclePhase::CheckpointAdvancing);
        self.checkpoints.commit(&seeded).map_err(IngestError::Storage)?;
        Ok(CycleOutcome::Seeded(seeded))
    }

    fn run_fixed_day(&mut self, date: NaiveDate) -> Result<(FetchMode, CycleOutcome), IngestError> {
        let window = FetchWindow::fixed_day(date, self.options.local_offset, self.options.page_size);
        info!("[SYNC] Fetching all mail received on {} (local)", date);

        self.transition(CyclePhase::Fetching);
        let listed = self
            .source
            .list_messages(&window)
            .map_err(IngestError::from_source)?;
        self.stats.messages_listed = listed.len();
        self.stats.messages_new = listed.len();

        if listed.is_empty() {
            return Ok((
                FetchMode::FixedDay,
                CycleOutcome::NoNewMail {
                    since: window.lower_bound,
                },
            ));
        }

        self.transition(CyclePhase::Persisting);
        if let Err(err) = self.persist_batch(&listed) {
            self.transition(CyclePhase::Failed);
            return Err(err);
        }
        self.transition(CyclePhase::Committed);

        Ok((FetchMode::FixedDay, CycleOutcome::Ingested { checkpoint: None }))
    }

    /// Store every message in the batch.
    ///
    /// A transport failure for one message skips that message as a unit
    /// and the rest are still attempted; the first such failure is
    /// returned once the batch is done. Auth and storage failures stop
    /// the batch immediately.
    fn persist_batch(&mut self, batch: &[RemoteMessage]) -> Result<(), IngestError> {
        let mut first_failure = None;

        for remote in batch {
            if self
                .store
                .has_message(&remote.id)
                .map_err(IngestError::Storage)?
            {
                debug!("[SYNC] {} already stored, skipping", remote.id);
                self.stats.messages_skipped += 1;
                continue;
            }

            match self.persist_message(remote) {
                Ok(None) => {
                    debug!("[SYNC] {} was stored concurrently, skipping", remote.id);
                    self.stats.messages_skipped += 1;
                }
                Ok(Some(message)) => {
                    self.stats.messages_stored += 1;
                    self.stats.attachments_stored += message.attachments.len();
                    info!(
                        "[SYNC] {}: {} ({}), attachments: {}",
                        self.stats.messages_stored,
                        message.subject,
                        message.received_at_local.to_rfc3339(),
                        message.attachments.len()
                    );
                }
                Err(err @ IngestError::Transport(_)) => {
                    error!("[SYNC] Skipping message {}: {}", remote.id, err);
                    self.stats.messages_failed += 1;
                    first_failure.get_or_insert(err);
                }
                Err(err) => {
                    self.stats.messages_failed += 1;
                    return Err(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Download body and attachments, then write the message row.
    ///
    /// Attachment files written for this message are removed again if
    /// anything after them fails or the row already existed, so no file
    /// is left without a row. `None` when the row already existed.
    fn persist_message(
        &mut self,
        remote: &RemoteMessage,
    ) -> Result<Option<IngestedMessage>, IngestError> {
        let body = self
            .source
            .get_body(&remote.id)
            .map_err(IngestError::from_source)?
            .unwrap_or_default();

        let mut written = Vec::new();
        let attachments = match self.save_attachments(remote, &mut written) {
            Ok(attachments) => attachments,
            Err(err) => {
                remove_files(&written);
                return Err(err);
            }
        };

        let message = IngestedMessage::builder(remote.id.clone())
            .subject(remote.subject.clone())
            .sender(remote.sender.clone())
            .from(remote.from.clone())
            .to(remote.to.clone())
            .cc(remote.cc.clone())
            .received_at(remote.received_at)
            .local_offset(self.options.local_offset)
            .body(body)
            .attachments(attachments)
            .build();

        match self.store.upsert_message(&message) {
            Ok(true) => Ok(Some(message)),
            Ok(false) => {
                remove_files(&written);
                Ok(None)
            }
            Err(e) => {
                remove_files(&written);
                Err(IngestError::Storage(
                    e.context(format!("Failed to store message {}", message.id)),
                ))
            }
        }
    }

    fn save_attachments(
        &mut self,
        remote: &RemoteMessage,
        written: &mut Vec<PathBuf>,
    ) -> Result<Vec<AttachmentRef>, IngestError> {
        if !remote.has_attachments {
            return Ok(Vec::new());
        }

        let downloaded = self
            .source
            .list_attachments(&remote.id)
            .map_err(IngestError::from_source)?;

        let mut refs = Vec::new();
        for attachment in downloaded {
            if is_logo_like(&attachment) {
                debug!(
                    "[SYNC] Skipping logo-like attachment {} ({})",
                    attachment.name, attachment.content_type
                );
                self.stats.attachments_filtered += 1;
                continue;
            }

            fs::create_dir_all(&self.attachment_dir)
                .with_context(|| format!("Failed to create {}", self.attachment_dir.display()))
                .map_err(IngestError::Storage)?;

            let path = match self.namer.resolve(&self.attachment_dir, &attachment.name) {
                Ok(path) => path,
                Err(err) => {
                    warn!("[SYNC] Skipping attachment of {}: {}", remote.id, err);
                    self.stats.attachments_unnamed += 1;
                    continue;
                }
            };

            write_durable(&path, &attachment.data).map_err(IngestError::Storage)?;
            written.push(path.clone());

            let attachment_ref = AttachmentRef::from_path(remote.id.clone(), &path)
                .ok_or_else(|| IngestError::Storage(anyhow!("Unusable path {}", path.display())))?;
            refs.push(attachment_ref);
        }

        Ok(refs)
    }
}

/// Newest message by receive time; on equal times the one listed first
fn newest_of(messages: &[RemoteMessage]) -> Option<&RemoteMessage> {
    messages.iter().fold(None, |best, m| match best {
        Some(b) if b.received_at >= m.received_at => Some(b),
        _ => Some(m),
    })
}

fn write_durable(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            warn!("[SYNC] Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, MessageId};
    use chrono::{Duration, TimeZone};

    fn remote(id: &str, at: DateTime<Utc>) -> RemoteMessage {
        RemoteMessage {
            id: MessageId::new(id),
            subject: id.to_string(),
            sender: EmailAddress::new("desk@example.com"),
            from: EmailAddress::new("desk@example.com"),
            to: Vec::new(),
            cc: Vec::new(),
            received_at: at,
            has_attachments: false,
        }
    }

    #[test]
    fn test_newest_of_prefers_first_on_tie() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let batch = vec![remote("a", t), remote("b", t), remote("c", t - Duration::hours(1))];
        assert_eq!(newest_of(&batch).unwrap().id.as_str(), "a");
    }

    #[test]
    fn test_newest_of_unsorted_batch() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let batch = vec![remote("a", t), remote("b", t + Duration::minutes(1))];
        assert_eq!(newest_of(&batch).unwrap().id.as_str(), "b");
        assert!(newest_of(&[]).is_none());
    }

    #[test]
    fn test_summary_mentions_counts() {
        let report = CycleReport {
            mode: FetchMode::Incremental,
            outcome: CycleOutcome::NoNewMail { since: None },
            stats: CycleStats {
                messages_listed: 1,
                ..CycleStats::default()
            },
        };
        let summary = report.summary();
        assert!(summary.starts_with("incremental cycle no new mail"));
        assert!(summary.contains("messages listed 1"));
        assert!(!report.stored_anything());
        assert!(!report.needs_replication());
    }

    #[test]
    fn test_already_stored_batch_needs_replication() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut report = CycleReport {
            mode: FetchMode::Incremental,
            outcome: CycleOutcome::Ingested {
                checkpoint: Some(Checkpoint::new(t, "x2", "x2")),
            },
            stats: CycleStats {
                messages_new: 1,
                messages_skipped: 1,
                ..CycleStats::default()
            },
        };
        assert!(!report.stored_anything());
        assert!(report.needs_replication());

        report.outcome = CycleOutcome::NoNewMail { since: Some(t) };
        assert!(!report.needs_replication());
    }
}
