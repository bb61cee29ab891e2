//! Service wiring
//!
//! [`IngestService`] owns the long-lived collaborators built from the
//! configuration and runs one cycle at a time against the database of
//! the current local day.

use chrono::NaiveDate;
use log::{debug, info, warn};
use std::sync::atomic::AtomicBool;

use crate::artifacts::ArtifactNamer;
use crate::config::AppConfig;
use crate::error::IngestError;
use crate::graph::{GraphAuth, GraphClient};
use crate::replicate::{
    DirectoryTarget, ReplicationStats, ReplicationTarget, SftpTarget, replicate_day,
};
use crate::source::MailSource;
use crate::storage::{CheckpointStore, DeferredSqliteStore, MailStore, SqliteMailStore};
use crate::sync::{CycleReport, CycleRequest, IngestionCycle, Scheduler, SyncOptions};

type Today = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct IngestService {
    config: AppConfig,
    source: Box<dyn MailSource>,
    checkpoints: CheckpointStore,
    namer: ArtifactNamer,
    replica: Option<Box<dyn ReplicationTarget>>,
    today: Today,
}

impl IngestService {
    /// Build the Graph-backed service described by `config`
    pub fn new(config: AppConfig) -> Self {
        let auth = GraphAuth::new(&config.tenant_id, &config.client_id, &config.client_secret);
        let source = Box::new(GraphClient::new(auth, &config.mailbox));
        let replica = replica_for(&config);
        Self::with_parts(config, source, replica)
    }

    /// Build with explicit collaborators
    pub fn with_parts(
        config: AppConfig,
        source: Box<dyn MailSource>,
        replica: Option<Box<dyn ReplicationTarget>>,
    ) -> Self {
        let offset = config.local_offset();
        let clock = config.clone();
        Self {
            checkpoints: CheckpointStore::new(config.checkpoint_path(), offset),
            namer: ArtifactNamer::new(offset),
            config,
            source,
            replica,
            today: Box::new(move || clock.today()),
        }
    }

    /// Replace the attachment namer
    pub fn with_namer(mut self, namer: ArtifactNamer) -> Self {
        self.namer = namer;
        self
    }

    /// Replace the local calendar used to pick the batch folder
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Undo a cycle interrupted by a crash. Call once before any cycle.
    pub fn recover(&self) -> Result<bool, IngestError> {
        self.checkpoints.recover().map_err(IngestError::Storage)
    }

    /// Open the database of a local day
    pub fn open_store(&self, date: NaiveDate) -> Result<SqliteMailStore, IngestError> {
        SqliteMailStore::new(self.config.db_path(date)).map_err(IngestError::Storage)
    }

    /// Run one cycle, then replicate the day's batch if it changed.
    ///
    /// Checkpointed cycles write into today's batch folder unless an
    /// earlier attempt failed before committing; that batch's folder is
    /// reused until a cycle commits. Day runs write into the folder of
    /// the requested day.
    pub fn run_cycle(&self, request: CycleRequest) -> Result<CycleReport, IngestError> {
        let date = match request {
            CycleRequest::Day(date) => date,
            CycleRequest::Checkpointed => self.batch_date()?,
        };
        info!("[SYNC] Starting cycle for {} ({:?})", date, request);

        let store = DeferredSqliteStore::new(self.config.db_path(date));
        let options = SyncOptions {
            page_size: self.config.page_size,
            local_offset: self.config.local_offset(),
        };
        let mut cycle = IngestionCycle::new(
            self.source.as_ref(),
            &store,
            &self.checkpoints,
            &self.namer,
            self.config.attach_dir(date),
            options,
        );
        let report = cycle.run(request)?;

        if request == CycleRequest::Checkpointed {
            self.checkpoints
                .finish_batch()
                .map_err(IngestError::Storage)?;
        }

        let is_day_run = matches!(request, CycleRequest::Day(_));
        if store.is_open() && (report.needs_replication() || is_day_run) {
            self.replicate_store(&store, date)?;
        }
        Ok(report)
    }

    /// Folder of an uncommitted batch, or today's, recorded before the
    /// cycle writes anything
    fn batch_date(&self) -> Result<NaiveDate, IngestError> {
        let pending = self
            .checkpoints
            .pending_batch()
            .map_err(IngestError::Storage)?;
        let date = match pending {
            Some(date) => {
                info!("[SYNC] Resuming uncommitted batch of {}", date);
                date
            }
            None => (self.today)(),
        };
        self.checkpoints
            .begin_batch(date)
            .map_err(IngestError::Storage)?;
        Ok(date)
    }

    /// Re-run replication for a day that was ingested earlier
    pub fn replicate(&self, date: NaiveDate) -> Result<Option<ReplicationStats>, IngestError> {
        let db_path = self.config.db_path(date);
        if !db_path.exists() {
            return Err(IngestError::Replication(anyhow::anyhow!(
                "Nothing ingested for {}: {} does not exist",
                date,
                db_path.display()
            )));
        }
        let store = self.open_store(date)?;
        self.replicate_store(&store, date)
    }

    fn replicate_store(
        &self,
        store: &dyn MailStore,
        date: NaiveDate,
    ) -> Result<Option<ReplicationStats>, IngestError> {
        let Some(target) = self.replica.as_deref() else {
            debug!("[REPLICATE] No replica configured, skipping");
            return Ok(None);
        };
        let db_path = self.config.db_path(date);
        replicate_day(target, store, &db_path, date)
            .inspect_err(|e| warn!("[REPLICATE] Checkpoint stays committed: {}", e))
            .map(Some)
    }

    /// Run checkpointed cycles until stopped or a cycle fails
    pub fn run_loop(&self, scheduler: &Scheduler, stop_flag: &AtomicBool) -> Result<u64, IngestError> {
        scheduler.run_loop(stop_flag, || {
            self.run_cycle(CycleRequest::Checkpointed).map(|_| ())
        })
    }
}

/// SFTP when a host is configured, else a directory mirror, else nothing
fn replica_for(config: &AppConfig) -> Option<Box<dyn ReplicationTarget>> {
    if let Some(settings) = config.sftp() {
        info!(
            "[REPLICATE] Replicating to sftp://{}:{}/{}",
            settings.host, settings.port, settings.root
        );
        return Some(Box::new(SftpTarget::new(settings)));
    }
    config.replica_dir.as_ref().map(|dir| {
        info!("[REPLICATE] Replicating to {}", dir.display());
        Box::new(DirectoryTarget::new(dir)) as Box<dyn ReplicationTarget>
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_json(
            r#"{
                "mailbox": "fund@example.com",
                "tenant_id": "t",
                "client_id": "c",
                "client_secret": "s",
                "data_dir": "/data"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_no_replica_configured() {
        assert!(replica_for(&config()).is_none());
    }

    #[test]
    fn test_directory_replica() {
        let mut config = config();
        config.replica_dir = Some("/mnt/share".into());
        assert!(replica_for(&config).is_some());
    }

    #[test]
    fn test_sftp_needs_credentials() {
        let mut config = config();
        config.sftp_host = Some("backup.example.com".to_string());
        assert!(replica_for(&config).is_none());

        config.sftp_user = Some("fund".to_string());
        config.sftp_password = Some("pw".to_string());
        assert!(replica_for(&config).is_some());
    }
}
