//! Fund mail ingestion
//!
//! This crate provides the unattended mailbox ingestion pipeline:
//! - Checkpoint store with snapshot/restore around every cycle
//! - Fetch window planning (bootstrap, incremental, fixed day)
//! - Ingestion cycle controller and fixed-interval scheduler
//! - Attachment naming (logo filtering, collisions, path budget)
//! - Microsoft Graph mail source, SQLite storage, SFTP/directory replication
//!
//! Everything is synchronous; one cycle runs at a time.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod replicate;
pub mod service;
pub mod source;
pub mod storage;
pub mod sync;

pub use artifacts::{ArtifactNamer, is_logo_like, sanitize_file_name};
pub use config::{AppConfig, SftpSettings};
pub use error::{AuthError, IngestError, NamingError};
pub use graph::{GraphAuth, GraphClient};
pub use models::{AttachmentRef, Checkpoint, EmailAddress, IngestedMessage, MessageId};
pub use replicate::{
    DirectoryTarget, ReplicationStats, ReplicationTarget, SftpTarget, replicate_day,
};
pub use service::IngestService;
pub use source::{MailSource, RemoteAttachment, RemoteMessage};
pub use storage::{CheckpointStore, InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{
    CycleOutcome, CyclePhase, CycleReport, CycleRequest, CycleStats, FetchMode, FetchWindow,
    IngestionCycle, Scheduler, SyncOptions,
};
