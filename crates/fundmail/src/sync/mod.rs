//! Ingestion engine
//!
//! Plans fetch windows, runs snapshot-protected ingestion cycles and
//! repeats them on a fixed interval.

mod cycle;
mod scheduler;
mod window;

pub use cycle::{CycleOutcome, CyclePhase, CycleReport, CycleStats, IngestionCycle, SyncOptions};
pub use scheduler::Scheduler;
pub use window::{
    CycleRequest, DEFAULT_PAGE_SIZE, FetchMode, FetchWindow, plan_window, unseen_prefix,
};
