//! Stop requests from SIGINT/SIGTERM
//!
//! A signal only raises a flag. The scheduler looks at it between
//! cycles, so a running cycle always reaches commit or rollback.

use anyhow::{Context, Result};
use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    /// Route SIGINT and SIGTERM to a new flag. Once per process.
    pub fn install() -> Result<Self> {
        let shutdown = Self::default();
        let handle = shutdown.clone();
        ctrlc::set_handler(move || handle.request())
            .context("Failed to install the signal handler")?;
        Ok(shutdown)
    }

    pub fn request(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            warn!("Stop already requested; waiting for the running cycle to finish");
        } else {
            warn!("Stop requested; exiting after the running cycle");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}
