//! Fetch window planning
//!
//! Decides what to ask the mail source for in the next cycle. Pure
//! functions, no I/O.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::models::{Checkpoint, MessageId};
use crate::source::RemoteMessage;

/// Maximum messages requested per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// How a cycle relates to the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// No checkpoint yet: seed it from the single newest message
    Bootstrap,
    /// Everything newer than the checkpoint
    Incremental,
    /// One local calendar day, independent of the checkpoint
    FixedDay,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Bootstrap => "bootstrap",
            FetchMode::Incremental => "incremental",
            FetchMode::FixedDay => "fixed-day",
        }
    }
}

/// What the caller wants a cycle to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleRequest {
    /// Regular cycle driven by the checkpoint (bootstrap or incremental)
    Checkpointed,
    /// Ingest one local calendar day
    Day(NaiveDate),
}

/// Query range for one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub mode: FetchMode,
    /// Inclusive lower bound on receive time
    pub lower_bound: Option<DateTime<Utc>>,
    /// Exclusive upper bound on receive time
    pub upper_bound: Option<DateTime<Utc>>,
    /// Messages per page
    pub page_size: usize,
    /// Stop listing after this many messages (None = follow every page)
    pub max_messages: Option<usize>,
}

impl FetchWindow {
    /// Single most recent message, no bounds
    pub fn bootstrap() -> Self {
        Self {
            mode: FetchMode::Bootstrap,
            lower_bound: None,
            upper_bound: None,
            page_size: 1,
            max_messages: Some(1),
        }
    }

    /// Everything received at or after the checkpoint time
    pub fn incremental(checkpoint: &Checkpoint, page_size: usize) -> Self {
        Self {
            mode: FetchMode::Incremental,
            lower_bound: Some(checkpoint.last_fetch_time),
            upper_bound: None,
            page_size: clamp_page_size(page_size),
            max_messages: None,
        }
    }

    /// `[local midnight, local midnight + 1 day)` expressed in UTC
    pub fn fixed_day(date: NaiveDate, offset: FixedOffset, page_size: usize) -> Self {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let start =
            (local_midnight - Duration::seconds(offset.local_minus_utc().into())).and_utc();
        Self {
            mode: FetchMode::FixedDay,
            lower_bound: Some(start),
            upper_bound: Some(start + Duration::days(1)),
            page_size: clamp_page_size(page_size),
            max_messages: None,
        }
    }

    /// Whether a receive time falls inside the window bounds
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.lower_bound.is_none_or(|lower| at >= lower)
            && self.upper_bound.is_none_or(|upper| at < upper)
    }
}

fn clamp_page_size(page_size: usize) -> usize {
    page_size.clamp(1, DEFAULT_PAGE_SIZE)
}

/// Choose the window for a cycle.
///
/// A day request never looks at the checkpoint; a checkpointed request
/// bootstraps when no checkpoint exists yet.
pub fn plan_window(
    request: CycleRequest,
    checkpoint: Option<&Checkpoint>,
    page_size: usize,
    offset: FixedOffset,
) -> FetchWindow {
    match (request, checkpoint) {
        (CycleRequest::Day(date), _) => FetchWindow::fixed_day(date, offset, page_size),
        (CycleRequest::Checkpointed, None) => FetchWindow::bootstrap(),
        (CycleRequest::Checkpointed, Some(cp)) => FetchWindow::incremental(cp, page_size),
    }
}

/// Drop the already-ingested tail of a newest-first batch.
///
/// Scanning stops at the message carrying the checkpoint's ID: it and
/// everything listed after it (older, or equal time but ordered later)
/// was seen by a previous cycle.
pub fn unseen_prefix(batch: Vec<RemoteMessage>, last_message_id: &MessageId) -> Vec<RemoteMessage> {
    batch
        .into_iter()
        .take_while(|m| &m.id != last_message_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, default_local_offset};
    use chrono::TimeZone;

    fn remote(id: &str, at: DateTime<Utc>) -> RemoteMessage {
        RemoteMessage {
            id: MessageId::new(id),
            subject: format!("subject {}", id),
            sender: EmailAddress::new("desk@example.com"),
            from: EmailAddress::new("desk@example.com"),
            to: Vec::new(),
            cc: Vec::new(),
            received_at: at,
            has_attachments: false,
        }
    }

    #[test]
    fn test_plan_bootstrap_without_checkpoint() {
        let window = plan_window(CycleRequest::Checkpointed, None, 1000, default_local_offset());
        assert_eq!(window.mode, FetchMode::Bootstrap);
        assert_eq!(window.lower_bound, None);
        assert_eq!(window.max_messages, Some(1));
    }

    #[test]
    fn test_plan_incremental_from_checkpoint() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 23, 15, 0, 0).unwrap();
        let cp = Checkpoint::new(t0, "x1", "subject");
        let window = plan_window(CycleRequest::Checkpointed, Some(&cp), 5000, default_local_offset());
        assert_eq!(window.mode, FetchMode::Incremental);
        assert_eq!(window.lower_bound, Some(t0));
        assert_eq!(window.upper_bound, None);
        assert_eq!(window.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_plan_fixed_day_ignores_checkpoint() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 23, 15, 0, 0).unwrap();
        let cp = Checkpoint::new(t0, "x1", "subject");
        let date = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let window = plan_window(CycleRequest::Day(date), Some(&cp), 1000, default_local_offset());

        assert_eq!(window.mode, FetchMode::FixedDay);
        // 2025-06-30 00:00 at +09:00 is 2025-06-29 15:00 UTC
        assert_eq!(
            window.lower_bound,
            Some(Utc.with_ymd_and_hms(2025, 6, 29, 15, 0, 0).unwrap())
        );
        assert_eq!(
            window.upper_bound,
            Some(Utc.with_ymd_and_hms(2025, 6, 30, 15, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_window_contains_is_half_open() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let window = FetchWindow::fixed_day(date, default_local_offset(), 1000);
        let start = window.lower_bound.unwrap();
        let end = window.upper_bound.unwrap();
        assert!(window.contains(start));
        assert!(!window.contains(end));
        assert!(window.contains(end - Duration::seconds(1)));
    }

    #[test]
    fn test_unseen_prefix_stops_at_checkpoint_id() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let t2 = t0 + Duration::minutes(5);
        let batch = vec![remote("x2", t2), remote("x1", t0), remote("x0", t0)];

        let fresh = unseen_prefix(batch, &MessageId::new("x1"));
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id.as_str(), "x2");
    }

    #[test]
    fn test_unseen_prefix_same_timestamp_tie() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let batch = vec![remote("m1", t), remote("m0", t), remote("m-1", t)];
        assert!(unseen_prefix(batch, &MessageId::new("m1")).is_empty());
    }

    #[test]
    fn test_unseen_prefix_checkpoint_missing_keeps_all() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let batch = vec![remote("a", t), remote("b", t)];
        assert_eq!(unseen_prefix(batch, &MessageId::new("gone")).len(), 2);
    }
}
