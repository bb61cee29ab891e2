//! Ingestion checkpoint (the durable "how far we have fetched" cursor)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Tracks ingestion progress for the mailbox
///
/// Persisted by the checkpoint store, never alongside the messages.
/// `last_fetch_time` never moves backwards across committed cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Receive time of the newest ingested message
    pub last_fetch_time: DateTime<Utc>,
    /// ID of the newest ingested message (tie-break for equal timestamps)
    pub last_message_id: MessageId,
    /// Subject of the newest ingested message, for operators only
    pub last_subject: String,
}

impl Checkpoint {
    pub fn new(
        last_fetch_time: DateTime<Utc>,
        last_message_id: impl Into<MessageId>,
        last_subject: impl Into<String>,
    ) -> Self {
        Self {
            last_fetch_time,
            last_message_id: last_message_id.into(),
            last_subject: last_subject.into(),
        }
    }

    /// Successor checkpoint after a committed cycle.
    ///
    /// The fetch time is clamped so it never regresses, even if the source
    /// returned something older than the window's lower bound.
    pub fn advanced(&self, next: Checkpoint) -> Checkpoint {
        if next.last_fetch_time < self.last_fetch_time {
            Checkpoint {
                last_fetch_time: self.last_fetch_time,
                ..next
            }
        } else {
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_advanced_moves_forward() {
        let cp = Checkpoint::new(at(1), "x1", "first");
        let next = cp.advanced(Checkpoint::new(at(2), "x2", "second"));
        assert_eq!(next.last_fetch_time, at(2));
        assert_eq!(next.last_message_id.as_str(), "x2");
    }

    #[test]
    fn test_advanced_never_regresses() {
        let cp = Checkpoint::new(at(5), "x1", "first");
        let next = cp.advanced(Checkpoint::new(at(3), "x0", "stale"));
        assert_eq!(next.last_fetch_time, at(5));
        assert_eq!(next.last_message_id.as_str(), "x0");
    }
}
