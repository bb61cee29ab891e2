//! Domain models for ingested mail

mod checkpoint;
mod message;

use chrono::{FixedOffset, Offset, Utc};

pub use checkpoint::Checkpoint;
pub use message::{
    AttachmentRef, EmailAddress, IngestedMessage, IngestedMessageBuilder, MessageId,
    join_addresses, split_addresses,
};

/// Offset of the mailbox owner's local time (+09:00)
pub const DEFAULT_LOCAL_OFFSET_HOURS: i32 = 9;

/// Build a fixed offset from whole hours, `None` outside ±23h
pub fn local_offset(hours: i32) -> Option<FixedOffset> {
    if !(-23..=23).contains(&hours) {
        return None;
    }
    FixedOffset::east_opt(hours * 3600)
}

/// The default local offset (+09:00)
pub fn default_local_offset() -> FixedOffset {
    local_offset(DEFAULT_LOCAL_OFFSET_HOURS).unwrap_or_else(|| Utc.fix())
}
