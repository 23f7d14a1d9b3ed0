//! Resume planning: derive the starting cursor for a run from the last
//! saved progress record.

use crate::progress::ProgressRecord;

/// Where a run starts: indices into the space list, the current space's
/// page list, and that space's batch numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub space_index: usize,
    pub page_index: usize,
    pub batch_index: usize,
}

impl ResumePoint {
    pub fn start() -> Self {
        Self {
            space_index: 0,
            page_index: 0,
            batch_index: 0,
        }
    }
}

/// Replay the saved cursor verbatim; a record whose cursor was never set
/// starts from the beginning. No validation against the newly-discovered
/// work list happens here; an index past the end of a shrunken corpus
/// simply produces an empty remainder in the ingest loops.
pub fn plan(record: &ProgressRecord) -> ResumePoint {
    match &record.current_progress {
        Some(cursor) => ResumePoint {
            space_index: cursor.current_space_index,
            page_index: cursor.current_page_index,
            batch_index: cursor.current_batch_index,
        },
        None => ResumePoint::start(),
    }
}
