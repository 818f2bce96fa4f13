/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Journal trait and in-memory implementation of the replicated log.
//!
//! A journal is an append-only sequence of opaque message payloads, each
//! stamped with a 1-based position. It stands in for the replicated log the
//! hosting runtime maintains: client requests and the responses replicas
//! publish both end up here, in the single total order every replica sees.

use super::service::Publication;
use bytes::Bytes;
use thiserror::Error;

/// Errors raised by journal operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JournalError {
    /// The journal holds as many entries as it is allowed to.
    #[error("journal is full ({capacity} entries)")]
    Full {
        /// The entry limit.
        capacity: usize,
    },
}

/// One entry of the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// 1-based position in the log.
    pub position: u64,

    /// The replicated message.
    pub payload: Bytes,
}

/// Append-only log of replicated messages.
///
/// Implementations must preserve insertion order and assign consecutive
/// positions starting at 1.
pub trait Journal {
    /// Appends a payload and returns its position.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the entry cannot be stored.
    fn append(&mut self, payload: Bytes) -> Result<u64, JournalError>;

    /// Returns an iterator over all entries with `position >= from_position`.
    fn read_from(&self, from_position: u64) -> impl Iterator<Item = &LogEntry> + '_;

    /// Returns an iterator over entries with
    /// `from_position <= position <= to_position`.
    fn read_range(
        &self,
        from_position: u64,
        to_position: u64,
    ) -> impl Iterator<Item = &LogEntry> + '_;

    /// Returns the total number of entries stored.
    #[must_use]
    fn len(&self) -> usize;

    /// Returns `true` if nothing has been appended.
    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the position of the last entry, or `None` if empty.
    #[must_use]
    fn last_position(&self) -> Option<u64>;
}

/// In-memory [`Journal`] that also accepts offers as a [`Publication`].
///
/// Offers can be made to fail on demand with
/// [`reject_next`](Self::reject_next), which simulates a transport under
/// backpressure.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::journal::{InMemoryJournal, Journal};
/// use heartbeat_sequencer::sequencer::service::Publication;
///
/// let mut journal = InMemoryJournal::new();
/// journal.reject_next(1);
/// assert!(!journal.offer(b"\x0f"));
/// assert!(journal.offer(b"\x0f"));
/// assert_eq!(journal.len(), 1);
/// assert_eq!(journal.rejected_offers(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryJournal {
    entries: Vec<LogEntry>,
    capacity_limit: Option<usize>,
    reject_remaining: u64,
    rejected_offers: u64,
}

impl InMemoryJournal {
    /// Creates a new empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new journal with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Creates a journal that refuses entries past `limit`.
    #[must_use]
    pub fn bounded(limit: usize) -> Self {
        Self {
            capacity_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Makes the next `count` offers fail.
    pub fn reject_next(&mut self, count: u64) {
        self.reject_remaining = count;
    }

    /// Number of offers refused so far.
    #[must_use]
    pub fn rejected_offers(&self) -> u64 {
        self.rejected_offers
    }

    /// Returns a slice of all stored entries.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns the entry at `position`, if any.
    #[must_use]
    pub fn get(&self, position: u64) -> Option<&LogEntry> {
        let index = usize::try_from(position.checked_sub(1)?).ok()?;
        self.entries.get(index)
    }
}

impl Journal for InMemoryJournal {
    fn append(&mut self, payload: Bytes) -> Result<u64, JournalError> {
        if let Some(capacity) = self.capacity_limit.filter(|&c| self.entries.len() >= c) {
            return Err(JournalError::Full { capacity });
        }
        let position = self.entries.len() as u64 + 1;
        self.entries.push(LogEntry { position, payload });
        Ok(position)
    }

    fn read_from(&self, from_position: u64) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.position >= from_position)
    }

    fn read_range(
        &self,
        from_position: u64,
        to_position: u64,
    ) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.position >= from_position && e.position <= to_position)
    }

    #[inline]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn last_position(&self) -> Option<u64> {
        self.entries.last().map(|e| e.position)
    }
}

impl Publication for InMemoryJournal {
    fn offer(&mut self, message: &[u8]) -> bool {
        if self.reject_remaining > 0 {
            self.reject_remaining -= 1;
            self.rejected_offers += 1;
            return false;
        }
        match self.append(Bytes::copy_from_slice(message)) {
            Ok(_) => true,
            Err(JournalError::Full { .. }) => {
                self.rejected_offers += 1;
                false
            }
        }
    }
}
