/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Deterministic replay of the replicated log.
//!
//! [`ReplayEngine`] re-applies a [`Journal`] suffix to a sequencer, optionally
//! restored from a snapshot first. Because the state machine is
//! deterministic, a replica rebuilt this way ends in the same state as the
//! peers that applied the log live. Responses produced while replaying are
//! discarded: they are already recorded further down the log.
//!
//! # Examples
//!
//! ```
//! use heartbeat_sequencer::sequencer::ChannelId;
//! use heartbeat_sequencer::sequencer::journal::{InMemoryJournal, Journal};
//! use heartbeat_sequencer::sequencer::message::encode_request;
//! use heartbeat_sequencer::sequencer::replay::ReplayEngine;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut journal = InMemoryJournal::new();
//! journal.append(encode_request(0))?;
//! let (sequencer, last_position) = ReplayEngine::replay_from(&journal, 0, 0, ChannelId::new(0)?)?;
//! assert_eq!(last_position, 1);
//! assert_eq!(sequencer.last_request_tx_id(), 1);
//! # Ok(())
//! # }
//! ```

use super::core::{HeartbeatSequencer, SequencerError};
use super::journal::{Journal, LogEntry};
use super::message::ChannelId;
use super::retry::{IdleStrategy, NoOpIdleStrategy};
use super::service::NullPublication;
use super::snapshot::SequencerSnapshot;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during journal replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The journal contains no entries to replay.
    #[error("journal is empty, nothing to replay")]
    EmptyJournal,

    /// The requested starting position exceeds the journal's last entry.
    #[error("invalid from_position {from_position}: journal last position is {last_position}")]
    InvalidPosition {
        /// The position requested.
        from_position: u64,
        /// The last position in the journal.
        last_position: u64,
    },

    /// The sequencer failed while applying an entry.
    #[error("sequencer error during replay at position {position}: {source}")]
    Sequencer {
        /// Position of the entry that failed.
        position: u64,
        /// The underlying error.
        #[source]
        source: SequencerError,
    },
}

/// Stateless replay engine that rebuilds sequencer state from a [`Journal`].
///
/// All methods are associated functions; `ReplayEngine` is a namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayEngine;

impl ReplayEngine {
    /// Replays entries from `from_position` onwards onto a fresh sequencer.
    ///
    /// Returns the rebuilt sequencer and the position of the last entry
    /// applied.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::EmptyJournal`] if the journal has no entries
    /// - [`ReplayError::InvalidPosition`] if `from_position` is past the end
    pub fn replay_from(
        journal: &impl Journal,
        from_position: u64,
        node_id: u32,
        channel: ChannelId,
    ) -> Result<(HeartbeatSequencer<NoOpIdleStrategy>, u64), ReplayError> {
        let sequencer = HeartbeatSequencer::new(node_id, channel).with_idle_strategy(NoOpIdleStrategy);
        Self::replay_onto(sequencer, journal, from_position, |_, _| {})
    }

    /// Restores `snapshot`, then replays the entries the snapshot does not
    /// cover (`position > snapshot_position`).
    ///
    /// # Errors
    ///
    /// Same as [`replay_from`](Self::replay_from), except that a snapshot
    /// covering the whole journal is not an error.
    pub fn restore_and_replay(
        snapshot: SequencerSnapshot,
        snapshot_position: u64,
        journal: &impl Journal,
        node_id: u32,
        channel: ChannelId,
    ) -> Result<(HeartbeatSequencer<NoOpIdleStrategy>, u64), ReplayError> {
        let mut sequencer =
            HeartbeatSequencer::new(node_id, channel).with_idle_strategy(NoOpIdleStrategy);
        sequencer
            .restore(snapshot)
            .map_err(|source| ReplayError::Sequencer {
                position: snapshot_position,
                source,
            })?;

        if journal
            .last_position()
            .is_none_or(|last| snapshot_position >= last)
        {
            return Ok((sequencer, snapshot_position));
        }
        Self::replay_onto(sequencer, journal, snapshot_position + 1, |_, _| {})
    }

    /// Replays entries onto an existing sequencer, calling `progress` after
    /// each entry with `(entries_applied, position)`.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::EmptyJournal`] if the journal has no entries
    /// - [`ReplayError::InvalidPosition`] if `from_position` is past the end
    /// - [`ReplayError::Sequencer`] if an entry cannot be applied
    pub fn replay_onto<I: IdleStrategy>(
        mut sequencer: HeartbeatSequencer<I>,
        journal: &impl Journal,
        from_position: u64,
        progress: impl Fn(u64, u64),
    ) -> Result<(HeartbeatSequencer<I>, u64), ReplayError> {
        Self::check_bounds(journal, from_position)?;

        let mut sink = NullPublication;
        let mut last_position = 0u64;
        let mut count = 0u64;

        for entry in journal.read_from(from_position) {
            sequencer
                .apply(&mut sink, &entry.payload)
                .map_err(|source| ReplayError::Sequencer {
                    position: entry.position,
                    source,
                })?;
            last_position = entry.position;
            count = count.saturating_add(1);
            progress(count, last_position);
        }

        debug!(count, last_position, channel = %sequencer.channel(), "replay complete");
        Ok((sequencer, last_position))
    }

    /// Returns the entries with `from_position <= position <= to_position`.
    ///
    /// No sequencer is built; this is a plain slice of the journal.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::EmptyJournal`] if the journal has no entries
    /// - [`ReplayError::InvalidPosition`] if `from_position` is past the end
    pub fn replay_range(
        journal: &impl Journal,
        from_position: u64,
        to_position: u64,
    ) -> Result<Vec<&LogEntry>, ReplayError> {
        Self::check_bounds(journal, from_position)?;
        Ok(journal.read_range(from_position, to_position).collect())
    }

    /// Replays the full journal and compares the result to `expected`.
    ///
    /// # Errors
    ///
    /// Same as [`replay_from`](Self::replay_from).
    pub fn verify(
        journal: &impl Journal,
        node_id: u32,
        channel: ChannelId,
        expected: &SequencerSnapshot,
    ) -> Result<bool, ReplayError> {
        let (sequencer, _) = Self::replay_from(journal, 0, node_id, channel)?;
        Ok(sequencer.snapshot() == *expected)
    }

    fn check_bounds(journal: &impl Journal, from_position: u64) -> Result<(), ReplayError> {
        let Some(last_position) = journal.last_position() else {
            return Err(ReplayError::EmptyJournal);
        };
        if from_position > last_position {
            return Err(ReplayError::InvalidPosition {
                from_position,
                last_position,
            });
        }
        Ok(())
    }
}
