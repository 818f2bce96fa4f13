/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Fixed-size snapshot record and its loader.
//!
//! A snapshot is exactly [`SNAPSHOT_LENGTH`] bytes: four big-endian `u64`
//! fields at fixed offsets, with no magic number, version, or length prefix.
//!
//! | offset | field                          |
//! |--------|--------------------------------|
//! | 0      | last response id, channel 0    |
//! | 8      | last response id, channel 1    |
//! | 16     | last response id, channel 2    |
//! | 24     | last request id                |
//!
//! Any change to this layout breaks snapshot interchange between replicas
//! running different versions.

use super::message::{CHANNEL_COUNT, ChannelId};
use super::retry::{IdleStrategy, PublishError, RetryPolicy};
use super::service::{ImagePoll, SnapshotImage};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Length of an encoded snapshot record.
pub const SNAPSHOT_LENGTH: usize = (CHANNEL_COUNT + 1) * size_of::<u64>();

/// Errors raised while saving or loading a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The image ended before a full record was read.
    #[error("truncated snapshot: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes received before the end of the image.
        actual: usize,
    },

    /// The image kept reporting no data until the retry budget ran out.
    #[error("snapshot image stalled after {polls} polls")]
    Stalled {
        /// Number of polls made.
        polls: u64,
    },

    /// The snapshot record could not be published.
    #[error("failed to publish snapshot: {0}")]
    Publish(#[from] PublishError),
}

/// What to do when a snapshot image ends before a full record arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncatedSnapshotPolicy {
    /// Start from zeroed state and log a warning.
    #[default]
    UseDefaults,

    /// Abort startup with [`SnapshotError::Truncated`].
    Fail,
}

/// The persisted counters of a sequencer.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::snapshot::{SequencerSnapshot, SNAPSHOT_LENGTH};
///
/// let snapshot = SequencerSnapshot::new([7, 0, 3], 12);
/// let bytes = snapshot.encode();
/// assert_eq!(bytes.len(), SNAPSHOT_LENGTH);
/// assert_eq!(SequencerSnapshot::decode(&bytes).unwrap(), snapshot);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequencerSnapshot {
    /// Last transaction id seen on each channel, indexed by channel.
    pub last_response_tx_ids: [u64; CHANNEL_COUNT],

    /// Last transaction id assigned to a client request.
    pub last_request_tx_id: u64,
}

impl SequencerSnapshot {
    /// Creates a snapshot from its fields.
    #[must_use]
    pub const fn new(last_response_tx_ids: [u64; CHANNEL_COUNT], last_request_tx_id: u64) -> Self {
        Self {
            last_response_tx_ids,
            last_request_tx_id,
        }
    }

    /// Last transaction id seen on `channel`.
    #[inline]
    #[must_use]
    pub const fn last_response_tx_id(&self, channel: ChannelId) -> u64 {
        self.last_response_tx_ids[channel.index()]
    }

    /// Encodes the snapshot into its fixed record.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SNAPSHOT_LENGTH);
        for tx_id in self.last_response_tx_ids {
            buf.put_u64(tx_id);
        }
        buf.put_u64(self.last_request_tx_id);
        buf.freeze()
    }

    /// Decodes a snapshot from the first [`SNAPSHOT_LENGTH`] bytes of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Truncated`] if `record` is too short.
    pub fn decode(record: &[u8]) -> Result<Self, SnapshotError> {
        if record.len() < SNAPSHOT_LENGTH {
            return Err(SnapshotError::Truncated {
                expected: SNAPSHOT_LENGTH,
                actual: record.len(),
            });
        }
        let mut buf = &record[..SNAPSHOT_LENGTH];
        let mut last_response_tx_ids = [0u64; CHANNEL_COUNT];
        for slot in &mut last_response_tx_ids {
            *slot = buf.get_u64();
        }
        Ok(Self::new(last_response_tx_ids, buf.get_u64()))
    }
}

/// Reads a snapshot record from a possibly fragmented image.
///
/// Fragments are accumulated until [`SNAPSHOT_LENGTH`] bytes have arrived or
/// the image signals end-of-stream, whichever comes first. Bytes past the
/// record are ignored. `retry` bounds how long the loader keeps polling an
/// image that reports [`ImagePoll::Pending`] or hands back empty chunks.
///
/// Returns `Ok(None)` when the image ended early and `truncated` is
/// [`TruncatedSnapshotPolicy::UseDefaults`].
///
/// # Errors
///
/// - [`SnapshotError::Truncated`] if the image ended early under
///   [`TruncatedSnapshotPolicy::Fail`]
/// - [`SnapshotError::Stalled`] if the retry budget ran out
pub fn load_image<S, I>(
    image: &mut S,
    idle: &mut I,
    retry: &RetryPolicy,
    truncated: TruncatedSnapshotPolicy,
) -> Result<Option<SequencerSnapshot>, SnapshotError>
where
    S: SnapshotImage + ?Sized,
    I: IdleStrategy + ?Sized,
{
    let mut record = BytesMut::with_capacity(SNAPSHOT_LENGTH);
    let mut budget = retry.start();
    idle.reset();

    loop {
        budget.record_attempt();
        match image.poll() {
            ImagePoll::Chunk(chunk) => {
                let wanted = SNAPSHOT_LENGTH - record.len();
                if chunk.len() > wanted {
                    debug!(
                        extra = chunk.len() - wanted,
                        "ignoring bytes past the snapshot record"
                    );
                }
                record.extend_from_slice(&chunk[..chunk.len().min(wanted)]);
                if record.len() == SNAPSHOT_LENGTH {
                    return SequencerSnapshot::decode(&record).map(Some);
                }
                // An empty chunk is no progress
                if chunk.is_empty() && budget.is_exhausted() {
                    return Err(SnapshotError::Stalled {
                        polls: budget.attempts(),
                    });
                }
                idle.idle_with(chunk.len());
            }
            ImagePoll::Pending => {
                if budget.is_exhausted() {
                    return Err(SnapshotError::Stalled {
                        polls: budget.attempts(),
                    });
                }
                idle.idle();
            }
            ImagePoll::EndOfStream => {
                return match truncated {
                    TruncatedSnapshotPolicy::Fail => Err(SnapshotError::Truncated {
                        expected: SNAPSHOT_LENGTH,
                        actual: record.len(),
                    }),
                    TruncatedSnapshotPolicy::UseDefaults => {
                        warn!(
                            received = record.len(),
                            expected = SNAPSHOT_LENGTH,
                            "snapshot image ended early, starting from defaults"
                        );
                        Ok(None)
                    }
                };
            }
        }
    }
}
