/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Boundary between the state machine and its hosting replication runtime.
//!
//! The runtime delivers replicated messages one at a time, in the same total
//! order on every replica, and never re-enters a service. These traits are the
//! whole contract: anything that can offer bytes into a log is a
//! [`Publication`], anything that can hand back a saved snapshot in chunks is
//! a [`SnapshotImage`], and the service itself is a [`ClusteredService`].

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;

/// Non-blocking sink into the replicated log (or a snapshot stream).
pub trait Publication {
    /// Attempts to append `message`.
    ///
    /// Returns `false` when the transport cannot take the message right now;
    /// the caller is expected to retry.
    fn offer(&mut self, message: &[u8]) -> bool;
}

/// Publication that accepts and drops everything.
///
/// Used while replaying a log whose responses are already recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublication;

impl Publication for NullPublication {
    #[inline]
    fn offer(&mut self, _message: &[u8]) -> bool {
        true
    }
}

impl Publication for Vec<Bytes> {
    fn offer(&mut self, message: &[u8]) -> bool {
        self.push(Bytes::copy_from_slice(message));
        true
    }
}

/// Result of polling a [`SnapshotImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePoll {
    /// The next fragment of the saved snapshot.
    Chunk(Bytes),

    /// Nothing available yet; poll again.
    Pending,

    /// The image has no more data.
    EndOfStream,
}

/// Lazily produced stream of snapshot fragments.
pub trait SnapshotImage {
    /// Polls for the next fragment.
    fn poll(&mut self) -> ImagePoll;
}

/// In-memory [`SnapshotImage`] replaying a scripted sequence of polls.
///
/// Once the script is exhausted every poll returns
/// [`ImagePoll::EndOfStream`].
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::service::{ChunkedImage, ImagePoll, SnapshotImage};
///
/// let mut image = ChunkedImage::split(&[1u8, 2, 3, 4, 5], 2);
/// assert_eq!(image.poll(), ImagePoll::Chunk(vec![1u8, 2].into()));
/// assert_eq!(image.poll(), ImagePoll::Chunk(vec![3u8, 4].into()));
/// assert_eq!(image.poll(), ImagePoll::Chunk(vec![5u8].into()));
/// assert_eq!(image.poll(), ImagePoll::EndOfStream);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChunkedImage {
    script: VecDeque<ImagePoll>,
}

impl ChunkedImage {
    /// Creates an image with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }

    /// Creates an image delivering `record` as fragments of at most
    /// `chunk_size` bytes.
    #[must_use]
    pub fn split(record: &[u8], chunk_size: usize) -> Self {
        let mut image = Self::new();
        for chunk in record.chunks(chunk_size.max(1)) {
            image.push_chunk(Bytes::copy_from_slice(chunk));
        }
        image
    }

    /// Appends a fragment to the script.
    pub fn push_chunk(&mut self, chunk: impl Into<Bytes>) -> &mut Self {
        self.script.push_back(ImagePoll::Chunk(chunk.into()));
        self
    }

    /// Appends `count` empty polls to the script.
    pub fn push_pending(&mut self, count: usize) -> &mut Self {
        self.script
            .extend(std::iter::repeat_n(ImagePoll::Pending, count));
        self
    }

    /// Returns `true` once every scripted poll has been consumed.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.script.is_empty()
    }
}

impl SnapshotImage for ChunkedImage {
    fn poll(&mut self) -> ImagePoll {
        self.script.pop_front().unwrap_or(ImagePoll::EndOfStream)
    }
}

/// Cluster role of the hosting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Following the leader's log.
    Follower,
    /// Standing for election.
    Candidate,
    /// Appending to the log.
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => write!(f, "FOLLOWER"),
            Self::Candidate => write!(f, "CANDIDATE"),
            Self::Leader => write!(f, "LEADER"),
        }
    }
}

/// A deterministic service hosted by a replication runtime.
///
/// The runtime calls [`on_start`](Self::on_start) exactly once, before any
/// message, then [`on_message`](Self::on_message) for every log entry in
/// order, interleaved with [`on_take_snapshot`](Self::on_take_snapshot) at
/// runtime-chosen points. Calls never overlap.
pub trait ClusteredService {
    /// Error surfaced to the runtime.
    type Error: std::error::Error;

    /// Starts the service, restoring from `snapshot` when one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be restored.
    fn on_start(&mut self, snapshot: Option<&mut dyn SnapshotImage>) -> Result<(), Self::Error>;

    /// Applies one replicated message.
    ///
    /// # Errors
    ///
    /// Returns an error if a required publication could not be completed.
    fn on_message(
        &mut self,
        publication: &mut dyn Publication,
        message: &[u8],
    ) -> Result<(), Self::Error>;

    /// Writes the current state to `publication`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be published.
    fn on_take_snapshot(&mut self, publication: &mut dyn Publication) -> Result<(), Self::Error>;

    /// A client session was opened.
    fn on_session_open(&mut self, _session_id: u64) {}

    /// A client session was closed.
    fn on_session_close(&mut self, _session_id: u64) {}

    /// The hosting node changed role.
    fn on_role_change(&mut self, _role: Role) {}

    /// A scheduled timer fired.
    fn on_timer_event(&mut self, _correlation_id: u64) {}

    /// The runtime is shutting the service down.
    fn on_terminate(&mut self) {}
}
