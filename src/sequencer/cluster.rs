/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! In-process stand-in for the replication runtime.
//!
//! [`LocalCluster`] hosts a set of [`ClusteredService`] replicas over one
//! shared [`InMemoryJournal`]. Every replica applies every log entry in the
//! same order; only the leader's publications are appended to the log,
//! mirroring a consensus runtime where followers' egress is discarded. It
//! can take snapshots and restart replicas from them, which is enough to
//! exercise convergence without a real network.

use super::journal::{InMemoryJournal, Journal, JournalError};
use super::service::{ChunkedImage, ClusteredService, NullPublication, Role, SnapshotImage};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;

/// Errors raised while driving a [`LocalCluster`].
#[derive(Debug, Error)]
pub enum ClusterError<E>
where
    E: std::error::Error + 'static,
{
    /// A replica returned an error from one of its callbacks.
    #[error("replica {replica} failed at position {position}: {source}")]
    Service {
        /// Index of the failing replica.
        replica: usize,
        /// Log position being applied (or snapshotted).
        position: u64,
        /// The service's error.
        #[source]
        source: E,
    },

    /// The shared log refused an entry.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// No replica exists at the given index.
    #[error("no replica at index {0}")]
    UnknownReplica(usize),
}

/// A snapshot taken from a replica, with the log position it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    /// Last log position reflected in the snapshot.
    pub position: u64,

    /// Everything the replica published while snapshotting.
    pub chunks: Vec<Bytes>,
}

impl StoredSnapshot {
    /// Returns the snapshot as one contiguous record.
    #[must_use]
    pub fn to_record(&self) -> Bytes {
        let mut record = BytesMut::new();
        for chunk in &self.chunks {
            record.extend_from_slice(chunk);
        }
        record.freeze()
    }

    /// Returns an image delivering the record in `chunk_size` fragments.
    #[must_use]
    pub fn image(&self, chunk_size: usize) -> ChunkedImage {
        ChunkedImage::split(&self.to_record(), chunk_size)
    }
}

#[derive(Debug)]
struct Replica<S> {
    service: S,
    /// Last log position applied.
    position: u64,
    /// Log head when the replica started. Entries up to here are catch-up and
    /// must not be published again.
    caught_up_at: u64,
}

impl<S> Replica<S> {
    fn new(service: S, position: u64, head: u64) -> Self {
        Self {
            service,
            position,
            caught_up_at: head.max(position),
        }
    }
}

/// Fake runtime driving replicas over a shared in-memory log.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::{ChannelId, HeartbeatSequencer};
/// use heartbeat_sequencer::sequencer::cluster::LocalCluster;
/// use heartbeat_sequencer::sequencer::message::encode_request;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = ChannelId::new(0)?;
/// let mut cluster = LocalCluster::new();
/// for node in 0..3 {
///     cluster.add_replica(HeartbeatSequencer::new(node, channel))?;
/// }
/// cluster.submit(encode_request(0))?;
/// cluster.run_until_idle()?;
/// for index in 0..3 {
///     assert_eq!(cluster.replica(index).unwrap().last_response_tx_id(channel), 1);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LocalCluster<S> {
    journal: InMemoryJournal,
    replicas: Vec<Replica<S>>,
    leader: usize,
}

impl<S> Default for LocalCluster<S>
where
    S: ClusteredService,
    S::Error: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> LocalCluster<S>
where
    S: ClusteredService,
    S::Error: 'static,
{
    /// Creates an empty cluster whose first replica will lead.
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(InMemoryJournal::new())
    }

    /// Creates an empty cluster over an existing log.
    #[must_use]
    pub fn with_journal(journal: InMemoryJournal) -> Self {
        Self {
            journal,
            replicas: Vec::new(),
            leader: 0,
        }
    }

    /// Starts `service` with no snapshot and adds it at log position 0.
    ///
    /// Returns the replica's index.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Service`] if `on_start` fails.
    pub fn add_replica(&mut self, service: S) -> Result<usize, ClusterError<S::Error>> {
        self.start_replica(service, None, 0)
    }

    /// Starts `service` from `snapshot`, delivered in `chunk_size`
    /// fragments, and adds it at the snapshot's log position.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Service`] if `on_start` fails.
    pub fn add_replica_from_snapshot(
        &mut self,
        service: S,
        snapshot: &StoredSnapshot,
        chunk_size: usize,
    ) -> Result<usize, ClusterError<S::Error>> {
        let mut image = snapshot.image(chunk_size);
        self.start_replica(service, Some(&mut image), snapshot.position)
    }

    fn start_replica(
        &mut self,
        mut service: S,
        image: Option<&mut dyn SnapshotImage>,
        position: u64,
    ) -> Result<usize, ClusterError<S::Error>> {
        let index = self.replicas.len();
        service
            .on_start(image)
            .map_err(|source| ClusterError::Service {
                replica: index,
                position,
                source,
            })?;
        service.on_role_change(if index == self.leader {
            Role::Leader
        } else {
            Role::Follower
        });
        let head = self.journal.last_position().unwrap_or(0);
        self.replicas.push(Replica::new(service, position, head));
        Ok(index)
    }

    /// Replaces replica `index` with `service`, restarted from `snapshot`
    /// (or from scratch when `None`). The old service is terminated.
    ///
    /// # Errors
    ///
    /// - [`ClusterError::UnknownReplica`] if `index` is out of range
    /// - [`ClusterError::Service`] if `on_start` fails
    pub fn restart_replica(
        &mut self,
        index: usize,
        mut service: S,
        snapshot: Option<&StoredSnapshot>,
        chunk_size: usize,
    ) -> Result<(), ClusterError<S::Error>> {
        if index >= self.replicas.len() {
            return Err(ClusterError::UnknownReplica(index));
        }
        let position = snapshot.map_or(0, |s| s.position);
        let mut image = snapshot.map(|s| s.image(chunk_size));
        service
            .on_start(image.as_mut().map(|i| i as &mut dyn SnapshotImage))
            .map_err(|source| ClusterError::Service {
                replica: index,
                position,
                source,
            })?;
        service.on_role_change(if index == self.leader {
            Role::Leader
        } else {
            Role::Follower
        });

        let head = self.journal.last_position().unwrap_or(0);
        let old = std::mem::replace(
            &mut self.replicas[index],
            Replica::new(service, position, head),
        );
        let mut old_service = old.service;
        old_service.on_terminate();
        Ok(())
    }

    /// Makes replica `index` the leader.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownReplica`] if `index` is out of range.
    pub fn set_leader(&mut self, index: usize) -> Result<(), ClusterError<S::Error>> {
        if index >= self.replicas.len() {
            return Err(ClusterError::UnknownReplica(index));
        }
        if index != self.leader {
            if let Some(old) = self.replicas.get_mut(self.leader) {
                old.service.on_role_change(Role::Follower);
            }
            self.replicas[index].service.on_role_change(Role::Leader);
            self.leader = index;
        }
        Ok(())
    }

    /// Appends a client message to the log. Returns its position.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Journal`] if the log refuses the entry.
    pub fn submit(&mut self, message: impl Into<Bytes>) -> Result<u64, ClusterError<S::Error>> {
        Ok(self.journal.append(message.into())?)
    }

    /// Delivers log entries until every replica has applied the whole log,
    /// including entries appended by the leader along the way.
    ///
    /// A replica's publications only enter the log while it leads and once it
    /// has caught up with the log head it started at.
    ///
    /// Returns the number of deliveries made.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Service`] if a replica fails to apply an entry.
    pub fn run_until_idle(&mut self) -> Result<u64, ClusterError<S::Error>> {
        let mut delivered = 0u64;
        loop {
            let mut progressed = false;
            for index in 0..self.replicas.len() {
                while let Some(entry) = self.journal.get(self.replicas[index].position + 1).cloned()
                {
                    let replica = &mut self.replicas[index];
                    let publishes = index == self.leader && entry.position > replica.caught_up_at;
                    let result = if publishes {
                        replica.service.on_message(&mut self.journal, &entry.payload)
                    } else {
                        replica.service.on_message(&mut NullPublication, &entry.payload)
                    };
                    result.map_err(|source| ClusterError::Service {
                        replica: index,
                        position: entry.position,
                        source,
                    })?;
                    replica.position = entry.position;
                    delivered += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        debug!(delivered, last_position = ?self.journal.last_position(), "cluster idle");
        Ok(delivered)
    }

    /// Asks replica `index` for a snapshot of its current state.
    ///
    /// # Errors
    ///
    /// - [`ClusterError::UnknownReplica`] if `index` is out of range
    /// - [`ClusterError::Service`] if the snapshot fails
    pub fn take_snapshot(&mut self, index: usize) -> Result<StoredSnapshot, ClusterError<S::Error>> {
        let replica = self
            .replicas
            .get_mut(index)
            .ok_or(ClusterError::UnknownReplica(index))?;
        let mut chunks: Vec<Bytes> = Vec::new();
        replica
            .service
            .on_take_snapshot(&mut chunks)
            .map_err(|source| ClusterError::Service {
                replica: index,
                position: replica.position,
                source,
            })?;
        Ok(StoredSnapshot {
            position: replica.position,
            chunks,
        })
    }

    /// Terminates every replica.
    pub fn shutdown(mut self) {
        for replica in &mut self.replicas {
            replica.service.on_terminate();
        }
    }

    /// Returns replica `index`, if any.
    #[must_use]
    pub fn replica(&self, index: usize) -> Option<&S> {
        self.replicas.get(index).map(|r| &r.service)
    }

    /// Returns the last log position applied by replica `index`.
    #[must_use]
    pub fn replica_position(&self, index: usize) -> Option<u64> {
        self.replicas.get(index).map(|r| r.position)
    }

    /// Number of replicas.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Index of the current leader.
    #[must_use]
    pub fn leader(&self) -> usize {
        self.leader
    }

    /// The shared log.
    #[must_use]
    pub fn journal(&self) -> &InMemoryJournal {
        &self.journal
    }

    /// Mutable access to the shared log, e.g. to simulate backpressure.
    pub fn journal_mut(&mut self) -> &mut InMemoryJournal {
        &mut self.journal
    }
}
