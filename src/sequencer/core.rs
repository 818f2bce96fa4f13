/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Core sequencer state machine.
//!
//! [`HeartbeatSequencer`] owns every piece of mutable state of one channel's
//! replica: the request counter, the last transaction id seen per channel, and
//! the duplicate-tracking set. It is driven synchronously by the hosting
//! runtime, one replicated message at a time, so it needs no locks and never
//! spawns work of its own.

use super::event::Diagnostic;
use super::message::{CHANNEL_COUNT, ChannelId, MessageType, TxResponse};
use super::result::{ApplyOutcome, IgnoreReason};
use super::retry::{BackoffIdleStrategy, IdleStrategy, PublishError, RetryPolicy, offer_with_retry};
use super::seen::{SeenRetention, SeenSet};
use super::service::{ClusteredService, Publication, Role, SnapshotImage};
use super::snapshot::{SequencerSnapshot, SnapshotError, TruncatedSnapshotPolicy, load_image};
use crate::config::{ConfigError, HeartbeatConfig};
use crate::logging::{FileLogSink, LogSinkError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Dispatch, debug, info, warn};

/// Type alias for diagnostic listener functions.
type DiagnosticListener = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Errors surfaced by the sequencer to its hosting runtime.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// A response or snapshot could not be offered within the retry budget.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The startup snapshot could not be loaded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// A snapshot was loaded after messages had already been applied.
    #[error("cannot restore a snapshot after {messages_applied} messages were applied")]
    AlreadyStarted {
        /// Messages applied before the restore attempt.
        messages_applied: u64,
    },

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The per-channel log sink could not be opened.
    #[error(transparent)]
    LogSink(#[from] LogSinkError),
}

/// Replicated state machine that sequences client requests and validates the
/// transaction ids on its own response channel.
///
/// Each instance owns its counters outright; hosting several channels in one
/// process means constructing one sequencer per channel.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::{ApplyOutcome, ChannelId, HeartbeatSequencer};
/// use heartbeat_sequencer::sequencer::message::encode_request;
/// use heartbeat_sequencer::sequencer::journal::{InMemoryJournal, Journal};
///
/// let mut sequencer = HeartbeatSequencer::new(0, ChannelId::new(1).unwrap());
/// let mut log = InMemoryJournal::new();
///
/// let outcome = sequencer.apply(&mut log, &encode_request(0)).unwrap();
/// assert_eq!(outcome, ApplyOutcome::RequestSequenced { tx_id: 1 });
/// assert_eq!(log.len(), 1);
/// ```
pub struct HeartbeatSequencer<I = BackoffIdleStrategy> {
    node_id: u32,
    channel: ChannelId,

    /// Last transaction id assigned to a client request.
    last_request_tx_id: u64,

    /// Last transaction id seen on each channel.
    last_response_tx_ids: [u64; CHANNEL_COUNT],

    /// Ids observed on the validation path, for duplicate detection.
    seen: SeenSet,

    idle: I,
    publish_retry: RetryPolicy,
    snapshot_retry: RetryPolicy,
    truncated_snapshot: TruncatedSnapshotPolicy,

    /// Listeners called synchronously for each diagnostic.
    listeners: Vec<DiagnosticListener>,

    /// Per-instance log destination; `None` logs to the global subscriber.
    log_sink: Option<Dispatch>,

    messages_applied: u64,
}

impl HeartbeatSequencer<BackoffIdleStrategy> {
    /// Creates a zeroed sequencer for `channel` on node `node_id`.
    ///
    /// Offers retry without limit using a [`BackoffIdleStrategy`].
    #[must_use]
    pub fn new(node_id: u32, channel: ChannelId) -> Self {
        Self {
            node_id,
            channel,
            last_request_tx_id: 0,
            last_response_tx_ids: [0; CHANNEL_COUNT],
            seen: SeenSet::new(SeenRetention::Unbounded),
            idle: BackoffIdleStrategy::default(),
            publish_retry: RetryPolicy::unbounded(),
            snapshot_retry: RetryPolicy::unbounded(),
            truncated_snapshot: TruncatedSnapshotPolicy::default(),
            listeners: Vec::new(),
            log_sink: None,
            messages_applied: 0,
        }
    }

    /// Creates a sequencer from a validated configuration.
    ///
    /// When `log_dir` is set, the sequencer writes its log to a dedicated
    /// per-node, per-channel file.
    ///
    /// # Errors
    ///
    /// - [`SequencerError::Config`] if the configuration is invalid
    /// - [`SequencerError::LogSink`] if the log file cannot be opened
    pub fn from_config(config: &HeartbeatConfig) -> Result<Self, SequencerError> {
        config.validate()?;

        let mut sequencer = Self::new(config.node_id, config.channel)
            .with_seen_retention(config.seen_retention)
            .with_publish_retry(config.publish_retry)
            .with_snapshot_retry(config.snapshot_retry)
            .with_truncated_snapshot_policy(config.truncated_snapshot);

        if let Some(log_dir) = &config.log_dir {
            let sink = FileLogSink::create(log_dir, config.node_id, config.channel)?;
            sequencer = sequencer.with_log_sink(sink.dispatch());
        }

        Ok(sequencer)
    }
}

impl<I: IdleStrategy> HeartbeatSequencer<I> {
    /// Replaces the idle strategy used between rejected offers.
    #[must_use]
    pub fn with_idle_strategy<J: IdleStrategy>(self, idle: J) -> HeartbeatSequencer<J> {
        HeartbeatSequencer {
            node_id: self.node_id,
            channel: self.channel,
            last_request_tx_id: self.last_request_tx_id,
            last_response_tx_ids: self.last_response_tx_ids,
            seen: self.seen,
            idle,
            publish_retry: self.publish_retry,
            snapshot_retry: self.snapshot_retry,
            truncated_snapshot: self.truncated_snapshot,
            listeners: self.listeners,
            log_sink: self.log_sink,
            messages_applied: self.messages_applied,
        }
    }

    /// Sets how many observed ids are kept for duplicate detection.
    ///
    /// Resets the set; call before applying messages.
    #[must_use]
    pub fn with_seen_retention(mut self, retention: SeenRetention) -> Self {
        self.seen = SeenSet::new(retention);
        self
    }

    /// Sets the retry budget for offers into the replicated log.
    #[must_use]
    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    /// Sets the retry budget for polling a pending snapshot image.
    #[must_use]
    pub fn with_snapshot_retry(mut self, policy: RetryPolicy) -> Self {
        self.snapshot_retry = policy;
        self
    }

    /// Sets what happens when the startup snapshot ends early.
    #[must_use]
    pub fn with_truncated_snapshot_policy(mut self, policy: TruncatedSnapshotPolicy) -> Self {
        self.truncated_snapshot = policy;
        self
    }

    /// Routes this sequencer's log output to `dispatch`.
    #[must_use]
    pub fn with_log_sink(mut self, dispatch: Dispatch) -> Self {
        self.log_sink = Some(dispatch);
        self
    }

    /// Registers a diagnostic listener.
    ///
    /// Listeners are called synchronously, in detection order.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Node this replica runs on.
    #[inline]
    #[must_use]
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Channel this replica validates and publishes on.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Last transaction id assigned to a client request.
    #[inline]
    #[must_use]
    pub fn last_request_tx_id(&self) -> u64 {
        self.last_request_tx_id
    }

    /// Last transaction id seen on `channel`.
    #[inline]
    #[must_use]
    pub fn last_response_tx_id(&self, channel: ChannelId) -> u64 {
        self.last_response_tx_ids[channel.index()]
    }

    /// The duplicate-tracking set.
    #[inline]
    #[must_use]
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Number of messages passed to [`apply`](Self::apply) so far.
    #[inline]
    #[must_use]
    pub fn messages_applied(&self) -> u64 {
        self.messages_applied
    }

    /// Applies one replicated message.
    ///
    /// Client requests are assigned the next transaction id, which is offered
    /// to `publication` as a response on this replica's channel. Responses on
    /// this replica's channel are checked for duplicates and gaps. Everything
    /// else is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Publish`] if the response offer exhausted its
    /// retry budget. The request counter has already advanced at that point.
    pub fn apply<P>(
        &mut self,
        publication: &mut P,
        message: &[u8],
    ) -> Result<ApplyOutcome, SequencerError>
    where
        P: Publication + ?Sized,
    {
        self.in_log_scope(|this| {
            this.messages_applied = this.messages_applied.saturating_add(1);
            this.dispatch(publication, message)
        })
    }

    fn dispatch<P>(
        &mut self,
        publication: &mut P,
        message: &[u8],
    ) -> Result<ApplyOutcome, SequencerError>
    where
        P: Publication + ?Sized,
    {
        let Some(&tag) = message.first() else {
            return Ok(ApplyOutcome::Ignored(IgnoreReason::Empty));
        };

        match MessageType::from_tag(tag) {
            Some(MessageType::TxRequest) => self.handle_request(publication),
            Some(MessageType::TxResponse(channel)) if channel != self.channel => {
                Ok(ApplyOutcome::Ignored(IgnoreReason::ForeignChannel(channel)))
            }
            Some(MessageType::TxResponse(_)) => Ok(self.handle_response(message)),
            None => {
                debug!(tag, "ignoring message with unknown tag");
                Ok(ApplyOutcome::Ignored(IgnoreReason::UnknownTag(tag)))
            }
        }
    }

    /// Assigns the next transaction id and publishes it on this channel.
    ///
    /// The counter wraps from `u64::MAX` to 0.
    fn handle_request<P>(&mut self, publication: &mut P) -> Result<ApplyOutcome, SequencerError>
    where
        P: Publication + ?Sized,
    {
        self.last_request_tx_id = self.last_request_tx_id.wrapping_add(1);
        let tx_id = self.last_request_tx_id;
        let response = TxResponse::new(self.channel, tx_id).encode();

        offer_with_retry(publication, &response, &mut self.idle, &self.publish_retry).map_err(
            |e| {
                warn!(node_id = self.node_id, channel = %self.channel, tx_id, error = %e, "failed to publish TxResponse");
                e
            },
        )?;

        Ok(ApplyOutcome::RequestSequenced { tx_id })
    }

    /// Checks a response on this channel for duplicates and gaps.
    fn handle_response(&mut self, message: &[u8]) -> ApplyOutcome {
        let response = match TxResponse::decode(message) {
            Ok(response) => response,
            Err(e) => {
                warn!(node_id = self.node_id, channel = %self.channel, error = %e, "dropping malformed TxResponse");
                return ApplyOutcome::Ignored(IgnoreReason::Malformed);
            }
        };
        let TxResponse { channel, tx_id } = response;
        let mut diagnostics = Vec::new();

        if self.seen.check_and_insert(tx_id) {
            diagnostics.push(Diagnostic::Duplicate { channel, tx_id });
        }

        info!(node_id = self.node_id, %channel, tx_id, "Received TxResponse");

        let last = self.last_response_tx_ids[channel.index()];
        let expected = last.saturating_add(1);
        if tx_id > expected {
            diagnostics.push(Diagnostic::Gap {
                channel,
                expected,
                actual: tx_id,
            });
        }
        self.last_response_tx_ids[channel.index()] = tx_id;

        for diagnostic in &diagnostics {
            self.emit(diagnostic);
        }

        ApplyOutcome::ResponseValidated { tx_id, diagnostics }
    }

    fn emit(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::Duplicate { channel, tx_id } => {
                warn!(node_id = self.node_id, %channel, tx_id, "TxResponse duplicate");
            }
            Diagnostic::Gap {
                channel,
                expected,
                actual,
            } => {
                warn!(node_id = self.node_id, %channel, expected, actual, "TxResponse skipped message");
            }
        }
        for listener in &self.listeners {
            listener(diagnostic);
        }
    }

    /// Returns the persisted counters as they stand now.
    #[must_use]
    pub fn snapshot(&self) -> SequencerSnapshot {
        SequencerSnapshot::new(self.last_response_tx_ids, self.last_request_tx_id)
    }

    /// Encodes the current counters and offers them to `publication`.
    ///
    /// The duplicate-tracking set is not part of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Snapshot`] if the record could not be offered
    /// within the publish retry budget.
    pub fn take_snapshot<P>(&mut self, publication: &mut P) -> Result<SequencerSnapshot, SequencerError>
    where
        P: Publication + ?Sized,
    {
        self.in_log_scope(|this| -> Result<SequencerSnapshot, SequencerError> {
            let snapshot = this.snapshot();
            info!(
                node_id = this.node_id,
                channel = %this.channel,
                tx_id0 = snapshot.last_response_tx_ids[0],
                tx_id1 = snapshot.last_response_tx_ids[1],
                tx_id2 = snapshot.last_response_tx_ids[2],
                last_request_tx_id = snapshot.last_request_tx_id,
                "onTakeSnapshot"
            );
            offer_with_retry(publication, &snapshot.encode(), &mut this.idle, &this.publish_retry)
                .map_err(SnapshotError::from)?;
            Ok(snapshot)
        })
    }

    /// Overwrites all persisted counters with `snapshot`.
    ///
    /// The duplicate-tracking set starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::AlreadyStarted`] if any message has been
    /// applied.
    pub fn restore(&mut self, snapshot: SequencerSnapshot) -> Result<(), SequencerError> {
        if self.messages_applied > 0 {
            return Err(SequencerError::AlreadyStarted {
                messages_applied: self.messages_applied,
            });
        }
        self.last_response_tx_ids = snapshot.last_response_tx_ids;
        self.last_request_tx_id = snapshot.last_request_tx_id;
        self.seen.clear();
        Ok(())
    }

    /// Reads a snapshot from a fragmented image and restores it.
    ///
    /// Returns `true` if a snapshot was restored, `false` if the image ended
    /// early and the truncated-snapshot policy kept the zeroed state.
    ///
    /// # Errors
    ///
    /// - [`SequencerError::AlreadyStarted`] if messages were already applied
    /// - [`SequencerError::Snapshot`] if the image is truncated under
    ///   [`TruncatedSnapshotPolicy::Fail`] or stalls past the retry budget
    pub fn load_snapshot<S>(&mut self, image: &mut S) -> Result<bool, SequencerError>
    where
        S: SnapshotImage + ?Sized,
    {
        if self.messages_applied > 0 {
            return Err(SequencerError::AlreadyStarted {
                messages_applied: self.messages_applied,
            });
        }
        self.in_log_scope(|this| -> Result<bool, SequencerError> {
            let loaded = load_image(
                image,
                &mut this.idle,
                &this.snapshot_retry,
                this.truncated_snapshot,
            )?;
            let Some(snapshot) = loaded else {
                return Ok(false);
            };
            info!(
                node_id = this.node_id,
                channel = %this.channel,
                tx_id0 = snapshot.last_response_tx_ids[0],
                tx_id1 = snapshot.last_response_tx_ids[1],
                tx_id2 = snapshot.last_response_tx_ids[2],
                last_request_tx_id = snapshot.last_request_tx_id,
                "loaded snapshot"
            );
            this.restore(snapshot)?;
            Ok(true)
        })
    }

    /// Runs `f` with this sequencer's log sink as the default subscriber.
    fn in_log_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        match self.log_sink.clone() {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || f(self)),
            None => f(self),
        }
    }
}

impl<I: IdleStrategy> ClusteredService for HeartbeatSequencer<I> {
    type Error = SequencerError;

    fn on_start(&mut self, snapshot: Option<&mut dyn SnapshotImage>) -> Result<(), Self::Error> {
        self.in_log_scope(|this| {
            info!(node_id = this.node_id, channel = %this.channel, "onStart");
        });
        match snapshot {
            Some(image) => self.load_snapshot(image).map(|_| ()),
            None => Ok(()),
        }
    }

    fn on_message(
        &mut self,
        publication: &mut dyn Publication,
        message: &[u8],
    ) -> Result<(), Self::Error> {
        self.apply(publication, message).map(|_| ())
    }

    fn on_take_snapshot(&mut self, publication: &mut dyn Publication) -> Result<(), Self::Error> {
        self.take_snapshot(publication).map(|_| ())
    }

    fn on_session_open(&mut self, session_id: u64) {
        self.in_log_scope(|this| {
            info!(node_id = this.node_id, channel = %this.channel, session_id, "onSessionOpen");
        });
    }

    fn on_session_close(&mut self, session_id: u64) {
        self.in_log_scope(|this| {
            info!(node_id = this.node_id, channel = %this.channel, session_id, "onSessionClose");
        });
    }

    fn on_role_change(&mut self, role: Role) {
        self.in_log_scope(|this| {
            info!(node_id = this.node_id, channel = %this.channel, %role, "onRoleChange");
        });
    }

    fn on_terminate(&mut self) {
        self.in_log_scope(|this| {
            info!(node_id = this.node_id, channel = %this.channel, "onTerminate");
        });
    }
}

impl<I> fmt::Debug for HeartbeatSequencer<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatSequencer")
            .field("node_id", &self.node_id)
            .field("channel", &self.channel)
            .field("last_request_tx_id", &self.last_request_tx_id)
            .field("last_response_tx_ids", &self.last_response_tx_ids)
            .field("seen", &self.seen.len())
            .field("messages_applied", &self.messages_applied)
            .finish_non_exhaustive()
    }
}
