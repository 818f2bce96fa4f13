/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Outcome of applying one replicated message.

use super::event::Diagnostic;
use super::message::ChannelId;

/// Why a message was dropped without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The message had no tag byte.
    Empty,

    /// The tag byte is not a known message type.
    UnknownTag(u8),

    /// A response for a channel owned by another replica.
    ForeignChannel(ChannelId),

    /// A response too short to carry a transaction id.
    Malformed,
}

/// Result of applying a message to the state machine.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::{ApplyOutcome, IgnoreReason};
///
/// let outcome = ApplyOutcome::Ignored(IgnoreReason::UnknownTag(0x7F));
/// assert!(outcome.is_ignored());
/// assert!(outcome.diagnostics().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A client request was assigned a transaction id and published.
    RequestSequenced {
        /// The newly assigned transaction id.
        tx_id: u64,
    },

    /// A response on the replica's own channel was validated.
    ResponseValidated {
        /// The validated transaction id.
        tx_id: u64,
        /// Drift detected while validating, in detection order.
        diagnostics: Vec<Diagnostic>,
    },

    /// The message was dropped.
    Ignored(IgnoreReason),
}

impl ApplyOutcome {
    /// Returns `true` if the message did not touch state.
    #[inline]
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    /// Returns the diagnostics raised by this message.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::ResponseValidated { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}
