/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Diagnostic events emitted by the response validator.
//!
//! Diagnostics report protocol drift on the channel a replica owns. They are
//! observations only: emitting one never changes what the state machine does
//! next.

use super::message::ChannelId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol drift detected on a peer-response channel.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::{ChannelId, Diagnostic};
///
/// let gap = Diagnostic::Gap {
///     channel: ChannelId::new(0).unwrap(),
///     expected: 3,
///     actual: 4,
/// };
/// assert!(gap.is_gap());
/// assert_eq!(gap.tx_id(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A transaction id that was already observed on this replica.
    Duplicate {
        /// Channel the id arrived on.
        channel: ChannelId,
        /// The repeated transaction id.
        tx_id: u64,
    },

    /// A transaction id that skipped past the next expected one.
    Gap {
        /// Channel the id arrived on.
        channel: ChannelId,
        /// The id that should have arrived (`last + 1`).
        expected: u64,
        /// The id that did arrive.
        actual: u64,
    },
}

impl Diagnostic {
    /// Channel the diagnostic refers to.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        match self {
            Self::Duplicate { channel, .. } | Self::Gap { channel, .. } => *channel,
        }
    }

    /// Transaction id that triggered the diagnostic.
    #[must_use]
    pub const fn tx_id(&self) -> u64 {
        match self {
            Self::Duplicate { tx_id, .. } => *tx_id,
            Self::Gap { actual, .. } => *actual,
        }
    }

    /// Returns `true` for duplicate diagnostics.
    #[inline]
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns `true` for gap diagnostics.
    #[inline]
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { channel, tx_id } => {
                write!(f, "TxResponse{channel} duplicate: txID = {tx_id}")
            }
            Self::Gap {
                channel,
                expected,
                actual,
            } => write!(
                f,
                "TxResponse{channel} skipped message: expected = {expected}, actual = {actual}"
            ),
        }
    }
}
