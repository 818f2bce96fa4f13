/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Wire format of the replicated application messages.
//!
//! Every message starts with a one-byte type tag. Transaction messages carry
//! an 8-byte big-endian transaction id right after the tag, for a total of
//! [`TX_MESSAGE_LENGTH`] bytes.
//!
//! | tag            | meaning                                  |
//! |----------------|------------------------------------------|
//! | `0x0F`         | client request (payload unused)          |
//! | `0x00..=0x02`  | peer response for channel `0..=2`        |
//! | anything else  | ignored                                  |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of response channels in a deployment.
///
/// The snapshot layout reserves one slot per channel, so this value is part of
/// the persisted format.
pub const CHANNEL_COUNT: usize = 3;

/// Tag byte of a client request.
pub const TX_REQUEST_TAG: u8 = 0x0F;

/// Length of a tagged transaction message: tag byte plus a `u64`.
pub const TX_MESSAGE_LENGTH: usize = 1 + size_of::<u64>();

/// Identifier of a logical peer-response channel.
///
/// The identifier doubles as the tag byte of responses published on that
/// channel.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::ChannelId;
///
/// let channel = ChannelId::new(2).unwrap();
/// assert_eq!(channel.tag(), 0x02);
/// assert!(ChannelId::new(3).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    /// Every channel of the deployment, in tag order.
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [ChannelId(0), ChannelId(1), ChannelId(2)];

    /// Creates a channel id, rejecting values outside `0..CHANNEL_COUNT`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidChannel`] when `id` does not name a channel.
    pub fn new(id: u8) -> Result<Self, InvalidChannel> {
        if usize::from(id) < CHANNEL_COUNT {
            Ok(Self(id))
        } else {
            Err(InvalidChannel(id))
        }
    }

    /// Returns the raw channel number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the slot of this channel in per-channel arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the tag byte of responses published on this channel.
    #[inline]
    #[must_use]
    pub const fn tag(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = InvalidChannel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for u8 {
    fn from(channel: ChannelId) -> Self {
        channel.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A channel number outside the deployment's channel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel id {0} is out of range (expected 0..{max})", max = CHANNEL_COUNT)]
pub struct InvalidChannel(pub u8);

/// Errors raised while decoding a replicated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The message has no tag byte.
    #[error("empty message")]
    Empty,

    /// The tag byte is not a known message type.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// The message is shorter than its type requires.
    #[error("truncated message: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required by the message type.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
}

/// Classification of a replicated message by its tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A client asking for a new transaction id.
    TxRequest,

    /// A transaction id published on a peer-response channel.
    TxResponse(ChannelId),
}

impl MessageType {
    /// Maps a tag byte to a message type, or `None` for unknown tags.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TX_REQUEST_TAG => Some(Self::TxRequest),
            other => ChannelId::new(other).ok().map(Self::TxResponse),
        }
    }

    /// Returns the tag byte for this message type.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::TxRequest => TX_REQUEST_TAG,
            Self::TxResponse(channel) => channel.tag(),
        }
    }
}

/// A transaction id published on a peer-response channel.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::{ChannelId, TxResponse};
///
/// let response = TxResponse::new(ChannelId::new(1).unwrap(), 258);
/// let bytes = response.encode();
/// assert_eq!(&bytes[..], &[0x01, 0, 0, 0, 0, 0, 0, 0x01, 0x02]);
/// assert_eq!(TxResponse::decode(&bytes).unwrap(), response);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    /// Channel the id was published on.
    pub channel: ChannelId,

    /// The transaction id.
    pub tx_id: u64,
}

impl TxResponse {
    /// Creates a new response.
    #[must_use]
    pub const fn new(channel: ChannelId, tx_id: u64) -> Self {
        Self { channel, tx_id }
    }

    /// Encodes the response as `tag | tx_id (u64, big-endian)`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        encode_tagged(self.channel.tag(), self.tx_id)
    }

    /// Decodes a response from a tagged message.
    ///
    /// Bytes past [`TX_MESSAGE_LENGTH`] are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the message is empty, is not tagged as a
    /// response, or is too short to hold a transaction id.
    pub fn decode(message: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, mut payload) = message.split_first().ok_or(DecodeError::Empty)?;
        let channel = match MessageType::from_tag(tag) {
            Some(MessageType::TxResponse(channel)) => channel,
            _ => return Err(DecodeError::UnknownTag(tag)),
        };
        if message.len() < TX_MESSAGE_LENGTH {
            return Err(DecodeError::Truncated {
                expected: TX_MESSAGE_LENGTH,
                actual: message.len(),
            });
        }
        Ok(Self::new(channel, payload.get_u64()))
    }
}

/// Encodes a client request carrying the client's own counter.
///
/// The state machine ignores everything past the tag byte; the counter only
/// helps clients correlate their own traffic.
#[must_use]
pub fn encode_request(client_tx_id: u64) -> Bytes {
    encode_tagged(TX_REQUEST_TAG, client_tx_id)
}

fn encode_tagged(tag: u8, tx_id: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(TX_MESSAGE_LENGTH);
    buf.put_u8(tag);
    buf.put_u64(tx_id);
    buf.freeze()
}
