/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Sequencer module: transaction-id sequencing and validation for one
//! response channel of a replicated cluster.
//!
//! This module provides a single-threaded state machine hosted by a
//! consensus runtime. The runtime delivers replicated messages to every
//! replica in the same total order; the state machine turns client requests
//! into monotonically increasing transaction ids, checks the ids published on
//! its own channel for duplicates and gaps, and saves or restores its
//! counters through a fixed 32-byte snapshot.
//!
//! # Architecture
//!
//! - [`message`] defines the 9-byte tagged wire format
//! - [`HeartbeatSequencer`] dispatches, sequences, and validates
//! - [`Diagnostic`]s report drift to listeners and to the log
//! - [`snapshot`] encodes the record and reassembles fragmented images
//! - [`retry`] bounds the cooperative offer loops
//! - [`service`] is the narrow boundary with the runtime
//! - [`journal`], [`replay`], and [`cluster`] provide an in-process log,
//!   deterministic replay, and a fake runtime
//!
//! # Examples
//!
//! ```
//! use heartbeat_sequencer::sequencer::{ChannelId, HeartbeatSequencer, TxResponse};
//! use heartbeat_sequencer::sequencer::journal::InMemoryJournal;
//! use std::sync::{Arc, Mutex};
//!
//! let channel = ChannelId::new(0).unwrap();
//! let mut sequencer = HeartbeatSequencer::new(0, channel);
//!
//! let gaps = Arc::new(Mutex::new(Vec::new()));
//! let gaps_clone = gaps.clone();
//! sequencer.add_listener(move |diagnostic| {
//!     gaps_clone.lock().unwrap().push(*diagnostic);
//! });
//!
//! let mut log = InMemoryJournal::new();
//! for tx_id in [1, 2, 4] {
//!     sequencer.apply(&mut log, &TxResponse::new(channel, tx_id).encode()).unwrap();
//! }
//! assert_eq!(gaps.lock().unwrap().len(), 1);
//! ```

pub mod cluster;
pub mod core;
pub mod event;
pub mod journal;
pub mod message;
pub mod replay;
pub mod result;
pub mod retry;
pub mod seen;
pub mod service;
pub mod snapshot;

#[cfg(test)]
mod tests;

// Re-export main types
pub use self::core::{HeartbeatSequencer, SequencerError};
pub use event::Diagnostic;
pub use message::{CHANNEL_COUNT, ChannelId, MessageType, TX_REQUEST_TAG, TxResponse};
pub use result::{ApplyOutcome, IgnoreReason};
pub use snapshot::{SNAPSHOT_LENGTH, SequencerSnapshot};
