/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! # heartbeat-sequencer
//!
//! A deterministic replicated state-machine fragment for consensus-driven
//! clusters. For each logical response channel it assigns monotonically
//! increasing transaction ids to client requests, verifies that the ids on
//! its own peer-response channel arrive without duplicates or gaps, and
//! persists its counters in a fixed 32-byte snapshot so that a rejoining
//! replica converges to the same state as its peers.
//!
//! Consensus, log replication, and transport are provided by the hosting
//! runtime and are out of scope; the crate talks to them only through the
//! traits in [`sequencer::service`].
//!
//! ## Modules
//!
//! - [`sequencer`]: the state machine, wire format, snapshot codec, retry
//!   loops, journal, replay, and an in-process fake runtime
//! - [`config`]: JSON-loadable replica configuration
//! - [`logging`]: per-node, per-channel durable log sink
//!
//! ## Wire format
//!
//! | tag           | payload                      | meaning                 |
//! |---------------|------------------------------|-------------------------|
//! | `0x0F`        | ignored                      | client request          |
//! | `0x00..=0x02` | `u64` big-endian transaction | response on channel 0-2 |
//!
//! Any other tag is ignored.

pub mod config;
pub mod logging;
pub mod sequencer;

pub use config::{ConfigError, HeartbeatConfig};
pub use logging::{FileLogSink, LogSinkError};
pub use sequencer::{
    ApplyOutcome, ChannelId, Diagnostic, HeartbeatSequencer, SequencerError, SequencerSnapshot,
};
