/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Durable per-replica log sink.
//!
//! Every replica writes its lifecycle events and diagnostics to its own file,
//! `{log_dir}/{node_id}-{channel}.log`, so that drift on one channel can be
//! inspected without untangling the output of co-hosted channels.

use crate::sequencer::ChannelId;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{Dispatch, Level};

/// Errors raised while opening a log sink.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// The log directory could not be created.
    #[error("failed to create log directory {}: {source}", path.display())]
    CreateDir {
        /// Directory that was being created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be opened.
    #[error("failed to open log file {}: {source}", path.display())]
    OpenFile {
        /// File that was being opened.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A file-backed `tracing` subscriber for one replica.
///
/// # Examples
///
/// ```no_run
/// use heartbeat_sequencer::logging::FileLogSink;
/// use heartbeat_sequencer::sequencer::ChannelId;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = FileLogSink::create("/tmp/heartbeat", 0, ChannelId::new(1)?)?;
/// tracing::dispatcher::with_default(&sink.dispatch(), || {
///     tracing::info!("written to /tmp/heartbeat/0-1.log");
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileLogSink {
    path: PathBuf,
    dispatch: Dispatch,
}

impl FileLogSink {
    /// Opens (appending) the log file of `channel` on `node_id`, creating
    /// `log_dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LogSinkError`] if the directory or file cannot be created.
    pub fn create(
        log_dir: impl AsRef<Path>,
        node_id: u32,
        channel: ChannelId,
    ) -> Result<Self, LogSinkError> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir).map_err(|source| LogSinkError::CreateDir {
            path: log_dir.to_path_buf(),
            source,
        })?;

        let path = log_dir.join(log_file_name(node_id, channel));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogSinkError::OpenFile {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            dispatch: file_dispatch(file),
            path,
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The subscriber writing to the file.
    #[must_use]
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch.clone()
    }
}

impl std::fmt::Debug for FileLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLogSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Name of the log file for `channel` on `node_id`.
#[must_use]
pub fn log_file_name(node_id: u32, channel: ChannelId) -> String {
    format!("{node_id}-{channel}.log")
}

fn file_dispatch(file: File) -> Dispatch {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_max_level(Level::INFO)
        .finish();
    Dispatch::new(subscriber)
}
