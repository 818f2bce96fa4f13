/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Duplicate-tracking set for the response validation path.
//!
//! The set lives for the process lifetime only; it is never part of a
//! snapshot. How much history it keeps is governed by [`SeenRetention`].

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Retention policy for observed transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SeenRetention {
    /// Keep every id ever observed. Memory grows with traffic.
    #[default]
    Unbounded,

    /// Keep only the `capacity` most recently inserted distinct ids.
    ///
    /// A duplicate older than the window is no longer detected.
    Window {
        /// Maximum number of ids held at once.
        capacity: usize,
    },
}

/// Set of transaction ids already observed, with optional sliding window.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::seen::{SeenRetention, SeenSet};
///
/// let mut seen = SeenSet::new(SeenRetention::Window { capacity: 2 });
/// assert!(!seen.check_and_insert(1));
/// assert!(seen.check_and_insert(1));
/// seen.check_and_insert(2);
/// seen.check_and_insert(3);
/// // 1 fell out of the window
/// assert!(!seen.contains(1));
/// assert_eq!(seen.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    ids: HashSet<u64>,
    order: VecDeque<u64>,
    retention: SeenRetention,
}

impl SeenSet {
    /// Creates an empty set with the given retention.
    #[must_use]
    pub fn new(retention: SeenRetention) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            retention,
        }
    }

    /// Records `tx_id` and reports whether it had already been observed.
    ///
    /// Membership is tested before insertion. Re-inserting a known id does
    /// not refresh its position in the window.
    pub fn check_and_insert(&mut self, tx_id: u64) -> bool {
        if !self.ids.insert(tx_id) {
            return true;
        }
        if let SeenRetention::Window { capacity } = self.retention {
            self.order.push_back(tx_id);
            while self.order.len() > capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.ids.remove(&evicted);
                }
            }
        }
        false
    }

    /// Returns `true` if `tx_id` is currently remembered.
    #[inline]
    #[must_use]
    pub fn contains(&self, tx_id: u64) -> bool {
        self.ids.contains(&tx_id)
    }

    /// Number of ids currently remembered.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if no id is remembered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The retention policy in effect.
    #[must_use]
    pub fn retention(&self) -> SeenRetention {
        self.retention
    }

    /// Forgets every id.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}
