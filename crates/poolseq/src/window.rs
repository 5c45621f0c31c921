use crate::{Error, Result};
use core::num::NonZeroU64;
use serde::{Deserialize, Serialize};

/// A reserved range of ids `[current_id, reset_on_id)` held in the shared
/// cache.
///
/// Both bounds live in a single record so that creating, replacing, or
/// deleting a window is one cache operation. A window is valid while
/// `current_id <= reset_on_id`; equality means the pool is exhausted and
/// must be refilled before another id is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolWindow {
    /// The next id to hand out.
    pub current_id: u64,
    /// Exclusive upper bound of the window.
    pub reset_on_id: u64,
}

/// Where a [`PoolWindow`] sits in its refill cycle.
///
/// ```text
/// Fresh (current < reset_on) --issue--> ... --> Exhausted (current == reset_on)
///    ^                                                  |
///    +------------------- reset ------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    /// Ids remain in the window.
    Fresh {
        /// Ids left before the window is exhausted.
        remaining: u64,
    },
    /// Every id in the window has been issued.
    Exhausted,
}

impl PoolWindow {
    pub const fn new(current_id: u64, reset_on_id: u64) -> Self {
        Self {
            current_id,
            reset_on_id,
        }
    }

    /// Classifies the window, failing on `current_id > reset_on_id`.
    ///
    /// An overrun window means two callers were handed overlapping state; it
    /// is never repaired silently.
    pub fn status(&self) -> Result<WindowStatus> {
        match self.reset_on_id.checked_sub(self.current_id) {
            Some(0) => Ok(WindowStatus::Exhausted),
            Some(remaining) => Ok(WindowStatus::Fresh { remaining }),
            None => Err(Error::InvariantViolation {
                current_id: self.current_id,
                reset_on_id: self.reset_on_id,
            }),
        }
    }

    pub const fn is_exhausted(&self) -> bool {
        self.current_id == self.reset_on_id
    }

    /// The window after `current_id` has been issued.
    pub const fn advance(self) -> Self {
        Self {
            current_id: self.current_id + 1,
            reset_on_id: self.reset_on_id,
        }
    }

    /// The id most recently handed out from this window's counter, i.e.
    /// `current_id - 1`. `None` when `current_id` is zero.
    pub const fn last_issued(&self) -> Option<u64> {
        self.current_id.checked_sub(1)
    }

    pub const fn contains(&self, id: u64) -> bool {
        id >= self.current_id && id < self.reset_on_id
    }

    pub(crate) fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::CorruptedData {
            key: String::from("<encode>"),
            reason: e.to_string(),
        })
    }

    pub(crate) fn decode(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::CorruptedData {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Computes the window reserved by a durable counter snapshot.
///
/// Given the counter value `low` read (or fetched) from the durable store,
/// the window covers `[low, low + pool_size)`.
///
/// # Errors
///
/// Returns [`Error::SequenceExhausted`] when `low + pool_size` overflows.
///
/// # Example
///
/// ```
/// use core::num::NonZeroU64;
/// use poolseq::{compute_window, PoolWindow};
///
/// let window = compute_window(500, NonZeroU64::new(100).unwrap()).unwrap();
/// assert_eq!(window, PoolWindow::new(500, 600));
/// ```
pub fn compute_window(low: u64, pool_size: NonZeroU64) -> Result<PoolWindow> {
    let high = low
        .checked_add(pool_size.get())
        .ok_or(Error::SequenceExhausted {
            low,
            pool_size: pool_size.get(),
        })?;
    Ok(PoolWindow::new(low, high))
}
