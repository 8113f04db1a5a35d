//! Health tracking for pools of equivalent download mirrors.
//!
//! A mirror pool is a set of third-party endpoints that may each serve the
//! same document. The [`MirrorHealthTracker`] records per-mirror success and
//! failure so dead mirrors stop being hammered, while still giving every
//! mirror a chance to recover: a mirror is demoted after three consecutive
//! failures and reinstated by any single success (or an explicit reset) -
//! there is no permanent ban.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::SystemTime;

use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

/// Consecutive failures after which a mirror is marked inactive.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Health state for one mirror.
///
/// Mutated only by [`MirrorHealthTracker`]; no other component writes mirror
/// state. Lives for the process lifetime and is never persisted.
#[derive(Debug, Clone)]
pub struct MirrorRecord {
    /// Mirror base URL.
    pub url: String,
    /// False once `consecutive_failures` reaches [`FAILURE_THRESHOLD`].
    pub active: bool,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When this mirror last served a document, if ever.
    pub last_success: Option<SystemTime>,
}

impl MirrorRecord {
    fn new(url: String) -> Self {
        Self {
            url,
            active: true,
            consecutive_failures: 0,
            last_success: None,
        }
    }
}

/// Aggregate pool health, for end-of-run reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorPoolStats {
    /// Mirrors in the pool.
    pub total: usize,
    /// Mirrors currently usable.
    pub active: usize,
    /// Mirrors currently demoted.
    pub inactive: usize,
}

/// Tracks per-mirror health for a pool of equivalent endpoints.
///
/// Shared across worker tasks; mutations are read-modify-write on failure
/// counts and active flags, so all state sits behind one mutex. The lock is
/// never held across an await point.
#[derive(Debug)]
pub struct MirrorHealthTracker {
    records: Mutex<Vec<MirrorRecord>>,
}

impl MirrorHealthTracker {
    /// Creates a tracker over the configured mirror list.
    #[must_use]
    pub fn new(mirrors: &[String]) -> Self {
        Self {
            records: Mutex::new(mirrors.iter().cloned().map(MirrorRecord::new).collect()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MirrorRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns usable mirrors, best-first.
    ///
    /// Active mirrors (failures below the threshold) not in `exclude`, sorted
    /// ascending by failure count; mirrors with equal failure counts are
    /// shuffled among themselves to spread load across the pool.
    #[must_use]
    #[instrument(skip(self, exclude))]
    pub fn candidates(&self, exclude: &HashSet<String>) -> Vec<String> {
        let records = self.lock();
        let mut usable: Vec<(u32, String)> = records
            .iter()
            .filter(|r| {
                r.active && r.consecutive_failures < FAILURE_THRESHOLD && !exclude.contains(&r.url)
            })
            .map(|r| (r.consecutive_failures, r.url.clone()))
            .collect();
        drop(records);

        usable.sort_by_key(|(failures, _)| *failures);
        shuffle_equal_failure_groups(&mut usable);

        debug!(count = usable.len(), "mirror candidates selected");
        usable.into_iter().map(|(_, url)| url).collect()
    }

    /// Records the outcome of one attempt against a mirror.
    ///
    /// Success resets the failure count, reactivates the mirror, and stamps
    /// `last_success`. Failure increments the count and demotes the mirror
    /// once it reaches [`FAILURE_THRESHOLD`].
    #[instrument(skip(self))]
    pub fn report(&self, mirror: &str, success: bool) {
        let mut records = self.lock();
        let Some(record) = records.iter_mut().find(|r| r.url == mirror) else {
            debug!(mirror, "report for unknown mirror ignored");
            return;
        };

        if success {
            record.consecutive_failures = 0;
            record.active = true;
            record.last_success = Some(SystemTime::now());
        } else {
            record.consecutive_failures += 1;
            if record.consecutive_failures >= FAILURE_THRESHOLD {
                record.active = false;
                warn!(mirror, failures = record.consecutive_failures, "mirror demoted");
            }
        }
    }

    /// Restores every mirror to its initial state.
    #[instrument(skip(self))]
    pub fn reset_all(&self) {
        let mut records = self.lock();
        for record in records.iter_mut() {
            record.active = true;
            record.consecutive_failures = 0;
            record.last_success = None;
        }
        info!("mirror pool reset");
    }

    /// Returns aggregate pool health.
    #[must_use]
    pub fn stats(&self) -> MirrorPoolStats {
        let records = self.lock();
        let total = records.len();
        let active = records.iter().filter(|r| r.active).count();
        MirrorPoolStats {
            total,
            active,
            inactive: total - active,
        }
    }

    /// Returns a snapshot of every mirror record, for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MirrorRecord> {
        self.lock().clone()
    }
}

/// Shuffles runs of equal failure count in place, preserving the ascending
/// order between runs.
fn shuffle_equal_failure_groups(sorted: &mut [(u32, String)]) {
    let mut rng = rand::thread_rng();
    let mut start = 0;
    while start < sorted.len() {
        let failures = sorted[start].0;
        let mut end = start + 1;
        while end < sorted.len() && sorted[end].0 == failures {
            end += 1;
        }
        sorted[start..end].shuffle(&mut rng);
        start = end;
    }
}
