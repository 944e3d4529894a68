//! Batch progress and front-end state.
//!
//! Jobs for different images finish on different rayon workers, so the
//! counters live behind a `Mutex`. Front ends read copies through
//! [`ProgressTracker::snapshot`] and [`BatchState::snapshot`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// A progress bar's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Number of jobs in the batch.
    pub max: usize,
    /// Jobs that succeeded. Failures never advance the bar.
    pub value: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Whether the bar is shown. Hidden once every job has finished.
    pub visible: bool,
}

impl Progress {
    /// Whether every job has reported, successfully or not.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.value + self.failed >= self.max
    }
}

/// Thread-safe progress counter for one batch.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<Progress>,
}

impl ProgressTracker {
    /// Show the bar and reset it for a batch of `max` jobs.
    pub fn start(&self, max: usize) {
        *self.lock() = Progress {
            max,
            value: 0,
            failed: 0,
            visible: max > 0,
        };
    }

    /// Record a successful job and return the new state.
    pub fn succeed(&self) -> Progress {
        let mut progress = self.lock();
        progress.value += 1;
        Self::hide_if_finished(&mut progress);
        *progress
    }

    /// Record a failed job and return the new state.
    pub fn fail(&self) -> Progress {
        let mut progress = self.lock();
        progress.failed += 1;
        Self::hide_if_finished(&mut progress);
        *progress
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> Progress {
        *self.lock()
    }

    fn hide_if_finished(progress: &mut Progress) {
        if progress.is_finished() {
            progress.visible = false;
        }
    }

    /// Updates are single assignments; a poisoned lock still holds
    /// consistent counters.
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time copy of [`BatchState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    /// Classification progress bar.
    pub classify: Progress,
    /// Segmentation progress bar.
    pub segment: Progress,
    /// Whether the download action is available.
    pub download_enabled: bool,
}

/// Everything a front end shows about running batches: two progress
/// bars and whether the download action is available.
#[derive(Debug, Default)]
pub struct BatchState {
    /// Classification progress.
    pub classify: ProgressTracker,
    /// Segmentation progress.
    pub segment: ProgressTracker,
    download_enabled: Mutex<bool>,
}

impl BatchState {
    /// Whether the download action is available.
    #[must_use]
    pub fn download_enabled(&self) -> bool {
        *self
            .download_enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable or disable the download action.
    pub fn set_download_enabled(&self, enabled: bool) {
        *self
            .download_enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = enabled;
    }

    /// Point-in-time copy of all state.
    #[must_use]
    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            classify: self.classify.snapshot(),
            segment: self.segment.snapshot(),
            download_enabled: self.download_enabled(),
        }
    }
}
