//! Progress reporting for a calculation.
//!
//! The aggregator reports after every tile through [`ProgressCallback`].
//! Reports are advisory; they never influence the result. Rendering lives
//! upstream (an `indicatif` bar in the CLI, nothing in tests).

use std::sync::Arc;

/// Position after one tile query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileProgress {
    /// Zero-based index of the tile just processed.
    pub index: usize,
    /// Tiles still to be queried.
    pub remaining: usize,
}

/// Receives progress of a running calculation.
///
/// Implementations must be `Send + Sync` because the reference is held
/// across the tile queries' await points.
pub trait ProgressCallback: Send + Sync {
    /// Number of tiles the polygon was split into.
    fn set_total(&self, total: u64);

    /// One tile has been queried and merged.
    fn tile_done(&self, progress: TileProgress);

    /// Describes the current phase.
    fn set_message(&self, msg: String);

    /// The calculation is complete.
    fn finish(&self, msg: String);

    /// The calculation is complete; remove the indicator.
    fn finish_and_clear(&self);
}

/// A [`ProgressCallback`] that ignores every report.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn tile_done(&self, _progress: TileProgress) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
