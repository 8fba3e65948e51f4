#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Delivery point estimation for a polygon.
//!
//! An [`Aggregator`] owns the settings and the two data sources. Every call
//! to [`Aggregator::compute`] runs one calculation through the states of
//! [`RunState`]:
//!
//! ```text
//! Idle -> Tiling -> PerTileQuery (once per tile) -> WholePolygonBusinessQuery -> Finalized
//! ```
//!
//! Tiles are queried one after another and each tile's complete partial
//! result is merged into a per-run accumulator before the next query is
//! sent. The accumulator is created fresh for every call, so nothing
//! carries over between calculations.
//!
//! Only an invalid or oversized polygon ends a run with an error, and both
//! are detected before any external request. Failed or overflowing tiles,
//! an unresolvable places release and an unreachable places dataset are
//! recorded as [`RunWarning`]s on the finished [`AggregateResult`].

pub mod config;
pub mod progress;

use std::collections::BTreeMap;
use std::sync::Arc;

use briefkasten_mailbox_models::{AggregateResult, FallbackBusinessRecord, RunWarning};
use briefkasten_places::{BusinessCount, PlacesSource};
use briefkasten_registry::{IdentifyService, TileUnits, count_tile};
use briefkasten_tiler::{Tile, TilerError};
use geo::Polygon;
use strum_macros::{AsRefStr, Display};

pub use config::{ConfigError, Settings};
pub use progress::{NullProgress, ProgressCallback, TileProgress, null_progress};

/// Errors that end a calculation before any external request.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// The polygon is empty, degenerate or self-intersecting.
    #[error("Invalid polygon: {reason}")]
    InvalidPolygon {
        /// What is wrong with the ring.
        reason: String,
    },

    /// The polygon is above the hard area ceiling.
    #[error(
        "Polygon area {area:.6} exceeds the limit of {limit:.6} square degrees; \
         draw a smaller area"
    )]
    PolygonTooLarge {
        /// Polygon area in square degrees.
        area: f64,
        /// Hard ceiling in square degrees.
        limit: f64,
    },

    /// Tiling failed for another reason (e.g. a bad tile area setting).
    #[error(transparent)]
    Tiling(TilerError),
}

impl From<TilerError> for ComputeError {
    fn from(e: TilerError) -> Self {
        match e {
            TilerError::InvalidPolygon { reason } => Self::InvalidPolygon { reason },
            other => Self::Tiling(other),
        }
    }
}

/// Phase of one calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    /// Nothing started yet.
    Idle,
    /// Polygon validated and being split into tiles.
    Tiling,
    /// Register queries, one per tile.
    PerTileQuery,
    /// The single places query over the whole polygon.
    WholePolygonBusinessQuery,
    /// Totals computed; the result is ready.
    Finalized,
}

impl RunState {
    /// Whether `next` directly follows `self`. `PerTileQuery` may repeat.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Tiling)
                | (Self::Tiling | Self::PerTileQuery, Self::PerTileQuery)
                | (Self::PerTileQuery, Self::WholePolygonBusinessQuery)
                | (Self::WholePolygonBusinessQuery, Self::Finalized)
        )
    }
}

/// Accumulator of one calculation.
#[derive(Debug)]
struct Run {
    state: RunState,
    total_units: u64,
    units_by_address: BTreeMap<String, u64>,
    units_by_street: BTreeMap<String, u64>,
    fallbacks: Vec<FallbackBusinessRecord>,
    total_addresses: u64,
    warnings: Vec<RunWarning>,
}

impl Run {
    const fn new() -> Self {
        Self {
            state: RunState::Idle,
            total_units: 0,
            units_by_address: BTreeMap::new(),
            units_by_street: BTreeMap::new(),
            fallbacks: Vec::new(),
            total_addresses: 0,
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {} -> {next}",
            self.state
        );
        log::trace!("Run state {} -> {next}", self.state);
        self.state = next;
    }

    fn merge_tile(&mut self, tile_index: usize, units: TileUnits, limit: usize) {
        self.total_addresses += units.feature_count as u64;

        if units.overflowed {
            self.warnings.push(RunWarning::TileOverflow {
                tile_index,
                feature_count: units.feature_count,
                limit,
            });
            return;
        }

        self.total_units += units.total_units;
        for (address, count) in units.by_address {
            *self.units_by_address.entry(address).or_default() += count;
        }
        for (street, count) in units.by_street {
            *self.units_by_street.entry(street).or_default() += count;
        }
        self.fallbacks.extend(units.fallbacks);
    }

    fn finalize(mut self, business: BusinessCount, tile_count: usize) -> AggregateResult {
        self.advance(RunState::Finalized);
        self.warnings.extend(business.warnings);

        AggregateResult {
            total_mailboxes: self.total_units + business.total,
            total_units: self.total_units,
            total_businesses: business.total,
            units_by_address: self.units_by_address,
            units_by_street: self.units_by_street,
            businesses_by_address: business.by_address,
            places: business.places,
            total_addresses: self.total_addresses,
            tile_count,
            places_release: business.release,
            warnings: self.warnings,
        }
    }
}

/// Runs delivery point calculations against a register and a places source.
pub struct Aggregator {
    settings: Settings,
    registry: Arc<dyn IdentifyService>,
    places: Arc<dyn PlacesSource>,
}

impl Aggregator {
    /// Creates an aggregator over a register and a places source.
    ///
    /// Holds no per-run state, so one instance serves any number of
    /// [`Aggregator::compute`] calls.
    #[must_use]
    pub fn new(
        settings: Settings,
        registry: Arc<dyn IdentifyService>,
        places: Arc<dyn PlacesSource>,
    ) -> Self {
        Self {
            settings,
            registry,
            places,
        }
    }

    /// Settings this aggregator runs with.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates `polygon`, applies the area guards and splits it into
    /// tiles. No external request is made.
    ///
    /// Returns the tiles plus a [`RunWarning::LargePolygon`] when the area
    /// is above the soft threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidPolygon`] or
    /// [`ComputeError::PolygonTooLarge`].
    pub fn plan(
        &self,
        polygon: &Polygon<f64>,
    ) -> Result<(Vec<Tile>, Option<RunWarning>), ComputeError> {
        briefkasten_tiler::validate_polygon(polygon)?;

        let area = briefkasten_tiler::polygon_area(polygon);
        let limits = &self.settings.limits;

        if area > limits.max_area {
            log::error!(
                "Polygon area {area:.6} exceeds the limit of {:.6}; refusing to tile",
                limits.max_area
            );
            return Err(ComputeError::PolygonTooLarge {
                area,
                limit: limits.max_area,
            });
        }

        let warning = (area > limits.warn_area).then(|| {
            log::warn!(
                "Polygon area {area:.6} exceeds {:.6}; the calculation may take a long time",
                limits.warn_area
            );
            RunWarning::LargePolygon {
                area,
                threshold: limits.warn_area,
            }
        });

        let tiles = briefkasten_tiler::split_polygon(polygon, self.settings.tiling.max_tile_area)?;
        log::info!("Polygon area {area:.6} split into {} tiles", tiles.len());

        Ok((tiles, warning))
    }

    /// Estimates the delivery points inside `polygon`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidPolygon`] or
    /// [`ComputeError::PolygonTooLarge`]; both are raised before any
    /// external request. Every other failure is reported as a warning on
    /// the result.
    pub async fn compute(
        &self,
        polygon: &Polygon<f64>,
        progress: &dyn ProgressCallback,
    ) -> Result<AggregateResult, ComputeError> {
        let mut run = Run::new();

        run.advance(RunState::Tiling);
        let (tiles, warning) = self.plan(polygon)?;
        run.warnings.extend(warning);

        progress.set_total(tiles.len() as u64);
        progress.set_message("Counting apartments".to_string());

        let options = self.settings.registry.unit_options();

        run.advance(RunState::PerTileQuery);
        for (position, tile) in tiles.iter().enumerate() {
            if position > 0 {
                run.advance(RunState::PerTileQuery);
            }

            match count_tile(self.registry.as_ref(), &tile.polygon, &options).await {
                Ok(units) => run.merge_tile(tile.index, units, options.overflow_threshold),
                Err(e) => {
                    log::error!("Register query for tile {} failed: {e}", tile.index);
                    run.warnings.push(RunWarning::TileQueryFailed {
                        tile_index: tile.index,
                        message: e.to_string(),
                    });
                }
            }

            progress.tile_done(TileProgress {
                index: tile.index,
                remaining: tiles.len() - position - 1,
            });
        }

        log::info!(
            "Units: {} across {} addresses examined",
            run.total_units,
            run.total_addresses
        );

        run.advance(RunState::WholePolygonBusinessQuery);
        progress.set_message("Counting businesses".to_string());
        let business = self.count_businesses(polygon, &run.fallbacks).await;

        let result = run.finalize(business, tiles.len());
        progress.finish(format!("{} delivery points", result.total_mailboxes));

        log::info!(
            "Finished: {} mailboxes ({} units, {} businesses), {} warnings",
            result.total_mailboxes,
            result.total_units,
            result.total_businesses,
            result.warnings.len()
        );

        Ok(result)
    }

    async fn count_businesses(
        &self,
        polygon: &Polygon<f64>,
        fallbacks: &[FallbackBusinessRecord],
    ) -> BusinessCount {
        let places = &self.settings.places;

        if places.enabled {
            return briefkasten_places::count_businesses(
                self.places.as_ref(),
                polygon,
                fallbacks,
                &places.fallback_release,
            )
            .await;
        }

        log::info!("Places lookup disabled; counting register fallbacks only");
        let mut listing = Vec::new();
        briefkasten_places::merge_fallback_records(&mut listing, fallbacks);
        BusinessCount {
            total: listing.len() as u64,
            by_address: briefkasten_places::group_by_address(&listing),
            places: listing,
            release: None,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use briefkasten_mailbox_models::{FallbackPolicy, PlaceOrigin};
    use briefkasten_places::{PlacesError, RawPlace};
    use briefkasten_registry::RegistryError;
    use briefkasten_tiler::polygon_from_coords;
    use serde_json::{Value, json};

    /// Register mock: answers the n-th call with `responses[n]` (the last
    /// entry repeats); `None` fails the call.
    struct ScriptedRegistry {
        responses: Vec<Option<Vec<Value>>>,
        calls: AtomicUsize,
    }

    impl ScriptedRegistry {
        fn new(responses: Vec<Option<Vec<Value>>>) -> Arc<Self> {
            Arc::new(Self {
                responses,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentifyService for ScriptedRegistry {
        async fn identify(&self, _area: &Polygon<f64>) -> Result<Vec<Value>, RegistryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .get(n)
                .or_else(|| self.responses.last())
                .cloned()
                .flatten();
            response.ok_or_else(|| RegistryError::Response {
                message: "HTTP 503".to_string(),
            })
        }
    }

    struct FixedPlaces {
        rows: Vec<RawPlace>,
        calls: AtomicUsize,
    }

    impl FixedPlaces {
        fn new(rows: Vec<RawPlace>) -> Arc<Self> {
            Arc::new(Self {
                rows,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PlacesSource for FixedPlaces {
        async fn latest_release(&self) -> Result<String, PlacesError> {
            Ok("2025-01-22.0".to_string())
        }

        async fn places_in(
            &self,
            _area: &Polygon<f64>,
            _release: &str,
        ) -> Result<Vec<RawPlace>, PlacesError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        total: Mutex<u64>,
        ticks: Mutex<Vec<TileProgress>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn set_total(&self, total: u64) {
            *self.total.lock().unwrap() = total;
        }
        fn tile_done(&self, progress: TileProgress) {
            self.ticks.lock().unwrap().push(progress);
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, _msg: String) {}
        fn finish_and_clear(&self) {}
    }

    fn unit(apartments: u64, address: &str) -> Value {
        json!({ "attributes": {
            "ganzwhg": apartments,
            "strname_deinr": address,
            "strname": [address.split(' ').next().unwrap_or_default()],
        }})
    }

    fn shelter(address: &str) -> Value {
        json!({ "attributes": { "ganzwhg": 0, "gkat": 1010, "strname_deinr": address }})
    }

    fn place(name: &str, address: &str) -> RawPlace {
        RawPlace {
            name: Some(name.to_string()),
            addresses: Some(json!([{ "freeform": address }]).to_string()),
            category: Some("shop".to_string()),
            category_alt: None,
        }
    }

    /// 0.004 x 0.002 degrees: two tiles at the default tile area.
    fn two_tile_polygon() -> Polygon<f64> {
        polygon_from_coords(&[
            [7.440, 46.940],
            [7.444, 46.940],
            [7.444, 46.942],
            [7.440, 46.942],
        ])
        .unwrap()
    }

    fn small_polygon() -> Polygon<f64> {
        polygon_from_coords(&[[7.440, 46.940], [7.441, 46.940], [7.441, 46.941], [7.440, 46.941]])
            .unwrap()
    }

    fn aggregator(
        settings: Settings,
        registry: Arc<ScriptedRegistry>,
        places: Arc<FixedPlaces>,
    ) -> Aggregator {
        Aggregator::new(settings, registry, places)
    }

    #[test]
    fn state_transitions_follow_pipeline_order() {
        use RunState::{Finalized, Idle, PerTileQuery, Tiling, WholePolygonBusinessQuery};

        assert!(Idle.can_advance_to(Tiling));
        assert!(Tiling.can_advance_to(PerTileQuery));
        assert!(PerTileQuery.can_advance_to(PerTileQuery));
        assert!(PerTileQuery.can_advance_to(WholePolygonBusinessQuery));
        assert!(WholePolygonBusinessQuery.can_advance_to(Finalized));

        assert!(!Idle.can_advance_to(PerTileQuery));
        assert!(!Tiling.can_advance_to(WholePolygonBusinessQuery));
        assert!(!PerTileQuery.can_advance_to(Finalized));
        assert!(!Finalized.can_advance_to(Tiling));
    }

    #[tokio::test]
    async fn sums_tiles_and_businesses() {
        let registry = ScriptedRegistry::new(vec![
            Some(vec![unit(2, "Bahnhofstrasse 1"), shelter("Bahnhofstrasse 3")]),
            Some(vec![unit(4, "Bahnhofstrasse 1")]),
        ]);
        let places = FixedPlaces::new(vec![place("Migros", "Marktgasse 2")]);
        let progress = RecordingProgress::default();

        let result = aggregator(Settings::defaults(), registry.clone(), places.clone())
            .compute(&two_tile_polygon(), &progress)
            .await
            .unwrap();

        assert_eq!(registry.calls(), 2);
        assert_eq!(places.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.tile_count, 2);
        assert_eq!(result.total_units, 7);
        assert_eq!(result.units_by_address["Bahnhofstrasse 1"], 6);
        assert_eq!(result.units_by_address["Bahnhofstrasse 3"], 1);
        assert_eq!(result.total_businesses, 1);
        assert_eq!(result.total_mailboxes, 8);
        assert_eq!(result.total_addresses, 3);
        assert_eq!(result.places_release.as_deref(), Some("2025-01-22.0"));
        assert!(result.warnings.is_empty());

        assert_eq!(*progress.total.lock().unwrap(), 2);
        assert_eq!(
            *progress.ticks.lock().unwrap(),
            vec![
                TileProgress { index: 0, remaining: 1 },
                TileProgress { index: 1, remaining: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn oversized_polygon_is_refused_without_requests() {
        let registry = ScriptedRegistry::new(vec![Some(vec![])]);
        let places = FixedPlaces::new(vec![]);
        let huge =
            polygon_from_coords(&[[7.0, 46.5], [7.2, 46.5], [7.2, 46.7], [7.0, 46.7]]).unwrap();

        let result = aggregator(Settings::defaults(), registry.clone(), places.clone())
            .compute(&huge, &NullProgress)
            .await;

        assert!(matches!(result, Err(ComputeError::PolygonTooLarge { .. })));
        assert_eq!(registry.calls(), 0);
        assert_eq!(places.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn self_intersecting_polygon_is_invalid() {
        let registry = ScriptedRegistry::new(vec![Some(vec![])]);
        let bow_tie =
            polygon_from_coords(&[[7.44, 46.94], [7.441, 46.941], [7.441, 46.94], [7.44, 46.941]])
                .unwrap();

        let result = aggregator(Settings::defaults(), registry.clone(), FixedPlaces::new(vec![]))
            .compute(&bow_tie, &NullProgress)
            .await;

        assert!(matches!(result, Err(ComputeError::InvalidPolygon { .. })));
        assert_eq!(registry.calls(), 0);
    }

    #[tokio::test]
    async fn large_polygon_runs_with_warning() {
        let mut settings = Settings::defaults();
        settings.limits.warn_area = 0.000_000_5;
        settings.tiling.max_tile_area = 0.000_002;
        let registry = ScriptedRegistry::new(vec![Some(vec![unit(1, "Kramgasse 1")])]);

        let result = aggregator(settings, registry, FixedPlaces::new(vec![]))
            .compute(&small_polygon(), &NullProgress)
            .await
            .unwrap();

        assert!(matches!(
            result.warnings.first(),
            Some(RunWarning::LargePolygon { .. })
        ));
        assert_eq!(result.total_units, 1);
    }

    #[tokio::test]
    async fn overflowing_tile_contributes_zero_and_warns() {
        let crowded: Vec<Value> = (0..200)
            .map(|i| unit(1, &format!("Langstrasse {i}")))
            .collect();
        let registry =
            ScriptedRegistry::new(vec![Some(crowded), Some(vec![unit(3, "Kramgasse 5")])]);

        let result = aggregator(Settings::defaults(), registry, FixedPlaces::new(vec![]))
            .compute(&two_tile_polygon(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(result.total_units, 3);
        assert_eq!(result.units_by_address.len(), 1);
        assert!(!result.units_by_street.contains_key("Langstrasse"));
        assert_eq!(result.total_addresses, 201);
        assert_eq!(
            result.warnings,
            vec![RunWarning::TileOverflow {
                tile_index: 0,
                feature_count: 200,
                limit: 200,
            }]
        );
        assert!(result.units_incomplete());
    }

    #[tokio::test]
    async fn failed_tile_is_skipped_and_reported() {
        let registry = ScriptedRegistry::new(vec![None, Some(vec![unit(2, "Kramgasse 7")])]);

        let result = aggregator(Settings::defaults(), registry.clone(), FixedPlaces::new(vec![]))
            .compute(&two_tile_polygon(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(registry.calls(), 2);
        assert_eq!(result.total_units, 2);
        assert!(matches!(
            result.warnings.as_slice(),
            [RunWarning::TileQueryFailed { tile_index: 0, .. }]
        ));
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let registry = ScriptedRegistry::new(vec![Some(vec![
            unit(2, "Bahnhofstrasse 1"),
            shelter("Bahnhofstrasse 3"),
        ])]);
        let places = FixedPlaces::new(vec![place("Migros", "Bahnhofstrasse 3")]);
        let aggregator = aggregator(Settings::defaults(), registry, places);

        let first = aggregator
            .compute(&two_tile_polygon(), &NullProgress)
            .await
            .unwrap();
        let second = aggregator
            .compute(&two_tile_polygon(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_units, 6);
    }

    #[tokio::test]
    async fn accumulators_do_not_leak_between_runs() {
        let registry = ScriptedRegistry::new(vec![Some(vec![unit(5, "Kramgasse 1")])]);
        let aggregator = aggregator(Settings::defaults(), registry, FixedPlaces::new(vec![]));

        let big = aggregator
            .compute(&two_tile_polygon(), &NullProgress)
            .await
            .unwrap();
        let small = aggregator
            .compute(&small_polygon(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(big.total_units, 10);
        assert_eq!(small.tile_count, 1);
        assert_eq!(small.total_units, 5);
        assert_eq!(small.units_by_address["Kramgasse 1"], 5);
    }

    #[tokio::test]
    async fn deferred_fallbacks_are_deduplicated_against_places() {
        let mut settings = Settings::defaults();
        settings.registry.fallback_policy = FallbackPolicy::DeferToBusinesses;

        let registry = ScriptedRegistry::new(vec![
            Some(vec![shelter("Bahnhofstrasse 3"), shelter("Bahnhofstrasse 5")]),
            Some(vec![shelter("Bahnhofstrasse 5")]),
        ]);
        let places = FixedPlaces::new(vec![place("Migros", "Bahnhofstrasse 3")]);

        let result = aggregator(settings, registry, places)
            .compute(&two_tile_polygon(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(result.total_units, 0);
        assert_eq!(result.total_businesses, 2);
        assert_eq!(result.total_mailboxes, 2);
        assert_eq!(result.businesses_by_address["Bahnhofstrasse 3"], 1);
        assert_eq!(result.businesses_by_address["Bahnhofstrasse 5"], 1);

        let synthesised: Vec<_> = result
            .places
            .iter()
            .filter(|p| p.origin == PlaceOrigin::RegistryFallback)
            .collect();
        assert_eq!(synthesised.len(), 1);
        assert_eq!(synthesised[0].address, "Bahnhofstrasse 5");
    }

    #[tokio::test]
    async fn disabled_places_still_lists_fallbacks() {
        let mut settings = Settings::defaults();
        settings.places.enabled = false;
        settings.registry.fallback_policy = FallbackPolicy::DeferToBusinesses;

        let registry = ScriptedRegistry::new(vec![Some(vec![shelter("Aarbergergasse 8")])]);
        let places = FixedPlaces::new(vec![place("Migros", "Marktgasse 2")]);

        let result = aggregator(settings, registry, places.clone())
            .compute(&small_polygon(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(places.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.total_businesses, 1);
        assert_eq!(result.places_release, None);
        assert_eq!(result.places[0].address, "Aarbergergasse 8");
    }
}
