#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data model for mail delivery point estimation.
//!
//! Registry units, fallback business records and places flow from the two
//! counters into the aggregator, which folds them into one
//! [`AggregateResult`] per calculation.

pub mod category;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Address or street key used when the register leaves the field empty.
pub const UNKNOWN: &str = "Unknown";

/// What to do with a register feature that lists zero apartments but whose
/// building category implies someone receives mail there.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FallbackPolicy {
    /// Count the building as exactly one delivery point in the unit totals.
    #[default]
    InflateCount,
    /// Leave the unit count at zero and hand the address to the business
    /// counter as a [`FallbackBusinessRecord`].
    DeferToBusinesses,
}

/// One feature of the building and dwelling register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    /// Street name plus house number (e.g. "Bahnhofstrasse 1").
    pub address: String,
    /// Street name alone.
    pub street: String,
    /// Number of complete dwellings at the address.
    pub apartments: u64,
    /// Building category code (`gkat`).
    pub gkat: Option<u32>,
    /// Building class code (`gklas`).
    pub gklas: Option<u32>,
}

/// A non-residential delivery point inferred from a zero-apartment
/// register feature. Only exists within one calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackBusinessRecord {
    /// Address of the building.
    pub address: String,
    /// Description of the building category that triggered the fallback.
    pub category: String,
}

/// Where a place in the business listing came from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlaceOrigin {
    /// Row of the places dataset.
    PlacesDataset,
    /// Synthesised from a [`FallbackBusinessRecord`].
    RegistryFallback,
}

/// A business or place with a delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceRecord {
    /// Primary name, or [`UNKNOWN`] for synthesised entries.
    pub name: String,
    /// Comma-joined free-form addresses.
    pub address: String,
    /// The individual free-form addresses joined in `address`.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Primary category.
    pub category: String,
    /// Comma-joined alternate categories.
    pub category_alt: Option<String>,
    /// Source of the entry.
    pub origin: PlaceOrigin,
}

/// Recoverable condition recorded during a calculation.
///
/// None of these abort the run; they tell the caller which parts of the
/// result are incomplete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// The polygon is above the soft area threshold; the run may take long.
    LargePolygon {
        /// Polygon area in square degrees.
        area: f64,
        /// Soft threshold in square degrees.
        threshold: f64,
    },
    /// A tile returned as many features as the register will deliver, so its
    /// counts were discarded.
    TileOverflow {
        /// Zero-based tile index.
        tile_index: usize,
        /// Number of features returned.
        feature_count: usize,
        /// Feature count at which a tile is discarded.
        limit: usize,
    },
    /// The register query for a tile failed; the tile contributes nothing.
    TileQueryFailed {
        /// Zero-based tile index.
        tile_index: usize,
        /// Error description.
        message: String,
    },
    /// The latest places release could not be resolved and the configured
    /// fallback release was used.
    ReleaseFallback {
        /// Release that was queried instead.
        release: String,
        /// Why resolution failed.
        message: String,
    },
    /// The places dataset could not be queried; business counts are zero.
    PlacesUnavailable {
        /// Error description.
        message: String,
    },
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LargePolygon { area, threshold } => write!(
                f,
                "polygon area {area:.6} exceeds {threshold:.6} square degrees; \
                 the calculation may take a long time"
            ),
            Self::TileOverflow {
                tile_index,
                feature_count,
                limit,
            } => write!(
                f,
                "tile {tile_index} returned {feature_count} addresses (limit {limit}); \
                 its counts were discarded, use a smaller tile area"
            ),
            Self::TileQueryFailed {
                tile_index,
                message,
            } => write!(f, "tile {tile_index} could not be queried: {message}"),
            Self::ReleaseFallback { release, message } => write!(
                f,
                "places release lookup failed ({message}); using release {release}"
            ),
            Self::PlacesUnavailable { message } => {
                write!(f, "places dataset unavailable: {message}")
            }
        }
    }
}

/// Final output of one calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    /// Units plus businesses.
    pub total_mailboxes: u64,
    /// Apartments (and inflated fallback units) over all tiles.
    pub total_units: u64,
    /// Places with an address, including synthesised fallback entries.
    pub total_businesses: u64,
    /// Units per address.
    pub units_by_address: BTreeMap<String, u64>,
    /// Units per street.
    pub units_by_street: BTreeMap<String, u64>,
    /// Businesses per address.
    pub businesses_by_address: BTreeMap<String, u64>,
    /// Full business listing.
    pub places: Vec<PlaceRecord>,
    /// Register features examined over all tiles, overflowing ones included.
    pub total_addresses: u64,
    /// Number of tiles queried.
    pub tile_count: usize,
    /// Places dataset release that was queried, if any.
    pub places_release: Option<String>,
    /// Recoverable conditions encountered during the run.
    pub warnings: Vec<RunWarning>,
}

impl AggregateResult {
    /// Returns `true` if any tile was discarded or failed, i.e. the unit
    /// totals are a lower bound.
    #[must_use]
    pub fn units_incomplete(&self) -> bool {
        self.warnings.iter().any(|w| {
            matches!(
                w,
                RunWarning::TileOverflow { .. } | RunWarning::TileQueryFailed { .. }
            )
        })
    }
}
