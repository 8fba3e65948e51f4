#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Business counting from the Overture Maps places theme.
//!
//! The places dataset is published as GeoParquet on S3, one directory per
//! release. [`PlacesSource`] abstracts "which release is current" and "which
//! places intersect this polygon" so the counting in [`business`] can run
//! against a fixed in-memory source in tests. [`OverturePlaces`] is the
//! production implementation backed by `DuckDB`.

pub mod business;
pub mod overture;
pub mod release;

use async_trait::async_trait;
use geo::Polygon;
use serde::Deserialize;

pub use business::{
    BusinessCount, address_entries, count_businesses, flatten_addresses, group_by_address,
    merge_fallback_records,
};
pub use overture::OverturePlaces;
pub use release::{parse_release_page, resolve_release};

/// Errors from the places dataset.
#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    /// Fetching the release page failed.
    #[error(transparent)]
    Http(#[from] briefkasten_http::HttpError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The `DuckDB` query failed.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// An addresses column held malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking query task panicked or was cancelled.
    #[error("Query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The configured release pattern is not a valid regex.
    #[error("Invalid release pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// No release identifier could be found.
    #[error("Release resolution failed: {message}")]
    ReleaseResolution {
        /// What was missing.
        message: String,
    },
}

/// Places dataset location and lookup settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlacesConfig {
    /// Whether businesses are counted at all.
    pub enabled: bool,
    /// Page announcing the latest release.
    pub release_url: String,
    /// Regex whose first capture group is the release identifier.
    pub release_pattern: String,
    /// Release used when the latest one cannot be resolved.
    pub fallback_release: String,
    /// S3 region of the dataset bucket.
    pub s3_region: String,
    /// Parquet glob with a `{release}` placeholder.
    pub parquet_template: String,
    /// Timeout for the release page request in seconds.
    pub timeout_secs: u64,
    /// Retries for the release page request.
    pub max_retries: u32,
}

impl PlacesConfig {
    /// Parquet glob for one release.
    #[must_use]
    pub fn parquet_path(&self, release: &str) -> String {
        self.parquet_template.replace("{release}", release)
    }
}

/// One row of the places dataset, as read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPlace {
    /// Primary name.
    pub name: Option<String>,
    /// Addresses column serialised as JSON (a list of address objects).
    pub addresses: Option<String>,
    /// Primary category.
    pub category: Option<String>,
    /// Comma-joined alternate categories.
    pub category_alt: Option<String>,
}

/// Access to a places dataset.
#[async_trait]
pub trait PlacesSource: Send + Sync {
    /// Identifier of the most recent release.
    ///
    /// # Errors
    ///
    /// Returns [`PlacesError`] if the release cannot be determined.
    async fn latest_release(&self) -> Result<String, PlacesError>;

    /// All places of `release` whose geometry intersects `area`.
    ///
    /// # Errors
    ///
    /// Returns [`PlacesError`] if the dataset cannot be queried.
    async fn places_in(
        &self,
        area: &Polygon<f64>,
        release: &str,
    ) -> Result<Vec<RawPlace>, PlacesError>;
}
