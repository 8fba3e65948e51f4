#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Apartment counting against the federal building and dwelling register.
//!
//! The register is queried through the geo.admin.ch `MapServer/identify`
//! endpoint with one polygon per tile. [`IdentifyService`] abstracts the
//! endpoint so the counting rules in [`units`] can be exercised without
//! network access; [`client::GeoAdminClient`] is the HTTP implementation.

pub mod client;
pub mod units;

use async_trait::async_trait;
use briefkasten_mailbox_models::FallbackPolicy;
use geo::Polygon;
use serde::Deserialize;

pub use client::GeoAdminClient;
pub use units::{TileUnits, UnitOptions, count_tile, extract_units, parse_unit_record};

/// Errors from register queries.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// HTTP exchange failed.
    #[error(transparent)]
    Http(#[from] briefkasten_http::HttpError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The response did not have the expected shape.
    #[error("Unexpected register response: {message}")]
    Response {
        /// Description of what was missing.
        message: String,
    },
}

/// Register endpoint and counting settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryConfig {
    /// Identify endpoint URL.
    pub endpoint: String,
    /// Layer selector (e.g. `"all:ch.bfs.gebaeude_wohnungs_register"`).
    pub layer: String,
    /// Spatial reference id of the submitted geometry.
    pub spatial_reference: u32,
    /// Result limit sent with every request.
    pub result_limit: u32,
    /// Feature count at which a tile is considered truncated.
    pub overflow_threshold: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient failures (capped by
    /// [`briefkasten_http::MAX_RETRIES_CAP`]).
    pub max_retries: u32,
    /// Handling of zero-apartment buildings.
    pub fallback_policy: FallbackPolicy,
}

impl RegistryConfig {
    /// Counting options derived from this configuration.
    #[must_use]
    pub const fn unit_options(&self) -> UnitOptions {
        UnitOptions {
            policy: self.fallback_policy,
            overflow_threshold: self.overflow_threshold,
        }
    }
}

/// A spatial identify query against the register.
#[async_trait]
pub trait IdentifyService: Send + Sync {
    /// Returns the raw features (objects with an `attributes` map) whose
    /// location lies inside `area`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the query fails.
    async fn identify(&self, area: &Polygon<f64>) -> Result<Vec<serde_json::Value>, RegistryError>;
}
