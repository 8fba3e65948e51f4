//! `DuckDB`-backed access to the Overture Maps places theme.
//!
//! Each query opens a fresh in-memory connection, loads the `spatial` and
//! `httpfs` extensions and reads the release's GeoParquet files straight
//! from S3. The bounding-box columns are compared first so row groups
//! outside the polygon are skipped before the exact intersection test.

use std::time::Duration;

use async_trait::async_trait;
use duckdb::Connection;
use geo::{BoundingRect, Polygon};
use regex::Regex;

use crate::{PlacesConfig, PlacesError, PlacesSource, RawPlace, release::parse_release_page};

/// Places source reading Overture GeoParquet releases from S3.
pub struct OverturePlaces {
    client: reqwest::Client,
    config: PlacesConfig,
    release_pattern: Regex,
}

impl OverturePlaces {
    /// Builds the source from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PlacesError`] if the release pattern is not a valid regex or
    /// the HTTP client cannot be built.
    pub fn new(config: PlacesConfig) -> Result<Self, PlacesError> {
        let release_pattern = Regex::new(&config.release_pattern)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            release_pattern,
        })
    }
}

#[async_trait]
impl PlacesSource for OverturePlaces {
    async fn latest_release(&self) -> Result<String, PlacesError> {
        let html = briefkasten_http::send_text(
            || self.client.get(&self.config.release_url),
            self.config.max_retries,
        )
        .await?;

        parse_release_page(&html, &self.release_pattern).ok_or_else(|| {
            PlacesError::ReleaseResolution {
                message: format!("no release identifier on {}", self.config.release_url),
            }
        })
    }

    async fn places_in(
        &self,
        area: &Polygon<f64>,
        release: &str,
    ) -> Result<Vec<RawPlace>, PlacesError> {
        let Some(rect) = area.bounding_rect() else {
            return Ok(vec![]);
        };

        let query = PlacesQuery {
            parquet_path: self.config.parquet_path(release),
            s3_region: self.config.s3_region.clone(),
            wkt: briefkasten_tiler::polygon_to_wkt(area),
            bbox: [rect.min().x, rect.min().y, rect.max().x, rect.max().y],
        };

        log::info!("Querying places from {}", query.parquet_path);

        let places = tokio::task::spawn_blocking(move || query_places_sync(&query)).await??;

        log::info!("Places intersecting polygon: {}", places.len());
        Ok(places)
    }
}

struct PlacesQuery {
    parquet_path: String,
    s3_region: String,
    wkt: String,
    /// `[xmin, ymin, xmax, ymax]`
    bbox: [f64; 4],
}

/// Single-quotes a value for inclusion in SQL text.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn places_sql(parquet_path: &str) -> String {
    format!(
        "SELECT
             names.primary AS name,
             CAST(to_json(addresses) AS VARCHAR) AS addresses,
             categories.primary AS category,
             array_to_string(categories.alternate, ',') AS category_alt
         FROM read_parquet({}, filename = true, hive_partitioning = 1)
         WHERE bbox.xmax >= ? AND bbox.xmin <= ?
           AND bbox.ymax >= ? AND bbox.ymin <= ?
           AND ST_Intersects(geometry, ST_GeomFromText(?))",
        sql_literal(parquet_path)
    )
}

fn query_places_sync(query: &PlacesQuery) -> Result<Vec<RawPlace>, PlacesError> {
    let conn = Connection::open_in_memory()?;

    conn.execute_batch(&format!(
        "INSTALL spatial; LOAD spatial;
         INSTALL httpfs; LOAD httpfs;
         SET s3_region = {};",
        sql_literal(&query.s3_region)
    ))?;

    let [xmin, ymin, xmax, ymax] = query.bbox;
    let mut stmt = conn.prepare(&places_sql(&query.parquet_path))?;
    let mut rows = stmt.query(duckdb::params![xmin, xmax, ymin, ymax, query.wkt])?;

    let mut places = Vec::new();
    while let Some(row) = rows.next()? {
        places.push(RawPlace {
            name: row.get(0)?,
            addresses: row.get(1)?,
            category: row.get(2)?,
            category_alt: row.get(3)?,
        });
    }

    Ok(places)
}
