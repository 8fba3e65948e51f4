//! Polygon input options shared by the subcommands.

use std::path::PathBuf;

use clap::Args;
use geo::Polygon;

/// Where the polygon comes from. Exactly one option must be given.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct PolygonArgs {
    /// `GeoJSON` file (geometry, Feature or the first polygon of a `FeatureCollection`)
    #[arg(long, value_name = "PATH")]
    pub geojson: Option<PathBuf>,

    /// Coordinate list as JSON, e.g. '[[7.40,46.90],[7.42,46.90],[7.42,46.91]]'
    #[arg(long, value_name = "JSON")]
    pub coords: Option<String>,

    /// Share link of a map.geo.admin.ch drawing (e.g. `https://s.geo.admin.ch/...`)
    #[arg(long, value_name = "URL")]
    pub kml_url: Option<String>,
}

/// Reads the polygon named by `args`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the input cannot be
/// parsed, or the drawing cannot be downloaded.
pub async fn load_polygon(
    args: &PolygonArgs,
    max_retries: u32,
) -> Result<Polygon<f64>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.geojson {
        let text = tokio::fs::read_to_string(path).await?;
        return Ok(briefkasten_tiler::parse_polygon_geojson(&text)?);
    }

    if let Some(coords) = &args.coords {
        return Ok(briefkasten_tiler::parse_polygon_geojson(coords)?);
    }

    if let Some(url) = &args.kml_url {
        return Ok(crate::kml::load_kml_polygon(url, max_retries).await?);
    }

    Err("one of --geojson, --coords or --kml-url is required".into())
}
