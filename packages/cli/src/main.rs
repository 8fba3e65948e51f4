#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Mailbox estimator for polygons in Switzerland.
//!
//! Counts residential units from the federal building and dwelling register
//! and businesses from the Overture Maps places dataset inside a polygon.
//! Without a subcommand an interactive menu is shown.
//!
//! Uses `indicatif-log-bridge` (via [`briefkasten_cli_utils::init_logger`])
//! so that log lines and the tile progress bar never fight for the
//! terminal.

mod input;
mod interactive;
mod kml;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use briefkasten_aggregator::{Aggregator, ProgressCallback, Settings, null_progress};
use briefkasten_cli_utils::{IndicatifProgress, MultiProgress};
use briefkasten_mailbox_models::FallbackPolicy;
use briefkasten_places::OverturePlaces;
use briefkasten_registry::GeoAdminClient;
use clap::{Parser, Subcommand};
use geo::Polygon;

use crate::input::PolygonArgs;

#[derive(Parser)]
#[command(name = "briefkasten", about = "Estimate mail delivery points inside a polygon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count units and businesses inside a polygon
    Compute {
        #[command(flatten)]
        input: PolygonArgs,
        /// TOML file overriding the built-in settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Handling of zero-apartment buildings (`inflate_count` or `defer_to_businesses`)
        #[arg(long, value_parser = parse_policy)]
        policy: Option<FallbackPolicy>,
        /// Skip the Overture places query
        #[arg(long)]
        no_businesses: bool,
        /// Print the result as JSON instead of a report
        #[arg(long)]
        json: bool,
        /// Also write the tiles as `GeoJSON` to this file
        #[arg(long, value_name = "PATH")]
        export_tiles: Option<PathBuf>,
        /// Rows shown per table in the report
        #[arg(long, default_value = "20")]
        top: usize,
    },
    /// Split a polygon into query tiles and print them as `GeoJSON`
    Tiles {
        #[command(flatten)]
        input: PolygonArgs,
        /// TOML file overriding the built-in settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// List the building categories and which count as delivery points
    Categories,
}

/// Options of one `compute` run.
pub struct ComputeOptions {
    /// Overrides `[registry] fallback_policy` when set.
    pub policy: Option<FallbackPolicy>,
    /// Skips the places query.
    pub no_businesses: bool,
    /// Prints the result as JSON instead of the text report.
    pub json: bool,
    /// Writes the tiles as `GeoJSON` to this path before counting.
    pub export_tiles: Option<PathBuf>,
    /// Rows shown per report table.
    pub top: usize,
}

fn parse_policy(value: &str) -> Result<FallbackPolicy, String> {
    value
        .parse()
        .map_err(|_| format!("expected `inflate_count` or `defer_to_businesses`, got `{value}`"))
}

fn load_settings(config: Option<&Path>) -> Result<Settings, briefkasten_aggregator::ConfigError> {
    config.map_or_else(|| Ok(Settings::defaults()), Settings::load)
}

fn build_aggregator(settings: Settings) -> Result<Aggregator, Box<dyn std::error::Error>> {
    let registry = GeoAdminClient::new(settings.registry.clone())?;
    let places = OverturePlaces::new(settings.places.clone())?;
    Ok(Aggregator::new(settings, Arc::new(registry), Arc::new(places)))
}

fn write_tiles(
    aggregator: &Aggregator,
    polygon: &Polygon<f64>,
    output: Option<&Path>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let (tiles, _) = aggregator.plan(polygon)?;
    let collection = briefkasten_tiler::tiles_to_geojson(&tiles);
    let text = serde_json::to_string_pretty(&collection)?;

    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            log::info!("Wrote {} tiles to {}", tiles.len(), path.display());
        }
        None => println!("{text}"),
    }

    Ok(tiles.len())
}

/// Runs one calculation with `settings` and prints the result.
///
/// # Errors
///
/// Returns an error if the clients cannot be built or the calculation
/// fails.
pub async fn compute(
    multi: &MultiProgress,
    polygon: &Polygon<f64>,
    mut settings: Settings,
    options: &ComputeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(policy) = options.policy {
        settings.registry.fallback_policy = policy;
    }
    if options.no_businesses {
        settings.places.enabled = false;
    }
    log::info!(
        "Zero-apartment policy: {}",
        settings.registry.fallback_policy
    );

    let aggregator = build_aggregator(settings)?;

    if let Some(path) = &options.export_tiles {
        write_tiles(&aggregator, polygon, Some(path))?;
    }

    let progress: Arc<dyn ProgressCallback> = if options.json {
        null_progress()
    } else {
        IndicatifProgress::tiles_bar(multi, "Tiling polygon")
    };

    let result = aggregator.compute(polygon, progress.as_ref()).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        progress.finish_and_clear();
        print!("{}", report::render_report(&result, options.top));
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = briefkasten_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run(&multi).await;
    };

    match command {
        Commands::Compute {
            input,
            config,
            policy,
            no_businesses,
            json,
            export_tiles,
            top,
        } => {
            let settings = load_settings(config.as_deref())?;
            let polygon = input::load_polygon(&input, settings.registry.max_retries).await?;
            let options = ComputeOptions {
                policy,
                no_businesses,
                json,
                export_tiles,
                top,
            };
            compute(&multi, &polygon, settings, &options).await?;
        }
        Commands::Tiles {
            input,
            config,
            output,
        } => {
            let settings = load_settings(config.as_deref())?;
            let polygon = input::load_polygon(&input, settings.registry.max_retries).await?;
            let aggregator = build_aggregator(settings)?;
            write_tiles(&aggregator, &polygon, output.as_deref())?;
        }
        Commands::Categories => print!("{}", report::render_categories()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefkasten_http::testing::{CannedResponse, serve};
    use briefkasten_tiler::polygon_from_coords;
    use serde_json::{Value, json};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("briefkasten-{}-{name}", std::process::id()))
    }

    fn block() -> Polygon<f64> {
        polygon_from_coords(&[
            [7.440, 46.947],
            [7.442, 46.947],
            [7.442, 46.949],
            [7.440, 46.949],
        ])
        .unwrap()
    }

    #[test]
    fn compute_arguments_parse() {
        let cli = Cli::try_parse_from([
            "briefkasten",
            "compute",
            "--coords",
            "[[7.40,46.90],[7.42,46.90],[7.42,46.91]]",
            "--policy",
            "defer_to_businesses",
            "--no-businesses",
            "--top",
            "5",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Compute {
                input,
                policy,
                no_businesses,
                json,
                top,
                ..
            }) => {
                assert!(input.coords.is_some());
                assert_eq!(policy, Some(FallbackPolicy::DeferToBusinesses));
                assert!(no_businesses);
                assert!(!json);
                assert_eq!(top, 5);
            }
            _ => panic!("expected the compute subcommand"),
        }
    }

    #[test]
    fn polygon_inputs_are_mutually_exclusive() {
        let both = Cli::try_parse_from([
            "briefkasten",
            "tiles",
            "--coords",
            "[[7.40,46.90],[7.42,46.90],[7.42,46.91]]",
            "--geojson",
            "area.geojson",
        ]);
        assert!(both.is_err());

        let none = Cli::try_parse_from(["briefkasten", "compute"]);
        assert!(none.is_err());

        let bad_policy =
            Cli::try_parse_from(["briefkasten", "compute", "--coords", "[]", "--policy", "x"]);
        assert!(bad_policy.is_err());
    }

    #[test]
    fn tiles_are_written_as_geojson() {
        let path = temp_path("tiles.geojson");
        let aggregator = build_aggregator(Settings::defaults()).unwrap();

        let count = write_tiles(&aggregator, &block(), Some(&path)).unwrap();

        let collection: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(count, 1);
        assert_eq!(collection["type"], "FeatureCollection");
        assert_eq!(collection["features"].as_array().map(Vec::len), Some(count));
    }

    #[test]
    fn tiles_refuse_oversized_polygons() {
        let aggregator = build_aggregator(Settings::defaults()).unwrap();
        let huge =
            polygon_from_coords(&[[7.0, 46.5], [7.2, 46.5], [7.2, 46.7], [7.0, 46.7]]).unwrap();

        assert!(write_tiles(&aggregator, &huge, None).is_err());
    }

    #[tokio::test]
    async fn compute_queries_register_and_exports_tiles() {
        let body = json!({
            "results": [
                { "attributes": { "ganzwhg": 3, "strname_deinr": "Kramgasse 10", "gkat": 1020 } }
            ]
        });
        let base = serve(vec![CannedResponse::json(body.to_string())])
            .await
            .unwrap();
        let mut settings = Settings::defaults();
        settings.registry.endpoint = format!("{base}/identify");
        settings.registry.timeout_secs = 5;

        let path = temp_path("compute-tiles.geojson");
        let options = ComputeOptions {
            policy: Some(FallbackPolicy::DeferToBusinesses),
            no_businesses: true,
            json: true,
            export_tiles: Some(path.clone()),
            top: 10,
        };

        compute(&MultiProgress::new(), &block(), settings, &options)
            .await
            .unwrap();

        let exported = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(exported.contains("FeatureCollection"));
    }

    #[tokio::test]
    async fn compute_surfaces_invalid_polygons() {
        let bow_tie =
            polygon_from_coords(&[[7.40, 46.90], [7.42, 46.92], [7.42, 46.90], [7.40, 46.92]])
                .unwrap();
        let options = ComputeOptions {
            policy: None,
            no_businesses: true,
            json: true,
            export_tiles: None,
            top: 10,
        };

        let result = compute(&MultiProgress::new(), &bow_tie, Settings::defaults(), &options).await;

        assert!(result.is_err());
    }
}
