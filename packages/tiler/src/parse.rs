//! Polygon input and output formats.
//!
//! Accepts `GeoJSON` (bare geometry, `Feature`, or the first polygon of a
//! `FeatureCollection`) and plain `[[lon, lat], ...]` coordinate lists, and
//! writes tiles back out as a `GeoJSON` `FeatureCollection` for inspection.

use std::fmt::Write as _;

use geo::{Area, Coord, LineString, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson};
use serde_json::{Map, Value};

use crate::{Tile, TilerError};

/// Builds a polygon from a list of `[lon, lat]` pairs.
///
/// The ring is closed automatically if the last vertex differs from the
/// first.
///
/// # Errors
///
/// Returns [`TilerError::Parse`] if fewer than three vertices are given.
pub fn polygon_from_coords(coords: &[[f64; 2]]) -> Result<Polygon<f64>, TilerError> {
    if coords.len() < 3 {
        return Err(TilerError::Parse {
            message: format!("expected at least 3 vertices, got {}", coords.len()),
        });
    }

    let ring: Vec<Coord<f64>> = coords.iter().map(|&[x, y]| Coord { x, y }).collect();

    Ok(Polygon::new(LineString::new(ring), vec![]))
}

/// Parses a polygon from `GeoJSON` text.
///
/// A single-part `MultiPolygon` is accepted as its only polygon; a raw JSON
/// array of `[lon, lat]` pairs is accepted as well.
///
/// # Errors
///
/// Returns [`TilerError::Parse`] if the text is not `GeoJSON` or contains
/// no polygon.
pub fn parse_polygon_geojson(text: &str) -> Result<Polygon<f64>, TilerError> {
    if let Ok(coords) = serde_json::from_str::<Vec<[f64; 2]>>(text) {
        return polygon_from_coords(&coords);
    }

    let geojson: GeoJson = text.parse().map_err(|e| TilerError::Parse {
        message: format!("{e}"),
    })?;

    let geometries: Vec<geojson::Geometry> = match geojson {
        GeoJson::Geometry(geometry) => vec![geometry],
        GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|f| f.geometry)
            .collect(),
    };

    geometries
        .into_iter()
        .find_map(geometry_to_polygon)
        .ok_or_else(|| TilerError::Parse {
            message: "no polygon geometry found".to_string(),
        })
}

fn geometry_to_polygon(geometry: geojson::Geometry) -> Option<Polygon<f64>> {
    let geometry: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geometry {
        geo::Geometry::Polygon(polygon) => Some(polygon),
        geo::Geometry::MultiPolygon(multi) if multi.0.len() == 1 => multi.0.into_iter().next(),
        _ => None,
    }
}

/// Formats a polygon as WKT, exterior ring first.
#[must_use]
pub fn polygon_to_wkt(polygon: &Polygon<f64>) -> String {
    let mut wkt = String::from("POLYGON(");
    let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());

    for (i, ring) in rings.enumerate() {
        if i > 0 {
            wkt.push(',');
        }
        wkt.push('(');
        for (j, coord) in ring.0.iter().enumerate() {
            if j > 0 {
                wkt.push_str(", ");
            }
            let _ = write!(wkt, "{} {}", coord.x, coord.y);
        }
        wkt.push(')');
    }

    wkt.push(')');
    wkt
}

/// Converts tiles into a `GeoJSON` `FeatureCollection` with `index`, `row`,
/// `col` and `area` properties.
#[must_use]
pub fn tiles_to_geojson(tiles: &[Tile]) -> FeatureCollection {
    let features = tiles
        .iter()
        .map(|tile| {
            let mut properties = Map::new();
            properties.insert("index".to_string(), Value::from(tile.index));
            properties.insert("row".to_string(), Value::from(tile.row));
            properties.insert("col".to_string(), Value::from(tile.col));
            properties.insert(
                "area".to_string(),
                Value::from(tile.polygon.unsigned_area()),
            );

            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&tile.polygon))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
