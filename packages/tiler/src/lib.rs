#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon validation and grid tiling.
//!
//! The building register answers at most a couple of hundred addresses per
//! query, so a user polygon is cut into grid cells small enough to stay
//! below that limit. Each cell is clipped to the polygon and every
//! non-empty piece becomes one [`Tile`].
//!
//! All areas are planar areas in the polygon's own coordinate units, i.e.
//! square degrees for WGS84 input.

pub mod parse;

use geo::{Area, BooleanOps, BoundingRect, Coord, Intersects, Line, Polygon, Rect};

pub use parse::{parse_polygon_geojson, polygon_from_coords, polygon_to_wkt, tiles_to_geojson};

/// Grid ratios within this distance above an integer round down, so that
/// `sqrt` round-off does not add a row or column of slivers.
const RATIO_TOLERANCE: f64 = 1e-9;

/// Clipped pieces below this area (square degrees) are treated as empty.
const SLIVER_AREA: f64 = 1e-15;

/// Largest grid [`split_polygon`] will walk.
pub const MAX_GRID_CELLS: usize = 1_000_000;

/// Errors from polygon validation, parsing and tiling.
#[derive(Debug, thiserror::Error)]
pub enum TilerError {
    /// The polygon cannot be tiled or queried.
    #[error("Invalid polygon: {reason}")]
    InvalidPolygon {
        /// What is wrong with the ring.
        reason: String,
    },

    /// The maximum tile area is not a positive finite number.
    #[error("Invalid maximum tile area: {max_area}")]
    InvalidTileArea {
        /// The rejected value.
        max_area: f64,
    },

    /// The grid over the bounding box would have too many cells.
    #[error("Tiling needs {cells} grid cells (limit {limit})")]
    TooManyCells {
        /// Cells the grid would need.
        cells: usize,
        /// [`MAX_GRID_CELLS`].
        limit: usize,
    },

    /// Polygon input could not be parsed.
    #[error("Polygon parse error: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },
}

impl TilerError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidPolygon {
            reason: reason.into(),
        }
    }
}

/// A grid cell clipped to the source polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Position in the emitted sequence.
    pub index: usize,
    /// Grid row, counted from the bottom of the bounding box.
    pub row: usize,
    /// Grid column, counted from the left of the bounding box.
    pub col: usize,
    /// Clipped geometry.
    pub polygon: Polygon<f64>,
}

impl Tile {
    /// Planar area of the tile.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }
}

/// Planar area of a polygon in its coordinate units.
#[must_use]
pub fn polygon_area(polygon: &Polygon<f64>) -> f64 {
    polygon.unsigned_area()
}

/// Checks that a polygon is usable as a query area.
///
/// The exterior ring needs at least three distinct vertices, finite WGS84
/// coordinates, a non-zero area, and must not cross itself.
///
/// # Errors
///
/// Returns [`TilerError::InvalidPolygon`] describing the first problem found.
pub fn validate_polygon(polygon: &Polygon<f64>) -> Result<(), TilerError> {
    let exterior = polygon.exterior();

    let mut distinct: Vec<Coord<f64>> = Vec::with_capacity(exterior.0.len());
    for coord in &exterior.0 {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Err(TilerError::invalid("ring contains non-finite coordinates"));
        }
        if !(-180.0..=180.0).contains(&coord.x) || !(-90.0..=90.0).contains(&coord.y) {
            return Err(TilerError::invalid(format!(
                "coordinate ({}, {}) is outside the WGS84 range",
                coord.x, coord.y
            )));
        }
        if !distinct.contains(coord) {
            distinct.push(*coord);
        }
    }

    if distinct.len() < 3 {
        return Err(TilerError::invalid(
            "ring needs at least three distinct vertices",
        ));
    }

    if let Some((a, b)) = first_self_intersection(polygon) {
        return Err(TilerError::invalid(format!(
            "ring crosses itself between segments {a} and {b}"
        )));
    }

    if polygon.unsigned_area() <= 0.0 {
        return Err(TilerError::invalid("ring encloses no area"));
    }

    Ok(())
}

/// Finds the first pair of non-adjacent exterior segments that touch.
fn first_self_intersection(polygon: &Polygon<f64>) -> Option<(usize, usize)> {
    let segments: Vec<Line<f64>> = polygon
        .exterior()
        .lines()
        .filter(|line| line.start != line.end)
        .collect();
    let n = segments.len();

    for i in 0..n {
        for j in (i + 2)..n {
            // First and last segment share the closing vertex
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments[i].intersects(&segments[j]) {
                return Some((i, j));
            }
        }
    }

    None
}

/// Splits a polygon into grid tiles whose area does not exceed `max_area`.
///
/// The grid covers the bounding box with `ceil(width / sqrt(max_area))`
/// columns and `ceil(height / sqrt(max_area))` rows, so every cell is at
/// most `max_area` large. Each cell is intersected with the polygon and
/// every non-empty piece is emitted. Tiles come out row by row from the
/// bottom-left cell, and the same input always yields the same sequence.
///
/// A bounding box with zero width or height is treated as a single column
/// or row.
///
/// # Errors
///
/// Returns [`TilerError::InvalidTileArea`] if `max_area` is not positive
/// and finite, [`TilerError::InvalidPolygon`] if the polygon has no
/// bounding box (empty ring), or [`TilerError::TooManyCells`] if the grid
/// would exceed [`MAX_GRID_CELLS`].
pub fn split_polygon(polygon: &Polygon<f64>, max_area: f64) -> Result<Vec<Tile>, TilerError> {
    if !max_area.is_finite() || max_area <= 0.0 {
        return Err(TilerError::InvalidTileArea { max_area });
    }

    let bounds = polygon
        .bounding_rect()
        .ok_or_else(|| TilerError::invalid("ring is empty"))?;

    let side = max_area.sqrt();
    let width = bounds.width();
    let height = bounds.height();
    let num_x = cells_along(width, side);
    let num_y = cells_along(height, side);

    let cells = num_x.saturating_mul(num_y);
    if cells > MAX_GRID_CELLS {
        return Err(TilerError::TooManyCells {
            cells,
            limit: MAX_GRID_CELLS,
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let x_step = width / num_x as f64;
    #[allow(clippy::cast_precision_loss)]
    let y_step = height / num_y as f64;

    log::debug!(
        "Tiling {width:.6} x {height:.6} bounding box into {num_x} x {num_y} cells \
         (max tile area {max_area})"
    );

    let mut tiles = Vec::new();

    for row in 0..num_y {
        let (min_y, max_y) = cell_span(bounds.min().y, bounds.max().y, y_step, row, num_y);

        for col in 0..num_x {
            let (min_x, max_x) = cell_span(bounds.min().x, bounds.max().x, x_step, col, num_x);

            let cell = Rect::new(
                Coord { x: min_x, y: min_y },
                Coord { x: max_x, y: max_y },
            )
            .to_polygon();

            for piece in polygon.intersection(&cell) {
                if piece.unsigned_area() <= SLIVER_AREA {
                    continue;
                }
                tiles.push(Tile {
                    index: tiles.len(),
                    row,
                    col,
                    polygon: piece,
                });
            }
        }
    }

    log::debug!("Tiling produced {} non-empty tiles", tiles.len());

    Ok(tiles)
}

/// Number of grid cells needed along one axis.
fn cells_along(extent: f64, side: f64) -> usize {
    if extent <= 0.0 {
        return 1;
    }

    let cells = (extent / side - RATIO_TOLERANCE).ceil();
    if cells < 1.0 {
        1
    } else {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cells = cells as usize;
        cells
    }
}

/// Lower and upper bound of cell `i` of `count` along one axis. The last
/// cell ends exactly on the bounding box edge.
fn cell_span(min: f64, max: f64, step: f64, i: usize, count: usize) -> (f64, f64) {
    #[allow(clippy::cast_precision_loss)]
    let lower = (i as f64).mul_add(step, min);
    let upper = if i + 1 == count {
        max
    } else {
        #[allow(clippy::cast_precision_loss)]
        let upper = ((i + 1) as f64).mul_add(step, min);
        upper
    };
    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, polygon};

    fn square(side: f64) -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: side, y: 0.0),
            (x: side, y: side),
            (x: 0.0, y: side),
        ]
    }

    fn l_shape() -> Polygon<f64> {
        polygon![
            (x: 7.40, y: 46.90),
            (x: 7.43, y: 46.90),
            (x: 7.43, y: 46.91),
            (x: 7.41, y: 46.91),
            (x: 7.41, y: 46.93),
            (x: 7.40, y: 46.93),
        ]
    }

    #[test]
    fn splits_square_into_four_quadrants() {
        let side = 0.00002_f64.sqrt();
        let tiles = split_polygon(&square(side), 0.000_005).unwrap();

        assert_eq!(tiles.len(), 4);
        for tile in &tiles {
            assert!((tile.area() - 0.000_005).abs() < 1e-12);
        }

        let positions: Vec<(usize, usize)> = tiles.iter().map(|t| (t.row, t.col)).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn tiles_never_exceed_max_area() {
        let max_area = 0.000_005;
        let tiles = split_polygon(&l_shape(), max_area).unwrap();

        assert!(!tiles.is_empty());
        for tile in &tiles {
            assert!(
                tile.area() <= max_area * (1.0 + 1e-9),
                "tile {} has area {}",
                tile.index,
                tile.area()
            );
        }
    }

    #[test]
    fn tiles_cover_the_polygon_without_overlap() {
        let polygon = l_shape();
        let tiles = split_polygon(&polygon, 0.000_005).unwrap();

        let total: f64 = tiles.iter().map(Tile::area).sum();
        assert!((total - polygon_area(&polygon)).abs() < 1e-10);

        for (i, a) in tiles.iter().enumerate() {
            for b in &tiles[i + 1..] {
                let overlap: f64 = a.polygon.intersection(&b.polygon).unsigned_area();
                assert!(overlap < 1e-12, "tiles {} and {} overlap", a.index, b.index);
            }
        }
    }

    #[test]
    fn concave_polygon_skips_empty_cells() {
        // The upper-right part of the bounding box lies outside the L
        let tiles = split_polygon(&l_shape(), 0.0001).unwrap();
        let cells = cells_along(0.03, 0.01) * cells_along(0.03, 0.01);
        assert!(tiles.len() < cells);
    }

    #[test]
    fn tiling_is_deterministic() {
        let first = split_polygon(&l_shape(), 0.000_005).unwrap();
        let second = split_polygon(&l_shape(), 0.000_005).unwrap();
        assert_eq!(first, second);
        for (i, tile) in first.iter().enumerate() {
            assert_eq!(tile.index, i);
        }
    }

    #[test]
    fn small_polygon_is_a_single_tile() {
        let polygon = square(0.001);
        let tiles = split_polygon(&polygon, 0.000_005).unwrap();
        assert_eq!(tiles.len(), 1);
        assert!((tiles[0].area() - polygon_area(&polygon)).abs() < 1e-15);
    }

    #[test]
    fn degenerate_bounding_box_does_not_panic() {
        let flat = Polygon::new(
            LineString::from(vec![(7.0, 46.0), (7.1, 46.0), (7.2, 46.0), (7.0, 46.0)]),
            vec![],
        );
        let tiles = split_polygon(&flat, 0.000_005).unwrap();
        assert!(tiles.is_empty());
    }

    #[test]
    fn rejects_non_positive_tile_area() {
        assert!(matches!(
            split_polygon(&square(1.0), 0.0),
            Err(TilerError::InvalidTileArea { .. })
        ));
        assert!(matches!(
            split_polygon(&square(1.0), f64::NAN),
            Err(TilerError::InvalidTileArea { .. })
        ));
    }

    #[test]
    fn refuses_grids_above_cell_limit() {
        let area = square(0.01);

        assert!(matches!(
            split_polygon(&area, 1e-12),
            Err(TilerError::TooManyCells {
                limit: MAX_GRID_CELLS,
                ..
            })
        ));
        assert_eq!(split_polygon(&area, 1e-6).unwrap().len(), 100);
    }

    #[test]
    fn validates_simple_ring() {
        assert!(validate_polygon(&l_shape()).is_ok());
    }

    #[test]
    fn rejects_bow_tie() {
        let bow_tie = polygon![
            (x: 7.0, y: 46.0),
            (x: 7.1, y: 46.1),
            (x: 7.1, y: 46.0),
            (x: 7.0, y: 46.1),
        ];
        let err = validate_polygon(&bow_tie).unwrap_err();
        assert!(err.to_string().contains("crosses itself"));
    }

    #[test]
    fn rejects_too_few_vertices() {
        let line = Polygon::new(
            LineString::from(vec![(7.0, 46.0), (7.1, 46.1), (7.0, 46.0)]),
            vec![],
        );
        assert!(matches!(
            validate_polygon(&line),
            Err(TilerError::InvalidPolygon { .. })
        ));
    }

    #[test]
    fn repeated_vertices_are_not_self_intersections() {
        let polygon = polygon![
            (x: 7.0, y: 46.0),
            (x: 7.1, y: 46.0),
            (x: 7.1, y: 46.0),
            (x: 7.1, y: 46.1),
            (x: 7.0, y: 46.1),
        ];
        assert!(validate_polygon(&polygon).is_ok());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let projected = square(2_600_000.0);
        assert!(validate_polygon(&projected).is_err());
    }
}
