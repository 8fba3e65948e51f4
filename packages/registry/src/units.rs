//! Per-tile apartment counting.
//!
//! Turns the raw identify features of one tile into a [`TileUnits`]
//! partial result. Two rules shape the numbers:
//!
//! * **Zero-apartment fallback.** A feature with no apartments whose
//!   building category or class is a delivery-point category still
//!   receives mail. Depending on [`FallbackPolicy`] it either counts as one
//!   unit or becomes a [`FallbackBusinessRecord`] for the business counter.
//! * **Overflow.** A tile that returns `overflow_threshold` features or more
//!   was truncated by the register, so its counts are discarded entirely.
//!   The feature count is kept so the caller can report it.

use std::collections::BTreeMap;

use briefkasten_mailbox_models::{
    FallbackBusinessRecord, FallbackPolicy, UNKNOWN, UnitRecord, category,
};
use geo::Polygon;
use serde_json::Value;

use crate::{IdentifyService, RegistryError};

/// Counting rules applied to every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOptions {
    /// Handling of zero-apartment buildings.
    pub policy: FallbackPolicy,
    /// Feature count at which a tile is discarded.
    pub overflow_threshold: usize,
}

/// Counts extracted from one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileUnits {
    /// Units in the tile.
    pub total_units: u64,
    /// Units per address.
    pub by_address: BTreeMap<String, u64>,
    /// Units per street.
    pub by_street: BTreeMap<String, u64>,
    /// Zero-apartment buildings deferred to the business counter.
    pub fallbacks: Vec<FallbackBusinessRecord>,
    /// Number of features the register returned.
    pub feature_count: usize,
    /// Whether the counts were discarded because the tile hit the limit.
    pub overflowed: bool,
}

/// Reads one identify feature into a [`UnitRecord`].
///
/// Missing or null apartment counts read as zero; missing address or street
/// fields read as [`UNKNOWN`]. Street names come as a list (one entry per
/// language) and are joined with `", "`.
#[must_use]
pub fn parse_unit_record(feature: &Value) -> UnitRecord {
    let attributes = feature.get("attributes").unwrap_or(&Value::Null);

    let apartments = attributes.get("ganzwhg").map_or(0, count_value);

    let address = attributes
        .get("strname_deinr")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    let street = match attributes.get("strname") {
        Some(Value::Array(names)) => {
            let names: Vec<&str> = names
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .collect();
            names.join(", ")
        }
        Some(Value::String(name)) => name.trim().to_string(),
        _ => String::new(),
    };
    let street = if street.is_empty() {
        UNKNOWN.to_string()
    } else {
        street
    };

    UnitRecord {
        address,
        street,
        apartments,
        gkat: attributes.get("gkat").and_then(code_value),
        gklas: attributes.get("gklas").and_then(code_value),
    }
}

fn count_value(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f > 0.0)
                .map_or(0, |f| {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let rounded = f.round() as u64;
                    rounded
                })
        }),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn code_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Folds the features of one tile into unit counts.
#[must_use]
pub fn extract_units(features: &[Value], options: &UnitOptions) -> TileUnits {
    let mut units = TileUnits {
        feature_count: features.len(),
        ..TileUnits::default()
    };

    for feature in features {
        let mut record = parse_unit_record(feature);

        if record.apartments == 0
            && let Some(category) = category::delivery_point_category(record.gkat, record.gklas)
        {
            match options.policy {
                FallbackPolicy::InflateCount => record.apartments = 1,
                FallbackPolicy::DeferToBusinesses => {
                    units.fallbacks.push(FallbackBusinessRecord {
                        address: record.address.clone(),
                        category: category.label.to_string(),
                    });
                }
            }
        }

        units.total_units += record.apartments;
        *units.by_address.entry(record.address).or_default() += record.apartments;
        *units.by_street.entry(record.street).or_default() += record.apartments;
    }

    if units.feature_count >= options.overflow_threshold {
        units.total_units = 0;
        units.by_address.clear();
        units.by_street.clear();
        units.fallbacks.clear();
        units.overflowed = true;
    }

    units
}

/// Queries one tile and counts its units.
///
/// # Errors
///
/// Returns [`RegistryError`] if the identify query fails.
pub async fn count_tile(
    service: &dyn IdentifyService,
    tile: &Polygon<f64>,
    options: &UnitOptions,
) -> Result<TileUnits, RegistryError> {
    let features = service.identify(tile).await?;
    let units = extract_units(&features, options);

    if units.feature_count == 0 {
        log::info!("No addresses found in tile");
    } else {
        log::info!("Addresses found in tile: {}", units.feature_count);
    }

    if units.overflowed {
        log::warn!(
            "Tile returned {} addresses (limit {}); discarding its counts. \
             Use a smaller tile area.",
            units.feature_count,
            options.overflow_threshold
        );
    }

    Ok(units)
}
