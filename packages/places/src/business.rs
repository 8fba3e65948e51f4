//! Business counting for a whole polygon.
//!
//! One places query is issued per run, regardless of how many tiles the
//! register needed. Rows without a name, category or free-form address are
//! dropped. Zero-apartment buildings deferred by the unit counter are then
//! merged in by exact address, and the listing is grouped by address.

use std::collections::{BTreeMap, BTreeSet};

use briefkasten_mailbox_models::{
    FallbackBusinessRecord, PlaceOrigin, PlaceRecord, RunWarning, UNKNOWN,
};
use geo::Polygon;
use serde_json::Value;

use crate::{PlacesError, PlacesSource, RawPlace, resolve_release};

/// Business side of one calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusinessCount {
    /// Number of entries in `places`.
    pub total: u64,
    /// Places with an address, fallback entries included.
    pub places: Vec<PlaceRecord>,
    /// Places per address.
    pub by_address: BTreeMap<String, u64>,
    /// Release that was queried.
    pub release: Option<String>,
    /// Recoverable conditions hit while counting.
    pub warnings: Vec<RunWarning>,
}

/// Trimmed, non-empty `freeform` fields of a JSON address list, in order.
///
/// # Errors
///
/// Returns [`PlacesError::Json`] if `addresses` is not valid JSON.
pub fn address_entries(addresses: &str) -> Result<Vec<String>, PlacesError> {
    let value: Value = serde_json::from_str(addresses)?;

    let Value::Array(entries) = value else {
        return Ok(vec![]);
    };

    Ok(entries
        .iter()
        .filter_map(|entry| entry.get("freeform").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Joins the `freeform` fields of a JSON address list with `", "`.
///
/// Returns `Ok(None)` when no entry carries a non-empty free-form address.
///
/// # Errors
///
/// Returns [`PlacesError::Json`] if `addresses` is not valid JSON.
pub fn flatten_addresses(addresses: &str) -> Result<Option<String>, PlacesError> {
    let parts = address_entries(addresses)?;
    Ok((!parts.is_empty()).then(|| parts.join(", ")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Converts a dataset row into a listing entry, or `None` if it lacks a
/// name, a category or an address.
fn to_place_record(raw: RawPlace) -> Option<PlaceRecord> {
    let name = non_empty(raw.name)?;
    let category = non_empty(raw.category)?;
    let addresses = match raw.addresses.as_deref().map(address_entries) {
        Some(Ok(entries)) if !entries.is_empty() => entries,
        Some(Err(e)) => {
            log::debug!("Skipping place {name:?} with malformed addresses: {e}");
            return None;
        }
        Some(Ok(_)) | None => return None,
    };

    Some(PlaceRecord {
        name,
        address: addresses.join(", "),
        addresses,
        category,
        category_alt: non_empty(raw.category_alt),
        origin: PlaceOrigin::PlacesDataset,
    })
}

/// Appends fallback records whose address is not yet listed.
///
/// Addresses are compared exactly after trimming, against every individual
/// address of a listed place as well as its joined form. Each novel address
/// is added once with name [`UNKNOWN`], even if several fallback records
/// share it.
pub fn merge_fallback_records(
    places: &mut Vec<PlaceRecord>,
    fallbacks: &[FallbackBusinessRecord],
) {
    let mut known: BTreeSet<String> = places
        .iter()
        .flat_map(|p| std::iter::once(&p.address).chain(&p.addresses))
        .map(|address| address.trim().to_string())
        .collect();

    for record in fallbacks {
        let address = record.address.trim();
        if address.is_empty() || !known.insert(address.to_string()) {
            continue;
        }

        places.push(PlaceRecord {
            name: UNKNOWN.to_string(),
            address: address.to_string(),
            addresses: vec![address.to_string()],
            category: record.category.clone(),
            category_alt: None,
            origin: PlaceOrigin::RegistryFallback,
        });
    }
}

/// Counts listing entries per address.
#[must_use]
pub fn group_by_address(places: &[PlaceRecord]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for place in places {
        *counts.entry(place.address.clone()).or_default() += 1;
    }
    counts
}

/// Counts the businesses inside `area`.
///
/// Never fails: an unresolvable release falls back to `fallback_release`,
/// and a failed dataset query yields an empty listing. Both are reported
/// through [`BusinessCount::warnings`]. Fallback records are merged in
/// either case.
pub async fn count_businesses(
    source: &dyn PlacesSource,
    area: &Polygon<f64>,
    fallbacks: &[FallbackBusinessRecord],
    fallback_release: &str,
) -> BusinessCount {
    let mut warnings = Vec::new();

    let (release, warning) = resolve_release(source, fallback_release).await;
    warnings.extend(warning);

    let mut places: Vec<PlaceRecord> = match source.places_in(area, &release).await {
        Ok(rows) => {
            let row_count = rows.len();
            let places: Vec<PlaceRecord> =
                rows.into_iter().filter_map(to_place_record).collect();
            log::info!(
                "Places with address: {} of {row_count} intersecting rows",
                places.len()
            );
            places
        }
        Err(e) => {
            log::error!("Places query failed for release {release}: {e}");
            warnings.push(RunWarning::PlacesUnavailable {
                message: e.to_string(),
            });
            Vec::new()
        }
    };

    merge_fallback_records(&mut places, fallbacks);

    let by_address = group_by_address(&places);

    BusinessCount {
        total: places.len() as u64,
        places,
        by_address,
        release: Some(release),
        warnings,
    }
}
