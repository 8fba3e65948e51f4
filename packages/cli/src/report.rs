//! Plain-text rendering of a calculation result.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use briefkasten_mailbox_models::{AggregateResult, category::BUILDING_CATEGORIES};

/// Map entries sorted by descending count, ties by name.
#[must_use]
pub fn sorted_counts(counts: &BTreeMap<String, u64>) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
}

fn write_table(out: &mut String, title: &str, counts: &BTreeMap<String, u64>, top: usize) {
    let entries = sorted_counts(counts);
    let width = entries
        .iter()
        .take(top)
        .map(|(name, _)| name.chars().count())
        .max()
        .unwrap_or(0);

    let _ = writeln!(out, "\n{title} ({})", entries.len());
    for (name, count) in entries.iter().take(top) {
        let _ = writeln!(out, "  {name:<width$}  {count:>6}");
    }
    if entries.len() > top {
        let _ = writeln!(out, "  ... {} more", entries.len() - top);
    }
}

/// Renders the summary, warnings and the top `top` rows of each table.
#[must_use]
pub fn render_report(result: &AggregateResult, top: usize) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Mailboxes:          {}", result.total_mailboxes);
    let _ = writeln!(out, "  Units:            {}", result.total_units);
    let _ = writeln!(out, "  Businesses:       {}", result.total_businesses);
    let _ = writeln!(out, "Addresses examined: {}", result.total_addresses);
    let _ = writeln!(out, "Tiles queried:      {}", result.tile_count);
    if let Some(release) = &result.places_release {
        let _ = writeln!(out, "Places release:     {release}");
    }

    if !result.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in &result.warnings {
            let _ = writeln!(out, "  ! {warning}");
        }
        if result.units_incomplete() {
            let _ = writeln!(out, "  ! unit totals are a lower bound");
        }
    }

    write_table(&mut out, "Units by street", &result.units_by_street, top);
    write_table(&mut out, "Units by address", &result.units_by_address, top);
    write_table(
        &mut out,
        "Businesses by address",
        &result.businesses_by_address,
        top,
    );

    if !result.places.is_empty() {
        let _ = writeln!(out, "\nBusinesses ({})", result.places.len());
        for place in result.places.iter().take(top) {
            let _ = writeln!(
                out,
                "  {} | {} | {} ({})",
                place.name, place.address, place.category, place.origin
            );
        }
        if result.places.len() > top {
            let _ = writeln!(out, "  ... {} more", result.places.len() - top);
        }
    }

    out
}

/// Renders the building category table.
#[must_use]
pub fn render_categories() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<6} {:>5}  {:<8} Label", "Kind", "Code", "Delivery");
    for category in BUILDING_CATEGORIES {
        let _ = writeln!(
            out,
            "{:<6} {:>5}  {:<8} {}",
            category.kind,
            category.code,
            if category.delivery_point { "yes" } else { "no" },
            category.label
        );
    }
    out
}
