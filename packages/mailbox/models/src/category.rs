//! Building category codes of the federal building and dwelling register.
//!
//! Every registry feature carries two independent classification codes:
//! the building category (`gkat`) and the building class (`gklas`). This
//! module holds the single static table for both. The zero-apartment
//! fallback uses [`CodeKind`] plus [`BuildingCategory::delivery_point`] for
//! its whitelist check, and reports use [`BuildingCategory::label`] for
//! human-readable descriptions.

use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};

/// Which of the two registry attributes a code belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CodeKind {
    /// Building category (`gkat`).
    Gkat,
    /// Building class (`gklas`).
    Gklas,
}

/// One entry of the building category table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildingCategory {
    /// Register attribute the code is read from.
    pub kind: CodeKind,
    /// Numeric register code.
    pub code: u32,
    /// English description.
    pub label: &'static str,
    /// Whether a building of this category receives mail even when the
    /// register lists no apartments for it.
    pub delivery_point: bool,
}

const fn entry(
    kind: CodeKind,
    code: u32,
    label: &'static str,
    delivery_point: bool,
) -> BuildingCategory {
    BuildingCategory {
        kind,
        code,
        label,
        delivery_point,
    }
}

/// All known building categories and classes.
pub const BUILDING_CATEGORIES: &[BuildingCategory] = &[
    entry(CodeKind::Gkat, 1010, "Provisional shelter", true),
    entry(CodeKind::Gkat, 1020, "Exclusively residential building", true),
    entry(CodeKind::Gkat, 1030, "Residential building with secondary use", true),
    entry(CodeKind::Gkat, 1040, "Building with partial residential use", true),
    entry(CodeKind::Gkat, 1060, "Building without residential use", false),
    entry(CodeKind::Gkat, 1080, "Special structure", false),
    entry(CodeKind::Gklas, 1110, "Single-dwelling building", true),
    entry(CodeKind::Gklas, 1121, "Two-dwelling building", true),
    entry(CodeKind::Gklas, 1122, "Building with three or more dwellings", true),
    entry(CodeKind::Gklas, 1130, "Residence for communities", true),
    entry(CodeKind::Gklas, 1211, "Hotel building", true),
    entry(CodeKind::Gklas, 1212, "Other short-stay accommodation", true),
    entry(CodeKind::Gklas, 1220, "Office building", true),
    entry(CodeKind::Gklas, 1230, "Wholesale and retail building", true),
    entry(CodeKind::Gklas, 1231, "Restaurant and bar building", true),
    entry(CodeKind::Gklas, 1241, "Transport and communication building", false),
    entry(CodeKind::Gklas, 1242, "Garage building", false),
    entry(CodeKind::Gklas, 1251, "Industrial building", false),
    entry(CodeKind::Gklas, 1252, "Tank, silo or warehouse", false),
    entry(CodeKind::Gklas, 1261, "Culture and leisure building", false),
    entry(CodeKind::Gklas, 1262, "Museum or library", false),
    entry(CodeKind::Gklas, 1263, "School or university building", false),
    entry(CodeKind::Gklas, 1264, "Hospital or care facility", true),
    entry(CodeKind::Gklas, 1265, "Sports hall", false),
    entry(CodeKind::Gklas, 1271, "Agricultural operations building", false),
    entry(CodeKind::Gklas, 1272, "Church or religious building", false),
    entry(CodeKind::Gklas, 1273, "Monument or protected structure", false),
    entry(CodeKind::Gklas, 1274, "Other structure", false),
    entry(CodeKind::Gklas, 1275, "Other collective accommodation", true),
    entry(CodeKind::Gklas, 1276, "Livestock building", false),
    entry(CodeKind::Gklas, 1277, "Crop production building", false),
    entry(CodeKind::Gklas, 1278, "Other agricultural building", false),
];

/// Looks up a code in the category table.
#[must_use]
pub fn lookup(kind: CodeKind, code: u32) -> Option<&'static BuildingCategory> {
    BUILDING_CATEGORIES
        .iter()
        .find(|c| c.kind == kind && c.code == code)
}

/// Returns the first delivery-point category matched by either code.
///
/// The building category is checked before the building class.
#[must_use]
pub fn delivery_point_category(
    gkat: Option<u32>,
    gklas: Option<u32>,
) -> Option<&'static BuildingCategory> {
    let by_gkat = gkat.and_then(|code| lookup(CodeKind::Gkat, code));
    let by_gklas = gklas.and_then(|code| lookup(CodeKind::Gklas, code));

    [by_gkat, by_gklas]
        .into_iter()
        .flatten()
        .find(|c| c.delivery_point)
}
