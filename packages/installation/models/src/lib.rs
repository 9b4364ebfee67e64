#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! PV installation record types shared across the harmonisation pipeline.
//!
//! Two upstream inventories feed the pipeline: a crowdsourced mapping
//! database (geometry-rich) and a regulatory register (attribute-rich).
//! This crate defines the row types for both inputs and for the merged
//! [`InstallationRecord`] that every pipeline stage produces.

use geo::Geometry;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Extra properties carried over from the mapping source's geometry layer.
pub type Tags = serde_json::Map<String, serde_json::Value>;

/// Which data source or inference step produced a capacity estimate.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CapacityProvenance {
    /// Reported by the mapping source.
    SourceA,
    /// Reported by the regulatory register.
    SourceB,
    /// Inferred from polygon area via the fitted W/m² slope.
    AreaRegression,
    /// Fixed small-household default.
    FloorEstimate,
    /// No stage supplied a value.
    Unknown,
}

impl CapacityProvenance {
    /// All provenance tags, in precedence order.
    pub const ALL: &[Self] = &[
        Self::SourceA,
        Self::SourceB,
        Self::AreaRegression,
        Self::FloorEstimate,
        Self::Unknown,
    ];
}

/// Ordinal installation size class.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    /// Household scale (≤ 10 kWp, or ≤ 30 m² when capacity is unknown).
    Small,
    /// Commercial rooftop scale.
    Medium,
    /// Solar farm scale (> 100 kWp, or > 2000 m²).
    Large,
}

impl Category {
    /// All categories in ascending order.
    pub const ALL: &[Self] = &[Self::Small, Self::Medium, Self::Large];
}

/// One row of the attribute table (the exported points CSV).
///
/// Optional columns absent from the input are `None` on every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    /// Mapping-source identity, already coalesced from node/way ids.
    pub mapping_id: Option<i64>,
    /// Mapping-source object type (`node`, `way`, `relation`).
    pub mapping_objtype: Option<String>,
    /// Regulatory register identity.
    pub registry_id: Option<i64>,
    /// Mapping-source site cluster.
    pub mapping_cluster_id: Option<i64>,
    /// Register site cluster.
    pub registry_cluster_id: Option<i64>,
    /// WGS84 latitude.
    pub latitude: Option<f64>,
    /// WGS84 longitude.
    pub longitude: Option<f64>,
    /// Capacity as tagged in the mapping source, MWp.
    pub capacity_source_a_mwp: Option<f64>,
    /// Capacity as listed in the register, MWp.
    pub capacity_source_b_mwp: Option<f64>,
    /// Number of PV modules, when tagged.
    pub num_modules: Option<i64>,
    /// Panel azimuth in degrees, when tagged.
    pub orientation: Option<i64>,
    /// Mounting location (`roof`, `ground`, ...).
    pub located: Option<String>,
}

/// A geometry-layer feature after normalisation: one geometry per
/// mapping identity, in the working CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeature {
    /// Coalesced mapping identity.
    pub mapping_id: i64,
    /// The feature's `name` tag.
    pub name: Option<String>,
    /// Remaining properties after dropping irrelevant tags.
    pub tags: Tags,
    /// Normalised geometry.
    pub geometry: Geometry<f64>,
}

/// One harmonised PV installation.
///
/// Each pipeline stage consumes a `Vec<InstallationRecord>` and returns a
/// new one with additional derived fields populated.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationRecord {
    pub mapping_id: Option<i64>,
    pub mapping_objtype: Option<String>,
    pub registry_id: Option<i64>,
    pub mapping_cluster_id: Option<i64>,
    pub registry_cluster_id: Option<i64>,
    pub mapping_name: Option<String>,
    pub tags: Tags,
    /// Working-CRS geometry. Never null once the merge has completed.
    pub geometry: Geometry<f64>,
    /// True polygon area in square metres; zero for points and lines.
    pub area_sqm: f64,
    /// Entirely enclosed by another polygon of the mapping layer.
    pub is_contained: bool,
    pub capacity_source_a_mwp: Option<f64>,
    pub capacity_source_b_mwp: Option<f64>,
    pub capacity_merged_mwp: Option<f64>,
    pub capacity_merged_with_area_mwp: Option<f64>,
    pub capacity_merged_final_mwp: Option<f64>,
    pub capacity_provenance: CapacityProvenance,
    pub category: Category,
    pub num_modules: Option<i64>,
    pub orientation: Option<i64>,
    pub located: Option<String>,
    pub region_a_id: Option<String>,
    pub region_b_id: Option<String>,
}

impl InstallationRecord {
    /// Builds a freshly merged record with no derived fields populated.
    #[must_use]
    pub fn from_attributes(
        attributes: AttributeRecord,
        geometry: Geometry<f64>,
        mapping_name: Option<String>,
        tags: Tags,
    ) -> Self {
        Self {
            mapping_id: attributes.mapping_id,
            mapping_objtype: attributes.mapping_objtype,
            registry_id: attributes.registry_id,
            mapping_cluster_id: attributes.mapping_cluster_id,
            registry_cluster_id: attributes.registry_cluster_id,
            mapping_name,
            tags,
            geometry,
            area_sqm: 0.0,
            is_contained: false,
            capacity_source_a_mwp: attributes.capacity_source_a_mwp,
            capacity_source_b_mwp: attributes.capacity_source_b_mwp,
            capacity_merged_mwp: None,
            capacity_merged_with_area_mwp: None,
            capacity_merged_final_mwp: None,
            capacity_provenance: CapacityProvenance::Unknown,
            category: Category::Small,
            num_modules: attributes.num_modules,
            orientation: attributes.orientation,
            located: attributes.located,
            region_a_id: None,
            region_b_id: None,
        }
    }
}

/// The capacity columns that are summed per region and per category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr,
)]
pub enum CapacityColumn {
    #[strum(serialize = "capacity_source_a_MWp")]
    SourceA,
    #[strum(serialize = "capacity_merged_MWp")]
    Merged,
    #[strum(serialize = "capacity_merged_with_area_MWp")]
    MergedWithArea,
    #[strum(serialize = "capacity_merged_final_MWp")]
    MergedFinal,
    #[strum(serialize = "capacity_source_b_MWp")]
    SourceB,
}

impl CapacityColumn {
    /// Reporting order: the successive estimates first, the register last.
    pub const ALL: &[Self] = &[
        Self::SourceA,
        Self::Merged,
        Self::MergedWithArea,
        Self::MergedFinal,
        Self::SourceB,
    ];

    /// Returns this column's value for a record.
    #[must_use]
    pub const fn value(self, record: &InstallationRecord) -> Option<f64> {
        match self {
            Self::SourceA => record.capacity_source_a_mwp,
            Self::Merged => record.capacity_merged_mwp,
            Self::MergedWithArea => record.capacity_merged_with_area_mwp,
            Self::MergedFinal => record.capacity_merged_final_mwp,
            Self::SourceB => record.capacity_source_b_mwp,
        }
    }
}
