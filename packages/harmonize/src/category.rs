//! Size classification.

use pvgeo_installation_models::{Category, InstallationRecord};

/// Capacity above which an installation is large (100 kWp).
pub const LARGE_CAPACITY_MWP: f64 = 0.1;
/// Capacity above which an installation is medium (10 kWp).
pub const MEDIUM_CAPACITY_MWP: f64 = 0.01;
/// Area above which an installation of unknown capacity is large.
pub const LARGE_AREA_SQM: f64 = 2000.0;
/// Area above which an installation of unknown capacity is medium.
pub const MEDIUM_AREA_SQM: f64 = 30.0;

/// Classifies by reported capacity when positive, otherwise by area.
#[must_use]
pub fn categorise(capacity_merged_mwp: Option<f64>, area_sqm: f64) -> Category {
    match capacity_merged_mwp.filter(|c| *c > 0.0) {
        Some(c) if c > LARGE_CAPACITY_MWP => Category::Large,
        Some(c) if c > MEDIUM_CAPACITY_MWP => Category::Medium,
        Some(_) => Category::Small,
        None if area_sqm > LARGE_AREA_SQM => Category::Large,
        None if area_sqm > MEDIUM_AREA_SQM => Category::Medium,
        None => Category::Small,
    }
}

/// Sets [`InstallationRecord::category`] on every record.
#[must_use]
pub fn classify(mut records: Vec<InstallationRecord>) -> Vec<InstallationRecord> {
    for record in &mut records {
        record.category = categorise(record.capacity_merged_mwp, record.area_sqm);
    }

    for category in Category::ALL {
        let count = records.iter().filter(|r| r.category == *category).count();
        log::debug!("{count} records classified as {category}");
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_thresholds() {
        assert_eq!(categorise(Some(0.5), 0.0), Category::Large);
        assert_eq!(categorise(Some(0.1), 0.0), Category::Medium);
        assert_eq!(categorise(Some(0.05), 0.0), Category::Medium);
        assert_eq!(categorise(Some(0.01), 0.0), Category::Small);
        assert_eq!(categorise(Some(0.004), 0.0), Category::Small);
    }

    #[test]
    fn area_used_when_capacity_unknown() {
        assert_eq!(categorise(None, 5000.0), Category::Large);
        assert_eq!(categorise(None, 2000.0), Category::Medium);
        assert_eq!(categorise(Some(0.0), 100.0), Category::Medium);
        assert_eq!(categorise(None, 30.0), Category::Small);
        assert_eq!(categorise(None, 0.0), Category::Small);
    }

    #[test]
    fn capacity_wins_over_area() {
        assert_eq!(categorise(Some(0.004), 50_000.0), Category::Small);
        assert_eq!(categorise(Some(0.2), 5.0), Category::Large);
    }
}
