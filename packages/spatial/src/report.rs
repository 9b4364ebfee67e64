//! Per-region CSV report.

use std::io::Write;
use std::path::Path;

use pvgeo_installation_models::CapacityColumn;

use crate::SpatialError;
use crate::aggregate::RegionSummary;

/// Header row: identity, installation count, one sum per capacity column,
/// then one positive count per capacity column.
#[must_use]
pub fn report_header() -> Vec<String> {
    let mut header = vec![
        "region_id".to_string(),
        "region_name".to_string(),
        "num_installations".to_string(),
    ];
    header.extend(CapacityColumn::ALL.iter().map(ToString::to_string));
    header.extend(CapacityColumn::ALL.iter().map(|c| format!("{c}_count")));
    header
}

/// Writes the report to any sink. Sums use three decimal places.
///
/// # Errors
///
/// Returns [`SpatialError::Csv`] if a row cannot be written.
pub fn write_region_report<W: Write>(
    writer: W,
    summaries: &[RegionSummary],
) -> Result<(), SpatialError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(report_header())?;

    for summary in summaries {
        let mut row = vec![
            summary.region_id.clone(),
            summary.region_name.clone().unwrap_or_default(),
            summary.num_installations.to_string(),
        ];
        row.extend(
            CapacityColumn::ALL
                .iter()
                .map(|c| format!("{:.3}", summary.column(*c).sum_mwp)),
        );
        row.extend(
            CapacityColumn::ALL
                .iter()
                .map(|c| summary.column(*c).positive.to_string()),
        );
        csv.write_record(&row)?;
    }

    csv.flush()?;
    Ok(())
}

/// Writes the report to a file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_region_report_file(
    path: &Path,
    summaries: &[RegionSummary],
) -> Result<(), SpatialError> {
    let file = std::fs::File::create(path)?;
    write_region_report(std::io::BufWriter::new(file), summaries)?;
    log::info!("Wrote {} region rows to {}", summaries.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pvgeo_harmonize::summary::ColumnTotal;

    use super::*;

    #[test]
    fn formats_sums_and_counts() {
        let mut columns = BTreeMap::new();
        columns.insert(
            CapacityColumn::MergedFinal,
            ColumnTotal {
                sum_mwp: 1.234_56,
                positive: 3,
            },
        );
        let summaries = vec![
            RegionSummary {
                region_id: "GSP_1".to_string(),
                region_name: Some("North, upper".to_string()),
                num_installations: 4,
                columns,
            },
            RegionSummary {
                region_id: "GSP_2".to_string(),
                region_name: None,
                num_installations: 0,
                columns: BTreeMap::new(),
            },
        ];

        let mut out = Vec::new();
        write_region_report(&mut out, &summaries).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "region_id,region_name,num_installations,\
             capacity_source_a_MWp,capacity_merged_MWp,capacity_merged_with_area_MWp,\
             capacity_merged_final_MWp,capacity_source_b_MWp,\
             capacity_source_a_MWp_count,capacity_merged_MWp_count,\
             capacity_merged_with_area_MWp_count,capacity_merged_final_MWp_count,\
             capacity_source_b_MWp_count"
        );
        assert_eq!(
            lines[1],
            "GSP_1,\"North, upper\",4,0.000,0.000,0.000,1.235,0.000,0,0,0,3,0"
        );
        assert_eq!(lines[2], "GSP_2,,0,0.000,0.000,0.000,0.000,0.000,0,0,0,0,0");
    }
}
