//! TOML pipeline configuration.
//!
//! Only the input paths are required; everything else falls back to the
//! column and property names of the standard exports. Relative paths are
//! resolved against the directory containing the config file.

use std::path::{Path, PathBuf};

use pvgeo_geometry::normalize::NormalizeOptions;
use pvgeo_harmonize::attributes::AttributeSchema;
use pvgeo_harmonize::capacity::CapacityOptions;
use pvgeo_spatial::RegionLayerOptions;
use pvgeo_spatial::validate::ReferenceOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub mapping: NormalizeOptions,
    #[serde(default)]
    pub attributes: AttributeOptions,
    #[serde(default)]
    pub capacity: CapacityOptions,
    pub region_a: PartitionConfig,
    pub region_b: PartitionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPaths {
    /// Exported points CSV.
    pub attributes: PathBuf,
    /// Mapping-source geometry layer.
    pub geometries: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeOptions {
    /// Fewer surviving rows than this aborts the run.
    pub min_rows: usize,
    pub columns: AttributeSchema,
}

impl Default for AttributeOptions {
    fn default() -> Self {
        Self {
            min_rows: 1,
            columns: AttributeSchema::default(),
        }
    }
}

/// One region partition: its boundary layer and an optional reference
/// table to validate against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Short name used in output file names.
    pub label: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub layer: RegionLayerOptions,
    #[serde(default)]
    pub reference: Option<ReferenceOptions>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl PipelineConfig {
    /// Reads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// value is unusable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a config without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the text does not describe a config.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::de::from_str(text)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.inputs.attributes);
        resolve(&mut self.inputs.geometries);
        resolve(&mut self.output_dir);
        for partition in [&mut self.region_a, &mut self.region_b] {
            resolve(&mut partition.path);
            if let Some(reference) = &mut partition.reference {
                resolve(&mut reference.path);
            }
        }
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let floor = self.capacity.floor_capacity_mwp;
        if !floor.is_finite() || floor <= 0.0 {
            return Err(ConfigError::Invalid {
                message: format!("capacity.floor_capacity_mwp must be positive, got {floor}"),
            });
        }
        if self.mapping.id_property == self.mapping.way_id_property {
            return Err(ConfigError::Invalid {
                message: "mapping.id_property and mapping.way_id_property must differ".to_string(),
            });
        }
        if self.region_a.label == self.region_b.label {
            return Err(ConfigError::Invalid {
                message: format!(
                    "region_a and region_b share the label {:?}",
                    self.region_a.label
                ),
            });
        }
        Ok(())
    }

    /// Path of an output file.
    #[must_use]
    pub fn output(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use pvgeo_geometry::projection::Crs;
    use pvgeo_harmonize::capacity::DEFAULT_FLOOR_CAPACITY_MWP;

    use super::*;

    const MINIMAL: &str = r#"
        [inputs]
        attributes = "points.csv"
        geometries = "geometries.geojson"

        [region_a]
        label = "gsp"
        path = "gsp_regions.geojson"

        [region_b]
        label = "lsoa"
        path = "lsoa.geojson"
        id_property = "lsoa11cd"
        name_property = "lsoa11nm"
        crs = "web_mercator"

        [region_b.reference]
        path = "capacity_by_llsoa.csv"
        id_column = "LLSOACD"
    "#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = PipelineConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.mapping, NormalizeOptions::default());
        assert_eq!(config.attributes.min_rows, 1);
        assert_eq!(config.attributes.columns.mapping_id, "osm_id");
        assert!(
            (config.capacity.floor_capacity_mwp - DEFAULT_FLOOR_CAPACITY_MWP).abs() < f64::EPSILON
        );
        assert_eq!(config.region_a.layer, RegionLayerOptions::default());
        assert!(config.region_a.reference.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn partition_options_are_flattened() {
        let config = PipelineConfig::parse(MINIMAL).unwrap();
        let lsoa = &config.region_b;

        assert_eq!(lsoa.layer.id_property, "lsoa11cd");
        assert_eq!(lsoa.layer.crs, Crs::WebMercator);
        let reference = lsoa.reference.as_ref().unwrap();
        assert_eq!(reference.id_column, "LLSOACD");
        assert_eq!(reference.capacity_column, "dc_capacity");
    }

    #[test]
    fn overrides_nested_sections() {
        let text = format!(
            "{MINIMAL}\n[attributes]\nmin_rows = 10000\n[attributes.columns]\nlatitude = \"lat\"\n\
             [capacity]\nfloor_capacity_mwp = 0.004\n[mapping]\ninput_crs = \"web_mercator\"\n"
        );
        let config = PipelineConfig::parse(&text).unwrap();

        assert_eq!(config.attributes.min_rows, 10_000);
        assert_eq!(config.attributes.columns.latitude, "lat");
        assert_eq!(config.attributes.columns.longitude, "longitude");
        assert!((config.capacity.floor_capacity_mwp - 0.004).abs() < f64::EPSILON);
        assert_eq!(config.mapping.input_crs, Crs::WebMercator);
    }

    #[test]
    fn missing_inputs_are_rejected() {
        assert!(PipelineConfig::parse("[region_a]\nlabel = \"a\"\npath = \"a\"\n").is_err());
    }

    #[test]
    fn rejects_non_positive_floor() {
        let mut config = PipelineConfig::parse(MINIMAL).unwrap();
        config.capacity.floor_capacity_mwp = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let mut config = PipelineConfig::parse(MINIMAL).unwrap();
        config.resolve_relative_to(Path::new("/data/run"));

        assert_eq!(config.inputs.attributes, PathBuf::from("/data/run/points.csv"));
        assert_eq!(config.output("x.csv"), PathBuf::from("/data/run/output/x.csv"));
        assert_eq!(
            config.region_b.reference.unwrap().path,
            PathBuf::from("/data/run/capacity_by_llsoa.csv")
        );
    }
}
