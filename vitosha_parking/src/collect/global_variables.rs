use std::path::PathBuf;

/// Raw downloads, one extracted directory per district and layer
pub const RAW_DATA_PATH: &str = "./ETL/downloadsRowData";
/// Intermediate artifacts (`*_raw.geojson`, debug copies, boundary)
pub const ETL_PATH: &str = "./ETL";
/// Finished artifacts
pub const OUTPUT_PATH: &str = "./output";

pub const BOUNDARY_FILE: &str = "vitosha_boundary.geojson";
pub const PARKING_NUM_FILE: &str = "vitosha_parking_num.geojson";
pub const STREET_CAPACITY_FILE: &str = "street_capacity_vitosha.geojson";
pub const PARKED_CARS_FILE: &str = "parked_cars_vitosha.geojson";
pub const MUNICIPAL_PARKING_FILE: &str = "municipal_land_parking.geojson";
pub const HEATMAP_FILE: &str = "vitosha_parking_heatmap.html";

/// Road network edges exported from OpenStreetMap
pub const STREET_EDGES_FILE: &str = "vitosha_streets.geojson";
/// Crossings, bus stops and driveways
pub const STREET_BLOCKERS_FILE: &str = "vitosha_no_parking.geojson";

/// Directory layout shared by the stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub raw_dir: PathBuf,
    pub etl_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl PipelinePaths {
    pub fn new(raw_dir: Option<PathBuf>, etl_dir: Option<PathBuf>, output_dir: Option<PathBuf>) -> Self {
        let defaults = PipelinePaths::default();
        PipelinePaths {
            raw_dir: raw_dir.unwrap_or(defaults.raw_dir),
            etl_dir: etl_dir.unwrap_or(defaults.etl_dir),
            output_dir: output_dir.unwrap_or(defaults.output_dir),
        }
    }

    pub fn boundary(&self) -> PathBuf {
        self.etl_dir.join(BOUNDARY_FILE)
    }

    pub fn output(&self, file: &str) -> PathBuf {
        self.output_dir.join(file)
    }
}

impl Default for PipelinePaths {
    fn default() -> Self {
        PipelinePaths {
            raw_dir: PathBuf::from(RAW_DATA_PATH),
            etl_dir: PathBuf::from(ETL_PATH),
            output_dir: PathBuf::from(OUTPUT_PATH),
        }
    }
}
