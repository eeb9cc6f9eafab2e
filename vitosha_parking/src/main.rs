//! CLI entry point for the Vitosha parking pipeline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vitosha_parking::analytics::parking::{run_parking_analytics, ParkingRules};
use vitosha_parking::collect::boundary::{fetch_boundary, BoundaryQuery};
use vitosha_parking::collect::cadastre::{CadastreDistrict, CadastreDownloader};
use vitosha_parking::collect::global_variables::{
    PipelinePaths, PARKING_NUM_FILE, STREET_BLOCKERS_FILE, STREET_EDGES_FILE,
};
use vitosha_parking::geometric::clip::clip_and_clean;
use vitosha_parking::geometric::municipal::{run_municipal_filter, MunicipalParams};
use vitosha_parking::geometric::street::{run_street_capacity, StreetParams};
use vitosha_parking::normalize::convert_and_merge;
use vitosha_parking::render::heatmap::{run_heatmap, HeatmapParams};
use vitosha_parking::{validate_layer_configs, LayerKind};

#[derive(Parser)]
#[command(
    name = "vitosha_parking",
    version,
    about = "Cadastral parking supply/demand pipeline for Vitosha, Sofia"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the neighbourhood outline from OpenStreetMap
    Boundary {
        /// Output file (default: ETL/vitosha_boundary.geojson)
        out_path: Option<PathBuf>,
    },
    /// Download and unpack cadastral archives
    Download {
        /// District slugs (default: every known district)
        districts: Vec<String>,
        /// Raw data directory, after `--` (default: ETL/downloadsRowData)
        #[arg(last = true)]
        raw_dir: Option<PathBuf>,
    },
    /// Decode, reproject and merge raw cadastral files
    Normalize {
        raw_dir: Option<PathBuf>,
        etl_dir: Option<PathBuf>,
    },
    /// Clip merged layers to the boundary and keep the configured columns
    Clip {
        etl_dir: Option<PathBuf>,
        output_dir: Option<PathBuf>,
    },
    /// Per-parcel parking supply and demand on buildings
    Analytics {
        buildings: Option<PathBuf>,
        units: Option<PathBuf>,
        output: Option<PathBuf>,
    },
    /// Synthesize on-street parking slots from a road network
    Streets {
        /// Street edges (default: ETL/vitosha_streets.geojson)
        edges: Option<PathBuf>,
        /// Crossings, bus stops and driveways (default: ETL/vitosha_no_parking.geojson)
        blockers: Option<PathBuf>,
        output_dir: Option<PathBuf>,
    },
    /// Municipal parcels suitable for multi-storey parking
    Municipal { output_dir: Option<PathBuf> },
    /// Render the deficit heatmap
    Heatmap { output_dir: Option<PathBuf> },
    /// Run every offline stage in order
    All {
        raw_dir: Option<PathBuf>,
        etl_dir: Option<PathBuf>,
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    validate_layer_configs().context("Invalid layer configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Boundary { out_path } => {
            let out_path = out_path.unwrap_or_else(|| PipelinePaths::default().boundary());
            fetch_boundary(&BoundaryQuery::default(), &out_path)
                .context("Failed to fetch the boundary")?;
        }
        Commands::Download { districts, raw_dir } => {
            let paths = PipelinePaths::new(raw_dir, None, None);
            let districts = if districts.is_empty() {
                CadastreDistrict::all()
            } else {
                districts
                    .iter()
                    .map(|d| CadastreDistrict::from_slug(d))
                    .collect::<Result<Vec<_>, _>>()?
            };
            for district in districts {
                let slug = district.slug.clone();
                CadastreDownloader::new(district, &paths.raw_dir)?
                    .collect_all()
                    .with_context(|| format!("Failed to download cadastre for {}", slug))?;
            }
        }
        Commands::Normalize { raw_dir, etl_dir } => {
            let paths = PipelinePaths::new(raw_dir, etl_dir, None);
            normalize(&paths)?;
        }
        Commands::Clip {
            etl_dir,
            output_dir,
        } => {
            let paths = PipelinePaths::new(None, etl_dir, output_dir);
            clip(&paths)?;
        }
        Commands::Analytics {
            buildings,
            units,
            output,
        } => {
            let paths = PipelinePaths::default();
            let buildings =
                buildings.unwrap_or_else(|| paths.output(LayerKind::Building.config().cleaned_file));
            let units = units.unwrap_or_else(|| paths.output(LayerKind::Unit.config().cleaned_file));
            let output = output.unwrap_or_else(|| paths.output(PARKING_NUM_FILE));
            run_parking_analytics(&buildings, &units, &output, &ParkingRules::default())
                .context("Parking analytics failed")?;
        }
        Commands::Streets {
            edges,
            blockers,
            output_dir,
        } => {
            let paths = PipelinePaths::new(None, None, output_dir);
            let edges = edges.unwrap_or_else(|| paths.etl_dir.join(STREET_EDGES_FILE));
            let blockers = blockers.unwrap_or_else(|| paths.etl_dir.join(STREET_BLOCKERS_FILE));
            run_street_capacity(&edges, &blockers, &paths.output_dir, &StreetParams::default())
                .context("Street capacity synthesis failed")?;
        }
        Commands::Municipal { output_dir } => {
            let paths = PipelinePaths::new(None, None, output_dir);
            run_municipal_filter(&paths.output_dir, &MunicipalParams::default())
                .context("Municipal land filter failed")?;
        }
        Commands::Heatmap { output_dir } => {
            let paths = PipelinePaths::new(None, None, output_dir);
            run_heatmap(&paths.output_dir, &HeatmapParams::default())
                .context("Heatmap rendering failed")?;
        }
        Commands::All {
            raw_dir,
            etl_dir,
            output_dir,
        } => {
            let paths = PipelinePaths::new(raw_dir, etl_dir, output_dir);
            normalize(&paths)?;
            clip(&paths)?;

            let out = &paths.output_dir;
            run_parking_analytics(
                &paths.output(LayerKind::Building.config().cleaned_file),
                &paths.output(LayerKind::Unit.config().cleaned_file),
                &paths.output(PARKING_NUM_FILE),
                &ParkingRules::default(),
            )
            .context("Parking analytics failed")?;
            run_street_capacity(
                &paths.etl_dir.join(STREET_EDGES_FILE),
                &paths.etl_dir.join(STREET_BLOCKERS_FILE),
                out,
                &StreetParams::default(),
            )
            .context("Street capacity synthesis failed")?;
            run_municipal_filter(out, &MunicipalParams::default())
                .context("Municipal land filter failed")?;
            run_heatmap(out, &HeatmapParams::default()).context("Heatmap rendering failed")?;
        }
    }
    Ok(())
}

fn normalize(paths: &PipelinePaths) -> Result<()> {
    let report = convert_and_merge(&paths.raw_dir, &paths.etl_dir).with_context(|| {
        format!("Failed to normalize sources under {}", paths.raw_dir.display())
    })?;
    log::info!(
        "{} source files converted, {} merged layers written",
        report.converted,
        report.merged.len()
    );
    Ok(())
}

fn clip(paths: &PipelinePaths) -> Result<()> {
    clip_and_clean(&paths.etl_dir, &paths.output_dir)
        .with_context(|| format!("Failed to clip layers from {}", paths.etl_dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitosha_parking::collect::global_variables::RAW_DATA_PATH;

    #[test]
    fn test_download_raw_dir_override() {
        let cli = Cli::try_parse_from(["vitosha_parking", "download", "lozenets", "--", "/data/raw"])
            .unwrap();
        match cli.command {
            Commands::Download { districts, raw_dir } => {
                assert_eq!(districts, vec!["lozenets".to_string()]);
                assert_eq!(raw_dir, Some(PathBuf::from("/data/raw")));
            }
            _ => panic!("expected the download subcommand"),
        }
    }

    #[test]
    fn test_download_defaults() {
        let cli = Cli::try_parse_from(["vitosha_parking", "download"]).unwrap();
        let Commands::Download { districts, raw_dir } = cli.command else {
            panic!("expected the download subcommand");
        };
        assert!(districts.is_empty());
        assert_eq!(
            PipelinePaths::new(raw_dir, None, None).raw_dir,
            PathBuf::from(RAW_DATA_PATH)
        );
    }
}
