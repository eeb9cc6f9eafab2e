use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::LayerKind;

/// Crate-wide result alias
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Failure of a single read attempt of a source file with one candidate encoding.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The file could not be read from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The raw bytes are not valid text in the candidate encoding.
    #[error("bytes are not valid {encoding}")]
    InvalidText {
        /// Label of the candidate encoding.
        encoding: &'static str,
    },

    /// The decoded text is not valid GeoJSON.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// GDAL refused to open or read the dataset.
    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    /// No reader is registered for this file extension.
    #[error("unsupported source format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
}

/// Errors raised by the pipeline stages.
///
/// Every variant is fatal at stage level. The only recovered condition in the
/// whole pipeline is per-value repair in the Cyrillic post-processing pass.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No candidate encoding produced a non-corrupted parse.
    #[error("no candidate encoding decoded {} cleanly{}", .path.display(), describe_last(.last_error))]
    DecodeExhausted {
        /// Source file that was being decoded.
        path: PathBuf,
        /// Last parse failure, if any candidate failed to parse at all.
        last_error: Option<ReadError>,
    },

    /// Geometry has no CRS and does not look like BGS2005 metres.
    #[error("unknown CRS for {origin}")]
    UnknownCrs {
        /// Where the layer came from.
        origin: String,
    },

    /// A source file cannot be mapped to a thematic layer.
    #[error("cannot determine the layer for {}", .path.display())]
    UnclassifiedLayer {
        /// Offending file.
        path: PathBuf,
    },

    /// Required source attributes are absent during column projection.
    #[error("{kind}: columns missing in source: {}", join_columns(.missing))]
    MissingColumn {
        /// Layer being projected.
        kind: LayerKind,
        /// Every missing source column.
        missing: BTreeSet<String>,
    },

    /// An expected intermediate file is absent.
    #[error("missing required file '{name}' under {}", .root.display())]
    MissingRequiredFile {
        /// Expected file name.
        name: String,
        /// Directory that was searched.
        root: PathBuf,
    },

    /// Static configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown district slug for the cadastre downloader.
    #[error("unknown district \"{0}\"; add it to the district table")]
    UnknownDistrict(String),

    /// The geocoder returned no usable boundary polygon.
    #[error("no boundary polygon found for \"{0}\"")]
    BoundaryNotFound(String),

    /// File system error on a specific path.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Reading an intermediate artifact failed.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: ReadError,
    },

    /// GeoJSON conversion error.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// PROJ could not build a transformation.
    #[error("failed to create projection: {0}")]
    ProjCreate(#[from] proj::ProjCreateError),

    /// PROJ failed to transform a coordinate.
    #[error("failed to transform coordinates: {0}")]
    Proj(#[from] proj::ProjError),

    /// GEOS geometry operation failed.
    #[error("GEOS error: {0}")]
    Geos(#[from] geos::Error),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// URL construction failed.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Zip archive could not be read.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl PipelineError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

fn describe_last(last_error: &Option<ReadError>) -> String {
    match last_error {
        Some(err) => format!(": {err}"),
        None => " (every parse looked like mojibake)".to_string(),
    }
}

fn join_columns(missing: &BTreeSet<String>) -> String {
    missing.iter().cloned().collect::<Vec<_>>().join(", ")
}
