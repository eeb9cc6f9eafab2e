//! Parking supply and demand pipeline for the Vitosha neighbourhood of Sofia.
//!
//! Each stage is a plain function over explicit paths: cadastre download,
//! encoding/CRS normalization, clipping, parking analytics, on-street
//! capacity, municipal land screening and the heatmap.

pub mod analytics;
pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod layer;
pub mod normalize;
pub mod render;

pub use config::{validate_layer_configs, LayerKind};
pub use error::{PipelineError, Result};
pub use layer::{Layer, Record};
