// Library exports for exportdash

pub mod aggregate;
pub mod chart;
pub mod data;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod parser;
pub mod render;
pub mod schema;
pub mod template;
pub mod views;

pub use error::{DashboardError, Result};

use loader::DataSource;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum OutputFormat {
    #[serde(rename = "json")]
    #[default]
    Json,
    #[serde(rename = "png")]
    Png,
}

/// Runtime settings. Every field has a default so a partial JSON document (or
/// none at all) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub source: DataSource,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default, rename = "type")]
    pub format: OutputFormat,
    /// Rows kept for the unit-value box plot.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
    /// Unit values at or above this are treated as outliers.
    #[serde(default = "default_unit_value_max")]
    pub unit_value_max: f64,
    #[serde(default = "default_top_countries")]
    pub top_countries: usize,
    #[serde(default = "default_treemap_countries")]
    pub treemap_countries: usize,
    /// Marker size given to the largest bubble.
    #[serde(default = "default_bubble_size_max")]
    pub bubble_size_max: f64,
}

fn default_timeout_secs() -> u64 { 30 }
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }
fn default_sample_rows() -> usize { 3000 }
fn default_sample_seed() -> u64 { 42 }
fn default_unit_value_max() -> f64 { 50_000.0 }
fn default_top_countries() -> usize { 10 }
fn default_treemap_countries() -> usize { 30 }
fn default_bubble_size_max() -> f64 { 100.0 }

impl DashboardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            source: DataSource::default(),
            timeout_secs: default_timeout_secs(),
            width: default_width(),
            height: default_height(),
            format: OutputFormat::Json,
            sample_rows: default_sample_rows(),
            sample_seed: default_sample_seed(),
            unit_value_max: default_unit_value_max(),
            top_countries: default_top_countries(),
            treemap_countries: default_treemap_countries(),
            bubble_size_max: default_bubble_size_max(),
        }
    }
}
