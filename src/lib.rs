pub mod concentration;
pub mod config;
pub mod db;
pub mod enrich;
pub mod features;
pub mod model;
pub mod movers;
pub mod pipeline;
pub mod resolver;
pub mod similarity;
pub mod source;

/// Entries in a full chart snapshot. Completeness checks key off this.
pub const EXPECTED_CHART_SIZE: usize = 200;

/// Application name for XDG paths
pub const APP_NAME: &str = "chartpulse";
