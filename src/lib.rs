pub mod chain;
pub mod config;
pub mod eip1559;
pub mod estimate;
pub mod oracle;
pub mod params;
pub mod types;
