// src/config/mod.rs

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ExecutionConfig, HarnessSection, HealthCheckConfig, ProviderConfig,
    ReportingSection, StatisticsSection,
};
pub use validate::validate_config;
