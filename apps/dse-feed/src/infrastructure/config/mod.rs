//! Configuration Module
//!
//! YAML configuration loading for the feed engine.

mod settings;

pub use settings::{
    BackoffSettings, CONFIG_PATH_ENV, ConfigError, DEFAULT_CONFIG_PATH, DataSourceSettings,
    EndpointSettings, EngineConfig, ExportSettings, GeneralSettings, ServerSettings, load_config,
    load_config_from_string, resolve_config_path,
};
