pub mod env;
mod loader;

pub use env::{
    AppConfig, CacheBackendKind, CacheConfig, DetectorBackendKind, DetectorConfig,
    DirectoryConfig, LogRotation, LoggingConfig,
};
pub use loader::load_config;
