pub mod config;
pub mod observability;
pub mod server;

pub use config::{
    AppConfig, LoggingConfig, PostgresConfig, ServerConfig, StorageBackend, StorageConfig,
};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{CarekeyServer, ServerBuilder, build_app, spawn_session_sweep};
