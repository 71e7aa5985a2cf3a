pub mod loader;
pub mod schema;

pub use loader::{
    blob_store, database_path, load_config, load_config_from_env, load_config_from_str,
    provider_config,
};
pub use schema::{
    ApiConfig, Config, DatabaseConfig, FilesConfig, OrchestratorSettings, ProviderConfig,
    RecoveryConfig, ServerConfig, StorageConfig,
};
