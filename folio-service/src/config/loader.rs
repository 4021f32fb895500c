//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::AppConfig;

/// Keys whose environment values are comma-separated lists
const LIST_KEYS: &[&str] = &["ocr.dpi_candidates", "ocr.languages"];

/// Load configuration from an optional `config.*` file and `FOLIO__*` env vars
pub fn load_config() -> ServiceResult<AppConfig> {
    let mut environment = Environment::with_prefix("FOLIO")
        .separator("__")
        .list_separator(",")
        .try_parsing(true);
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }

    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(environment)
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}
