use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Runtime configuration. Values come from `config/default.*` when present,
/// overridden by `LOTLEDGER_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub environment: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("database_url", "sqlite::memory:")?
            .set_default("max_connections", 10)?
            .set_default("environment", "development")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("LOTLEDGER"))
            .build()?
            .try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let config = AppConfig::load().expect("defaults should load");
        assert_eq!(config.max_connections, 10);
        assert!(!config.is_production());
    }
}
