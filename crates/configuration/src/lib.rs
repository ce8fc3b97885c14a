use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    Config, DatabaseConfig, MarketConfig, PriceFeedConfig, ServerConfig, SweeperConfig,
};

/// Loads the application configuration from the `config.toml` file in the
/// working directory.
///
/// The file is optional. Values can be overridden with `MERIDIAN__SECTION__KEY`
/// environment variables, and the conventional `DATABASE_URL` wins over
/// `database.url` when it is set.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(Path::new("config.toml"))
}

/// Same as [`load_config`] but reads the given file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("MERIDIAN")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    tracing::debug!(path = %path.display(), "Configuration loaded.");
    Ok(config)
}

/// Parses a configuration from TOML text, without consulting the environment.
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?
        .try_deserialize::<Config>()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Rejects settings that would leave a background task spinning or the
    /// market permanently closed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sweeper.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.prices.enabled && self.prices.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "prices.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.market.open >= self.market.close {
            return Err(ConfigError::ValidationError(format!(
                "market.open ({}) must be before market.close ({})",
                self.market.open, self.market.close
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
