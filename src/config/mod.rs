//! Configuration loading.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `config/default.{toml,yaml,json}` file, then `GATEWAY__*` environment
//! variables (`GATEWAY__SERVER__PORT=9000`, `GATEWAY__AUTH__SECRETS=a,b`).

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    AuthSettings, BrokerSettings, HandshakeSettings, HeartbeatSettings, LoggingSettings,
    ServerSettings, Settings,
};

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] but reads the file source from `path`
/// (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("GATEWAY")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.secrets")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available, then merge with defaults
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());
    settings.validate().map_err(ConfigError::Message)?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
