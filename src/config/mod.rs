mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{ClientSettings, HubSettings, LogSettings, ServerSettings, Settings};

/// Prefix of environment overrides, e.g. `SSEHUB__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "SSEHUB";

/// Loads the configuration from the default file and environment variables.
///
/// `config/default.{toml,yaml,json,..}` is optional; environment variables win
/// over it and missing values fall back to `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    build(File::with_name("config/default").required(false))
}

/// Like [`load_config`] but reads an explicit, required file.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    build(File::from(path.as_ref()).required(true))
}

fn build<S>(file: S) -> Result<Settings, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("hub.allowed_channels")
                .with_list_parse_key("server.allowed_origins")
                .try_parsing(true),
        )
        .build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());
    settings.validate().map_err(ConfigError::Message)?;
    Ok(settings)
}
