mod settings;

use std::env;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, MetricsSettings, ServerSettings, Settings};

/// Legacy variable for the listen address; it wins over every other source.
pub const LISTENER_ADDRESS_VAR: &str = "LISTENER_ADDRESS";

/// Loads the configuration from `config/default.*`, `RELAYMQ__*` environment
/// variables and `LISTENER_ADDRESS`, in increasing order of precedence.
/// Values that no source provides come from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let listener_address = env::var(LISTENER_ADDRESS_VAR)
        .ok()
        .filter(|addr| !addr.trim().is_empty());

    let config = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("RELAYMQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("server.address", listener_address)?
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
