use serde::Deserialize;

/// Process-level configuration read from the environment.
///
/// Business settings such as rates and caps live in the settings provider,
/// not here.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub max_connections: u32,
    /// How long loaded business settings are reused before reloading.
    pub settings_ttl_secs: u64,
    /// How often the daily earnings batch looks for due licenses.
    pub earnings_interval_secs: u64,
    /// How often pending orders past their deadline are swept.
    pub expiry_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("max_connections", 8)?
            .set_default("settings_ttl_secs", 60)?
            .set_default("earnings_interval_secs", 900)?
            .set_default("expiry_sweep_secs", 300)?
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }
}
