mod parsing;
mod settings;
mod types;

pub use types::{
    AttemptSettings, BackendSettings, BaseUrl, ConfigError, Environment, RuntimeSettings,
    Settings, TelemetrySettings,
};
