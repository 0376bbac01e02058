use std::time::Duration;

use super::parsing::{
    env_optional, env_or_default, parse_base_url, parse_bool, parse_environment,
    parse_positive_u64, parse_u32,
};
use super::types::{
    AttemptSettings, BackendSettings, ConfigError, RuntimeSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("LMS_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("LMS_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let base_url =
            parse_base_url(env_or_default("LMS_API_BASE_URL", "http://localhost:8080/api"))?;
        let api_token = env_or_default("LMS_API_TOKEN", "");
        let request_timeout_seconds = parse_positive_u64(
            "LMS_REQUEST_TIMEOUT_SECONDS",
            env_or_default("LMS_REQUEST_TIMEOUT_SECONDS", "15"),
        )?;
        let connect_timeout_seconds = parse_positive_u64(
            "LMS_CONNECT_TIMEOUT_SECONDS",
            env_or_default("LMS_CONNECT_TIMEOUT_SECONDS", "5"),
        )?;
        let max_retries = parse_u32("LMS_MAX_RETRIES", env_or_default("LMS_MAX_RETRIES", "2"))?;

        let auto_save_enabled = env_optional("LMS_AUTO_SAVE_ENABLED")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);
        let auto_save_interval_seconds = parse_positive_u64(
            "LMS_AUTO_SAVE_INTERVAL_SECONDS",
            env_or_default("LMS_AUTO_SAVE_INTERVAL_SECONDS", "30"),
        )?;

        let log_level = env_or_default("LMS_LOG_LEVEL", "info");
        let json = env_optional("LMS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            backend: BackendSettings {
                base_url,
                api_token,
                request_timeout_seconds,
                connect_timeout_seconds,
                max_retries,
            },
            attempt: AttemptSettings { auto_save_enabled, auto_save_interval_seconds },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub fn attempt(&self) -> &AttemptSettings {
        &self.attempt
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                field: "LMS_MAX_RETRIES",
                value: self.backend.max_retries.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.backend.api_token.is_empty() {
            return Err(ConfigError::MissingSecret("LMS_API_TOKEN"));
        }

        if !self.backend.base_url.is_https() {
            return Err(ConfigError::InsecureUrl { field: "LMS_API_BASE_URL" });
        }

        Ok(())
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl AttemptSettings {
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn load_uses_defaults() {
        let _guard = test_support::env_lock().await;
        test_support::clear_lms_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.backend().base_url.as_str(), "http://localhost:8080/api");
        assert_eq!(settings.backend().request_timeout_seconds, 15);
        assert_eq!(settings.backend().max_retries, 2);
        assert!(settings.attempt().auto_save_enabled);
        assert_eq!(settings.attempt().auto_save_interval(), Duration::from_secs(30));
        assert!(!settings.telemetry().json);
    }

    #[tokio::test]
    async fn strict_mode_requires_token_and_https() {
        let _guard = test_support::env_lock().await;
        test_support::clear_lms_env();
        std::env::set_var("LMS_STRICT_CONFIG", "1");

        let err = Settings::load().expect_err("token required");
        assert!(matches!(err, ConfigError::MissingSecret("LMS_API_TOKEN")));

        std::env::set_var("LMS_API_TOKEN", "student-token");
        let err = Settings::load().expect_err("https required");
        assert!(matches!(err, ConfigError::InsecureUrl { .. }));

        std::env::set_var("LMS_API_BASE_URL", "https://lms.example.com/api");
        let settings = Settings::load().expect("strict settings");
        assert_eq!(settings.backend().api_token, "student-token");

        test_support::clear_lms_env();
    }

    #[tokio::test]
    async fn zero_autosave_interval_is_rejected() {
        let _guard = test_support::env_lock().await;
        test_support::clear_lms_env();
        std::env::set_var("LMS_AUTO_SAVE_INTERVAL_SECONDS", "0");

        let err = Settings::load().expect_err("zero interval");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "LMS_AUTO_SAVE_INTERVAL_SECONDS", .. }
        ));

        test_support::clear_lms_env();
    }
}
