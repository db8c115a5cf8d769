use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

pub mod env {
    pub const API_KEY: &str = "GENAI_API_KEY";
    pub const MODEL: &str = "GEN_AI_MODEL";
    pub const PORT: &str = "PORT";
    pub const BASE_URL: &str = "GENAI_BASE_URL";
    pub const STATIC_DIR: &str = "STATIC_DIR";
}

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_STATIC_DIR: &str = "public";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the {0} environment variable must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub model: String,
    pub port: u16,
    pub base_url: String,
    pub static_dir: PathBuf,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = var(env::API_KEY).ok_or(ConfigError::Missing(env::API_KEY))?;
        let model = var(env::MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_owned());

        let port = match var(env::PORT) {
            Some(port) => port.trim().parse().unwrap_or_else(|_| {
                warn!("ignoring invalid {} value `{port}`", env::PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let base_url = var(env::BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let static_dir = var(env::STATIC_DIR)
            .unwrap_or_else(|| DEFAULT_STATIC_DIR.to_owned())
            .into();

        Ok(Self {
            api_key,
            model,
            port,
            base_url,
            static_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_log::test;

    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let vars: HashMap<_, _> = vars.iter().copied().collect();
        move |key| vars.get(key).map(|value| value.to_string())
    }

    #[test]
    fn config_falls_back_to_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[(env::API_KEY, "secret")])).unwrap();

        assert_eq!(config.api_key, "secret");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.static_dir, PathBuf::from(DEFAULT_STATIC_DIR));
    }

    #[test]
    fn config_reads_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            (env::API_KEY, "secret"),
            (env::MODEL, "gemini-2.0-flash"),
            (env::PORT, "8080"),
            (env::BASE_URL, "http://127.0.0.1:9000"),
            (env::STATIC_DIR, "www"),
        ]))
        .unwrap();

        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.static_dir, PathBuf::from("www"));
    }

    #[test]
    fn config_treats_blank_model_as_unset() {
        let config =
            RelayConfig::from_lookup(lookup(&[(env::API_KEY, "secret"), (env::MODEL, "  ")]))
                .unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn config_ignores_unparseable_port() {
        let config =
            RelayConfig::from_lookup(lookup(&[(env::API_KEY, "secret"), (env::PORT, "http")]))
                .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn config_requires_api_key() {
        let err = RelayConfig::from_lookup(lookup(&[])).unwrap_err();

        assert!(matches!(err, ConfigError::Missing(env::API_KEY)));
    }
}
