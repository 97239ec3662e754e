//! Configuration loading for the service binaries.
//!
//! Each service reads an optional TOML file and then environment variables
//! under its own prefix (`TESSERA_PUBLISHER__NWORKERS=4`). Nested keys use
//! `__` as separator.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

pub const BROKER_ENV_PREFIX: &str = "TESSERA_BROKER__";
pub const PUBLISHER_ENV_PREFIX: &str = "TESSERA_PUBLISHER__";
pub const SUBSCRIBER_ENV_PREFIX: &str = "TESSERA_SUBSCRIBER__";

/// Build the figment for a service: defaults, then file, then environment.
pub fn figment<T: Serialize + Default>(config_path: Option<&Path>, env_prefix: &str) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(T::default()));
    if let Some(path) = config_path {
        if path.exists() {
            tracing::info!(config_path = %path.display(), "Loading configuration from file");
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::warn!(config_path = %path.display(), "Configuration file not found, ignoring");
        }
    }
    figment.merge(Env::prefixed(env_prefix).split("__"))
}

/// Load a service configuration.
pub fn load<T>(config_path: Option<&Path>, env_prefix: &str) -> Result<T, figment::Error>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment::<T>(config_path, env_prefix).extract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::config::{PublisherConfig, SubscriberConfig};

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pub.toml");
        std::fs::write(
            &path,
            "name = \"foo\"\nroot = \"/srv/foo\"\nnworkers = 3\n",
        )
        .unwrap();

        let config: PublisherConfig = load(Some(&path), "TESSERA_TEST_UNSET_PREFIX__").unwrap();
        assert_eq!(config.name, "foo");
        assert_eq!(config.nworkers, 3);
        assert_eq!(config.http, "127.0.0.1:8001");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config: SubscriberConfig =
            load(Some(&dir.path().join("absent.toml")), "TESSERA_TEST_UNSET_PREFIX__").unwrap();
        assert_eq!(config.http, "127.0.0.1:8002");
    }
}
