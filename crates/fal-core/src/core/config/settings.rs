use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use fal_domain::RemoteCredentials;

pub const DEFAULT_SUPPORT_MODULE: &str = "dbt.adapters.fal_experimental.support";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) runtime: RuntimeConfig,
    pub(crate) dependencies: DependencyConfig,
    pub(crate) remote: RemoteConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the environment cache location cannot be resolved
    /// or a numeric setting does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let env_cache = match snapshot.var("FAL_ENV_CACHE") {
            Some(path) => PathBuf::from(path),
            None => dirs_next::cache_dir()
                .map(|dir| dir.join("fal").join("envs"))
                .ok_or_else(|| {
                    anyhow!("unable to determine a cache directory; set FAL_ENV_CACHE")
                })?,
        };
        let http_timeout = match snapshot.var("FAL_HTTP_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|err| anyhow!("invalid FAL_HTTP_TIMEOUT `{raw}`: {err}"))?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };
        let credentials = match (snapshot.var("FAL_KEY_ID"), snapshot.var("FAL_KEY_SECRET")) {
            (Some(key_id), Some(key_secret)) => Some(RemoteCredentials {
                key_id: key_id.to_string(),
                key_secret: key_secret.to_string(),
            }),
            _ => None,
        };
        Ok(Self {
            runtime: RuntimeConfig {
                python: snapshot.var("FAL_RUNTIME_PYTHON").map(ToOwned::to_owned),
                env_cache,
                support_module: snapshot
                    .var("FAL_SUPPORT_MODULE")
                    .unwrap_or(DEFAULT_SUPPORT_MODULE)
                    .to_string(),
            },
            dependencies: DependencyConfig {
                dbt_version: snapshot.var("FAL_DBT_VERSION").map(ToOwned::to_owned),
                fal_version: snapshot.var("FAL_PACKAGE_VERSION").map(ToOwned::to_owned),
            },
            remote: RemoteConfig {
                credentials,
                http_timeout: Duration::from_secs(http_timeout),
            },
        })
    }

    #[must_use]
    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    #[must_use]
    pub fn dependencies(&self) -> &DependencyConfig {
        &self.dependencies
    }

    #[must_use]
    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub python: Option<String>,
    pub env_cache: PathBuf,
    pub support_module: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyConfig {
    pub dbt_version: Option<String>,
    pub fal_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub credentials: Option<RemoteCredentials>,
    pub http_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_overrides() {
        let snapshot = EnvSnapshot::testing(&[("FAL_ENV_CACHE", "/tmp/fal-envs")]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        assert_eq!(config.runtime().env_cache, PathBuf::from("/tmp/fal-envs"));
        assert_eq!(config.runtime().support_module, DEFAULT_SUPPORT_MODULE);
        assert!(config.runtime().python.is_none());
        assert!(config.remote().credentials.is_none());
        assert_eq!(
            config.remote().http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
    }

    #[test]
    fn credentials_need_both_halves() {
        let snapshot = EnvSnapshot::testing(&[
            ("FAL_ENV_CACHE", "/tmp/fal-envs"),
            ("FAL_KEY_ID", "abc"),
        ]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        assert!(config.remote().credentials.is_none());

        let snapshot = EnvSnapshot::testing(&[
            ("FAL_ENV_CACHE", "/tmp/fal-envs"),
            ("FAL_KEY_ID", "abc"),
            ("FAL_KEY_SECRET", "xyz"),
        ]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        let creds = config.remote().credentials.as_ref().expect("credentials");
        assert_eq!(creds.key_id, "abc");
        assert_eq!(creds.key_secret, "xyz");
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let snapshot = EnvSnapshot::testing(&[
            ("FAL_ENV_CACHE", "/tmp/fal-envs"),
            ("FAL_HTTP_TIMEOUT", "soon"),
        ]);
        let err = Config::from_snapshot(&snapshot).expect_err("timeout must be numeric");
        assert!(err.to_string().contains("FAL_HTTP_TIMEOUT"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let snapshot = EnvSnapshot::testing(&[
            ("FAL_ENV_CACHE", "/tmp/fal-envs"),
            ("FAL_DBT_VERSION", "  "),
            ("FAL_PACKAGE_VERSION", "1.5.0"),
        ]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        assert_eq!(config.dependencies().dbt_version, None);
        assert_eq!(config.dependencies().fal_version.as_deref(), Some("1.5.0"));
    }
}
