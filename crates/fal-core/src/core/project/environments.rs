use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pep508_rs::Requirement;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use fal_domain::{
    Environment, EnvironmentLayer, LayerKind, LayerStack, LocalEnvironment, RemoteCredentials,
    RemoteEnvironment, RemoteHost,
};

use crate::core::tooling::errors::ConfigurationError;

pub const PROJECT_FILE: &str = "fal_project.yml";
pub const LOCAL_ENVIRONMENT: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteService {
    Isolate,
    Koldstart,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRemote {
    host: String,
    #[serde(default = "default_service")]
    service: RemoteService,
    #[serde(default)]
    machine_type: Option<String>,
}

fn default_service() -> RemoteService {
    RemoteService::Koldstart
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvironment {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    requirements: Option<Vec<String>>,
    #[serde(default)]
    packages: Option<Vec<String>>,
    #[serde(default)]
    machine_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProject {
    #[serde(default)]
    remote: Option<RawRemote>,
    #[serde(default)]
    environments: Vec<RawEnvironment>,
}

/// A validated environment entry from the project file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDefinition {
    pub name: String,
    pub layer: EnvironmentLayer,
    pub machine_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: Url,
    pub service: RemoteService,
    pub machine_type: Option<String>,
}

/// Environments declared in `fal_project.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectEnvironments {
    pub remote: Option<RemoteSettings>,
    pub definitions: Vec<EnvironmentDefinition>,
}

impl ProjectEnvironments {
    /// Loads `fal_project.yml` from `project_root`; a missing file means no
    /// environments.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(PROJECT_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no project environments file");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents, &path)
    }

    pub fn parse(contents: &str, origin: &Path) -> Result<Self> {
        let raw: RawProject = if contents.trim().is_empty() {
            RawProject::default()
        } else {
            serde_yaml::from_str(contents).map_err(|err| {
                ConfigurationError::new(format!("invalid {}: {err}", origin.display()))
            })?
        };
        let remote = raw.remote.map(validate_remote).transpose()?;
        let mut seen = BTreeSet::new();
        let mut definitions = Vec::with_capacity(raw.environments.len());
        for env in raw.environments {
            if env.name == LOCAL_ENVIRONMENT {
                return Err(ConfigurationError::new(format!(
                    "environment name `{LOCAL_ENVIRONMENT}` is reserved for in-process runs"
                ))
                .into());
            }
            if !seen.insert(env.name.clone()) {
                return Err(ConfigurationError::new(format!(
                    "environment `{}` is defined more than once",
                    env.name
                ))
                .into());
            }
            definitions.push(validate_environment(env)?);
        }
        Ok(Self {
            remote,
            definitions,
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EnvironmentDefinition> {
        self.definitions.iter().find(|def| def.name == name)
    }

    /// Builds the handle for `name`; `None` or `local` run in-process.
    pub fn resolve(
        &self,
        name: Option<&str>,
        credentials: Option<&RemoteCredentials>,
    ) -> Result<Environment> {
        let name = match name {
            None => return Ok(Environment::InProcess),
            Some(name) if name == LOCAL_ENVIRONMENT => return Ok(Environment::InProcess),
            Some(name) => name,
        };
        let definition = self.get(name).ok_or_else(|| {
            ConfigurationError::new(format!(
                "environment `{name}` is not defined in {PROJECT_FILE}"
            ))
        })?;
        let Some(remote) = &self.remote else {
            return Ok(Environment::Local(LocalEnvironment {
                name: definition.name.clone(),
                layer: definition.layer.clone(),
            }));
        };
        let handle = RemoteEnvironment {
            name: definition.name.clone(),
            host: RemoteHost {
                url: remote.url.clone(),
                credentials: credentials.cloned(),
            },
            target_kind: definition.layer.kind.clone(),
            layers: LayerStack::new(vec![definition.layer.clone()]),
            machine_type: definition
                .machine_type
                .clone()
                .or_else(|| remote.machine_type.clone()),
        };
        Ok(match remote.service {
            RemoteService::Isolate => Environment::IsolateServer(handle),
            RemoteService::Koldstart => Environment::Koldstart(handle),
        })
    }

    #[must_use]
    pub fn project_file(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_FILE)
    }
}

fn validate_remote(raw: RawRemote) -> Result<RemoteSettings> {
    let url = Url::parse(&raw.host).map_err(|err| {
        ConfigurationError::new(format!("invalid remote host `{}`: {err}", raw.host))
    })?;
    Ok(RemoteSettings {
        url,
        service: raw.service,
        machine_type: raw.machine_type,
    })
}

fn validate_environment(raw: RawEnvironment) -> Result<EnvironmentDefinition> {
    let kind = match raw.kind.as_str() {
        "venv" | "virtualenv" => LayerKind::Virtualenv,
        "conda" => LayerKind::Conda,
        other => {
            return Err(ConfigurationError::new(format!(
                "Environment type not supported: {other} (environment `{}`)",
                raw.name
            ))
            .into())
        }
    };
    if kind == LayerKind::Virtualenv && raw.packages.is_some() {
        return Err(ConfigurationError::new(format!(
            "environment `{}`: `packages` only apply to conda environments",
            raw.name
        ))
        .into());
    }
    for requirement in raw.requirements.iter().flatten() {
        requirement.parse::<Requirement>().map_err(|err| {
            ConfigurationError::new(format!(
                "environment `{}`: invalid requirement `{requirement}`: {err}",
                raw.name
            ))
        })?;
    }
    let layer = EnvironmentLayer {
        kind,
        configuration: fal_domain::LayerConfiguration {
            requirements: raw.requirements,
            packages: raw.packages,
        },
    };
    Ok(EnvironmentDefinition {
        name: raw.name,
        layer,
        machine_type: raw.machine_type,
    })
}
