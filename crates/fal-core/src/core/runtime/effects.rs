use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use fal_domain::{
    AdapterResponse, EnvironmentLayer, ExecutionRequest, FlatEnvironmentSpec, LayerKind,
    LayerStack, RemoteHost,
};

use super::isolate::HttpIsolateClient;
use super::koldstart::HttpKoldstartClient;
use super::local::SystemProvisioner;
use super::process::{run_command, RunOutput};
use crate::config::Config;

pub trait PythonRuntime: Send + Sync {
    fn detect_interpreter(&self) -> Result<String>;
    fn run_command(
        &self,
        python: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput>;
}

/// A provisioned local environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedEnvironment {
    pub prefix: PathBuf,
    pub python: PathBuf,
    pub site_packages: PathBuf,
}

pub trait EnvironmentProvisioner: Send + Sync {
    /// Creates (or reuses) an environment satisfying `layer`.
    fn create(&self, layer: &EnvironmentLayer) -> Result<ProvisionedEnvironment>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentKey(pub String);

/// One open connection to an isolate server; `close` must run exactly once.
pub trait Connection: Send {
    fn run(&mut self, request: &ExecutionRequest) -> Result<AdapterResponse>;
    fn close(&mut self) -> Result<()>;
}

pub trait IsolateClient: Send + Sync {
    fn create_environment(
        &self,
        host: &RemoteHost,
        target: &LayerKind,
        layers: &LayerStack,
    ) -> Result<EnvironmentKey>;
    fn open_connection(
        &self,
        host: &RemoteHost,
        key: &EnvironmentKey,
    ) -> Result<Box<dyn Connection>>;
}

pub trait KoldstartClient: Send + Sync {
    fn run_isolated(
        &self,
        host: &RemoteHost,
        definition: &FlatEnvironmentSpec,
        machine_type: Option<&str>,
        payload: &ExecutionRequest,
    ) -> Result<AdapterResponse>;
}

pub trait Effects: Send + Sync {
    fn python(&self) -> &dyn PythonRuntime;
    fn provisioner(&self) -> &dyn EnvironmentProvisioner;
    fn isolate(&self) -> &dyn IsolateClient;
    fn koldstart(&self) -> &dyn KoldstartClient;
}

pub type SharedEffects = Arc<dyn Effects>;

pub struct SystemEffects {
    python: Arc<SystemPythonRuntime>,
    provisioner: Arc<SystemProvisioner>,
    isolate: Arc<HttpIsolateClient>,
    koldstart: Arc<HttpKoldstartClient>,
}

impl SystemEffects {
    /// Wires the real interpreter, provisioner, and HTTP clients.
    ///
    /// # Errors
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let python = Arc::new(SystemPythonRuntime::new(config.runtime().python.clone()));
        Ok(Self {
            provisioner: Arc::new(SystemProvisioner::new(
                python.clone(),
                config.runtime().env_cache.clone(),
            )),
            python,
            isolate: Arc::new(HttpIsolateClient::new(config.remote().http_timeout)?),
            koldstart: Arc::new(HttpKoldstartClient::new(config.remote().http_timeout)?),
        })
    }
}

impl Effects for SystemEffects {
    fn python(&self) -> &dyn PythonRuntime {
        self.python.as_ref()
    }

    fn provisioner(&self) -> &dyn EnvironmentProvisioner {
        self.provisioner.as_ref()
    }

    fn isolate(&self) -> &dyn IsolateClient {
        self.isolate.as_ref()
    }

    fn koldstart(&self) -> &dyn KoldstartClient {
        self.koldstart.as_ref()
    }
}

pub(crate) struct SystemPythonRuntime {
    explicit: Option<String>,
}

impl SystemPythonRuntime {
    pub(crate) fn new(explicit: Option<String>) -> Self {
        Self { explicit }
    }
}

impl PythonRuntime for SystemPythonRuntime {
    fn detect_interpreter(&self) -> Result<String> {
        if let Some(explicit) = &self.explicit {
            return Ok(explicit.clone());
        }
        for candidate in ["python3", "python"] {
            if let Ok(path) = which::which(candidate) {
                return path
                    .into_os_string()
                    .into_string()
                    .map_err(|_| anyhow!("non-utf8 path"));
            }
        }
        bail!("no python interpreter found; set FAL_RUNTIME_PYTHON");
    }

    fn run_command(
        &self,
        python: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput> {
        run_command(python, args, env, cwd)
    }
}

/// `PYTHONPATH` value with `extra` ahead of whatever the caller already had.
pub(crate) fn python_path(extra: &[PathBuf]) -> Result<String> {
    let mut paths: Vec<PathBuf> = extra.to_vec();
    if let Some(existing) = env::var_os("PYTHONPATH") {
        paths.extend(env::split_paths(&existing));
    }
    let joined = env::join_paths(paths).map_err(|err| anyhow!("invalid PYTHONPATH entry: {err}"))?;
    joined
        .into_string()
        .map_err(|_| anyhow!("non-utf8 PYTHONPATH"))
}
