use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::info;

use fal_domain::{
    flatten, AdapterConfig, EnvironmentLayer, ExecutionRequest, LayerStack, MacroManifest,
    Manifest,
};

use super::archive;
use super::deps::default_pip_dependencies;
use super::dispatch::run_in_environment_with_adapter;
use super::runner::{run_isolated, ModelInvocation};
use crate::context::CommandContext;
use crate::core::project::ProjectEnvironments;
use crate::core::tooling::errors::ConfigurationError;
use crate::ExecutionOutcome;

#[derive(Clone, Debug)]
pub struct RunModelRequest {
    pub model: PathBuf,
    pub config: PathBuf,
    pub manifest: Option<PathBuf>,
    pub macro_manifest: Option<PathBuf>,
    pub environment: Option<String>,
    pub adapter_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EnvironmentsRequest {
    pub project_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct FlattenRequest {
    pub project_dir: PathBuf,
    pub environment: String,
    pub adapter_type: String,
}

#[derive(Clone, Debug)]
pub struct PackRequest {
    pub root: PathBuf,
    pub output: PathBuf,
}

#[derive(Clone, Debug)]
pub struct UnpackRequest {
    pub archive: PathBuf,
    pub dest: PathBuf,
}

#[derive(Clone, Debug)]
pub struct IsolatedRunRequest {
    pub request: PathBuf,
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&contents).map_err(|err| {
        ConfigurationError::new(format!("invalid {what} {}: {err}", path.display())).into()
    })
}

fn read_optional<T: DeserializeOwned + Default>(path: Option<&Path>, what: &str) -> Result<T> {
    path.map_or_else(|| Ok(T::default()), |path| read_json(path, what))
}

/// Runs a Python model file in the environment it names.
///
/// # Errors
/// Returns an error when inputs cannot be read or the backend fails.
pub fn run_model(ctx: &CommandContext, request: &RunModelRequest) -> Result<ExecutionOutcome> {
    let code = fs::read_to_string(&request.model)
        .with_context(|| format!("failed to read model {}", request.model.display()))?;
    let config: AdapterConfig = read_json(&request.config, "adapter config")?;
    let manifest: Manifest = read_optional(request.manifest.as_deref(), "manifest")?;
    let macro_manifest: MacroManifest =
        read_optional(request.macro_manifest.as_deref(), "macro manifest")?;

    let project = ProjectEnvironments::load(&config.project_root)?;
    let environment = project.resolve(
        request.environment.as_deref(),
        ctx.config().remote().credentials.as_ref(),
    )?;
    let adapter_type = request
        .adapter_type
        .clone()
        .unwrap_or_else(|| config.credentials.adapter_type.clone());

    let response = run_in_environment_with_adapter(
        ctx,
        &environment,
        &code,
        &config,
        &manifest,
        &macro_manifest,
        &adapter_type,
    )?;
    Ok(ExecutionOutcome::success(
        format!("model finished in `{}`", environment.name()),
        json!({
            "environment": environment.name(),
            "backend": environment.backend_kind(),
            "result": response,
        }),
    ))
}

/// Lists the environments declared for a project.
///
/// # Errors
/// Returns an error when the project file is invalid.
pub fn list_environments(
    _ctx: &CommandContext,
    request: &EnvironmentsRequest,
) -> Result<ExecutionOutcome> {
    let project = ProjectEnvironments::load(&request.project_dir)?;
    let remote = project.remote.as_ref();
    let environments: Vec<_> = project
        .definitions
        .iter()
        .map(|def| {
            json!({
                "name": def.name,
                "type": def.layer.kind,
                "requirements": def.layer.configuration.requirements,
                "packages": def.layer.configuration.packages,
                "machine_type": def
                    .machine_type
                    .as_ref()
                    .or(remote.and_then(|r| r.machine_type.as_ref())),
            })
        })
        .collect();
    let message = if environments.is_empty() {
        "no environments defined".to_string()
    } else {
        format!("{} environment(s) defined", environments.len())
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "remote": remote.map(|r| r.url.as_str()),
            "environments": environments,
        }),
    ))
}

/// Shows the single flat environment a remote run of `environment` would
/// ship, default dependencies included.
///
/// # Errors
/// Returns an error when the environment is unknown or cannot be flattened.
pub fn flatten_environment(
    ctx: &CommandContext,
    request: &FlattenRequest,
) -> Result<ExecutionOutcome> {
    let project = ProjectEnvironments::load(&request.project_dir)?;
    let definition = project.get(&request.environment).ok_or_else(|| {
        ConfigurationError::new(format!(
            "environment `{}` is not defined in {}",
            request.environment,
            ProjectEnvironments::project_file(&request.project_dir).display()
        ))
    })?;
    let defaults =
        default_pip_dependencies(&request.adapter_type, true, ctx.config().dependencies());
    let stack = LayerStack::new(vec![definition.layer.clone()])
        .with_layer(EnvironmentLayer::virtualenv(defaults));
    let spec = flatten(&definition.layer.kind, stack.layers())?;
    Ok(ExecutionOutcome::success(
        format!("flattened `{}` into one {} environment", definition.name, spec.kind()),
        serde_json::to_value(&spec)?,
    ))
}

/// Zips a scripts directory into an archive file.
///
/// # Errors
/// Returns an error when the directory cannot be read or the output written.
pub fn pack_directory(_ctx: &CommandContext, request: &PackRequest) -> Result<ExecutionOutcome> {
    let bytes = archive::pack(&request.root)?;
    fs::write(&request.output, &bytes)
        .with_context(|| format!("failed to write {}", request.output.display()))?;
    info!(output = %request.output.display(), bytes = bytes.len(), "archive written");
    Ok(ExecutionOutcome::success(
        format!("packed {} into {}", request.root.display(), request.output.display()),
        json!({ "output": request.output, "bytes": bytes.len() }),
    ))
}

/// Extracts an archive into a directory that must not exist yet.
///
/// # Errors
/// Returns [`crate::DestinationExistsError`] when `dest` exists.
pub fn unpack_archive(_ctx: &CommandContext, request: &UnpackRequest) -> Result<ExecutionOutcome> {
    let bytes = fs::read(&request.archive)
        .with_context(|| format!("failed to read {}", request.archive.display()))?;
    archive::unpack(&bytes, &request.dest)?;
    Ok(ExecutionOutcome::success(
        format!("unpacked into {}", request.dest.display()),
        json!({ "dest": request.dest }),
    ))
}

/// Worker entry point: runs a serialized request in this process's
/// environment.
///
/// # Errors
/// Returns an error when the request is unreadable or the model fails.
pub fn isolated_run(
    ctx: &CommandContext,
    request: &IsolatedRunRequest,
) -> Result<ExecutionOutcome> {
    let payload: ExecutionRequest = read_json(&request.request, "execution request")?;
    let runtime = ctx.python_runtime();
    let invocation = ModelInvocation {
        python: runtime.detect_interpreter()?,
        support_module: ctx.config().runtime().support_module.clone(),
        extra_paths: Vec::new(),
    };
    let response = run_isolated(runtime, &invocation, &payload)?;
    Ok(ExecutionOutcome::success(
        "isolated run finished",
        json!({ "result": response }),
    ))
}
