//! The half of a run that executes next to the user's Python code, possibly
//! in a fresh process or on a remote machine.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use fal_domain::{AdapterConfig, AdapterResponse, ExecutionRequest, MacroManifest, Manifest};

use super::archive;
use super::effects::{python_path, PythonRuntime};
use crate::core::tooling::errors::ConfigurationError;

const BOOTSTRAP_SCRIPT: &str = r#"import importlib, json, sys

with open(sys.argv[1], encoding="utf-8") as handle:
    payload = json.load(handle)

support = importlib.import_module(payload["support_module"])
adapter = support.reconstruct_adapter(
    payload["config"], payload["manifest"], payload["macro_manifest"]
)
namespace = {"__name__": "__fal_model__"}
exec(compile(payload["code"], "<fal model>", "exec"), namespace)
main = namespace.get("main")
if main is None:
    raise SystemExit("model code does not define a `main` function")
result = main(
    read_df=support.prepare_for_adapter(adapter, support.read_relation_as_df),
    write_df=support.prepare_for_adapter(adapter, support.write_df_to_relation),
)
encode = getattr(support, "encode_response", None)
if encode is not None:
    result = encode(result)
with open(sys.argv[2], "w", encoding="utf-8") as handle:
    json.dump(result, handle, default=str)
"#;

/// What a fresh process knows about the adapter after rehydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterHandle {
    pub adapter_type: String,
    pub profile_name: String,
    pub target_name: String,
    pub manifest_fingerprint: String,
    pub macro_manifest_fingerprint: String,
}

/// Rebuilds the adapter handle from serialized inputs alone.
///
/// Pure: reads no globals and touches no files, so it is safe in a process
/// that shares nothing with the caller.
pub fn rehydrate(
    config: &AdapterConfig,
    manifest: &Manifest,
    macro_manifest: &MacroManifest,
) -> Result<AdapterHandle> {
    if config.credentials.adapter_type.trim().is_empty() {
        return Err(ConfigurationError::new("adapter credentials are missing a `type`").into());
    }
    if config.profile_name.trim().is_empty() {
        return Err(ConfigurationError::new("adapter config is missing a profile name").into());
    }
    Ok(AdapterHandle {
        adapter_type: config.credentials.adapter_type.clone(),
        profile_name: config.profile_name.clone(),
        target_name: config.target_name.clone(),
        manifest_fingerprint: manifest.fingerprint(),
        macro_manifest_fingerprint: macro_manifest.fingerprint(),
    })
}

/// Interpreter and import paths a model runs with.
#[derive(Debug, Clone)]
pub struct ModelInvocation {
    pub python: String,
    pub support_module: String,
    pub extra_paths: Vec<PathBuf>,
}

#[derive(Serialize)]
struct BootstrapPayload<'a> {
    support_module: &'a str,
    code: &'a str,
    adapter: &'a AdapterHandle,
    config: &'a AdapterConfig,
    manifest: &'a Manifest,
    macro_manifest: &'a MacroManifest,
}

/// Runs the model's `main` with the scripts directory importable.
///
/// # Errors
/// Returns an error when the interpreter cannot start, the model raises, or
/// the result file is left empty.
pub fn run_with_adapter(
    runtime: &dyn PythonRuntime,
    invocation: &ModelInvocation,
    adapter: &AdapterHandle,
    request: &ExecutionRequest,
) -> Result<AdapterResponse> {
    let scripts_path = request.config().scripts_path();
    let mut paths = vec![scripts_path];
    paths.extend(invocation.extra_paths.iter().cloned());

    let payload = BootstrapPayload {
        support_module: &invocation.support_module,
        code: request.code(),
        adapter,
        config: request.config(),
        manifest: request.manifest(),
        macro_manifest: request.macro_manifest(),
    };
    let mut payload_file = tempfile::Builder::new()
        .prefix("fal-model-")
        .suffix(".json")
        .tempfile()
        .context("failed to create model payload file")?;
    serde_json::to_writer(&mut payload_file, &payload)?;
    payload_file.flush()?;
    let result_file = tempfile::Builder::new()
        .prefix("fal-result-")
        .suffix(".json")
        .tempfile()
        .context("failed to create model result file")?;

    let envs = vec![("PYTHONPATH".to_string(), python_path(&paths)?)];
    let args = vec![
        "-c".to_string(),
        BOOTSTRAP_SCRIPT.to_string(),
        payload_file.path().display().to_string(),
        result_file.path().display().to_string(),
    ];
    let cwd = working_dir(&request.config().project_root);
    debug!(python = %invocation.python, cwd = %cwd.display(), "starting model process");
    let output = runtime.run_command(&invocation.python, &args, &envs, &cwd)?;
    if !output.success() {
        bail!(
            "model process exited with code {}:\n{}",
            output.code,
            output.stderr.trim_end()
        );
    }
    let written = fs::read_to_string(result_file.path())
        .with_context(|| format!("failed to read {}", result_file.path().display()))?;
    parse_result(&written).map(AdapterResponse)
}

/// Entry point on the far side of an isolation boundary: rehydrate, lay out
/// the shipped scripts, then run the model.
///
/// # Errors
/// Fails with [`crate::DestinationExistsError`] when an archive is shipped
/// but the scripts path already exists.
pub fn run_isolated(
    runtime: &dyn PythonRuntime,
    invocation: &ModelInvocation,
    request: &ExecutionRequest,
) -> Result<AdapterResponse> {
    let adapter = rehydrate(request.config(), request.manifest(), request.macro_manifest())?;
    if let Some(bytes) = request.local_packages() {
        let scripts_path = request.config().scripts_path();
        info!(dest = %scripts_path.display(), bytes = bytes.len(), "unpacking shipped scripts");
        archive::unpack(bytes, &scripts_path)?;
    }
    run_with_adapter(runtime, invocation, &adapter, request)
}

fn working_dir(project_root: &Path) -> PathBuf {
    if project_root.is_dir() {
        project_root.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn parse_result(written: &str) -> Result<Value> {
    if written.trim().is_empty() {
        bail!("model process finished without reporting a result");
    }
    serde_json::from_str(written).context("model result is not valid JSON")
}
