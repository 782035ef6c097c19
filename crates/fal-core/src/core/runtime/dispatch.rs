use anyhow::{Context, Result};
use tracing::{debug, info};

use fal_domain::{
    AdapterConfig, AdapterResponse, Environment, EnvironmentLayer, ExecutionRequest,
    LayerStack, LocalEnvironment, MacroManifest, Manifest, RemoteEnvironment,
};

use super::archive;
use super::deps::default_pip_dependencies;
use super::isolate::ConnectionSession;
use super::koldstart::{environment_key, run_in_koldstart};
use super::runner::{rehydrate, run_isolated, run_with_adapter, ModelInvocation};
use crate::context::CommandContext;
use crate::core::tooling::errors::ConfigurationError;

const BIGQUERY_SERVICE_ACCOUNT: &str = "BigQuery credential method `service-account` is not \
     supported. Please use `service-account-json` instead";

/// Runs one Python model in `environment` and returns what its `main`
/// produced.
///
/// # Errors
/// Configuration errors surface before anything is provisioned; every other
/// failure comes back from the backend as-is.
pub fn run_in_environment_with_adapter(
    ctx: &CommandContext,
    environment: &Environment,
    code: &str,
    config: &AdapterConfig,
    manifest: &Manifest,
    macro_manifest: &MacroManifest,
    adapter_type: &str,
) -> Result<AdapterResponse> {
    info!(
        environment = environment.name(),
        backend = %environment.backend_kind(),
        adapter = adapter_type,
        "dispatching python model"
    );
    match environment {
        Environment::InProcess => {
            let request = ExecutionRequest::new(
                code,
                config.clone(),
                manifest.clone(),
                macro_manifest.clone(),
                None,
            );
            run_in_process(ctx, &request)
        }
        Environment::Local(local) => {
            let request = ExecutionRequest::new(
                code,
                config.clone(),
                manifest.clone(),
                macro_manifest.clone(),
                None,
            );
            run_local(ctx, local, adapter_type, &request)
        }
        Environment::IsolateServer(remote) => {
            let stack = remote_stack(ctx, remote, config, adapter_type)?;
            let key = ctx
                .effects()
                .isolate()
                .create_environment(&remote.host, &remote.target_kind, &stack)
                .with_context(|| format!("failed to create environment `{}`", remote.name))?;
            debug!(key = %key.0, "isolate environment ready");
            let request = remote_request(code, config, manifest, macro_manifest)?;
            let mut session =
                ConnectionSession::open(ctx.effects().isolate(), &remote.host, &key)?;
            let response = session.run(&request)?;
            session
                .close()
                .with_context(|| format!("failed to close connection for `{}`", remote.name))?;
            Ok(response)
        }
        Environment::Koldstart(remote) => {
            let stack = remote_stack(ctx, remote, config, adapter_type)?;
            let key = environment_key(&stack)?;
            debug!(key = %key.0, "koldstart environment ready");
            let request = remote_request(code, config, manifest, macro_manifest)?;
            run_in_koldstart(ctx.effects().koldstart(), remote, &stack, request)
        }
    }
}

fn run_in_process(ctx: &CommandContext, request: &ExecutionRequest) -> Result<AdapterResponse> {
    let runtime = ctx.python_runtime();
    let invocation = ModelInvocation {
        python: runtime.detect_interpreter()?,
        support_module: ctx.config().runtime().support_module.clone(),
        extra_paths: Vec::new(),
    };
    let adapter = rehydrate(request.config(), request.manifest(), request.macro_manifest())?;
    run_with_adapter(runtime, &invocation, &adapter, request)
}

fn run_local(
    ctx: &CommandContext,
    local: &LocalEnvironment,
    adapter_type: &str,
    request: &ExecutionRequest,
) -> Result<AdapterResponse> {
    let defaults = default_pip_dependencies(adapter_type, false, ctx.config().dependencies());
    let base = ctx
        .provisioner()
        .create(&local.layer)
        .with_context(|| format!("failed to provision environment `{}`", local.name))?;
    let stage = ctx
        .provisioner()
        .create(&EnvironmentLayer::virtualenv(defaults))
        .context("failed to provision the dbt stage environment")?;
    debug!(
        python = %base.python.display(),
        stage = %stage.site_packages.display(),
        "local environment ready"
    );
    let invocation = ModelInvocation {
        python: base.python.display().to_string(),
        support_module: ctx.config().runtime().support_module.clone(),
        extra_paths: vec![stage.site_packages],
    };
    run_isolated(ctx.python_runtime(), &invocation, request)
}

fn remote_stack(
    ctx: &CommandContext,
    remote: &RemoteEnvironment,
    config: &AdapterConfig,
    adapter_type: &str,
) -> Result<LayerStack> {
    if config.credentials.is_bigquery_service_account() {
        return Err(ConfigurationError::new(BIGQUERY_SERVICE_ACCOUNT).into());
    }
    let defaults = default_pip_dependencies(adapter_type, true, ctx.config().dependencies());
    Ok(remote.layers.with_layer(EnvironmentLayer::virtualenv(defaults)))
}

fn remote_request(
    code: &str,
    config: &AdapterConfig,
    manifest: &Manifest,
    macro_manifest: &MacroManifest,
) -> Result<ExecutionRequest> {
    let scripts_path = config.scripts_path();
    let local_packages = if scripts_path.is_dir() {
        let bytes = archive::pack(&scripts_path)?;
        info!(path = %scripts_path.display(), bytes = bytes.len(), "shipping local scripts");
        Some(bytes)
    } else {
        debug!(path = %scripts_path.display(), "no local scripts to ship");
        None
    };
    Ok(ExecutionRequest::new(
        code,
        config.clone(),
        manifest.clone(),
        macro_manifest.clone(),
        local_packages,
    ))
}
