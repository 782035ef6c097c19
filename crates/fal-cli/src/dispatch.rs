use fal_core::{
    flatten_environment, isolated_run, list_environments, outcome_for_error, pack_directory,
    run_model, unpack_archive, CommandContext, EnvironmentsRequest, ExecutionOutcome,
    FlattenRequest, IsolatedRunRequest, PackRequest, RunModelRequest, UnpackRequest,
};
use tracing::debug;

use crate::cli::CommandGroupCli;

pub fn command_name(group: &CommandGroupCli) -> &'static str {
    match group {
        CommandGroupCli::Run(_) => "run",
        CommandGroupCli::Environments(_) => "environments",
        CommandGroupCli::Flatten(_) => "flatten",
        CommandGroupCli::Pack(_) => "pack",
        CommandGroupCli::Unpack(_) => "unpack",
        CommandGroupCli::IsolatedRun(_) => "isolated-run",
    }
}

pub fn dispatch_command(ctx: &CommandContext, group: &CommandGroupCli) -> ExecutionOutcome {
    match group {
        CommandGroupCli::Run(args) => {
            let request = RunModelRequest {
                model: args.model.clone(),
                config: args.config.clone(),
                manifest: args.manifest.clone(),
                macro_manifest: args.macro_manifest.clone(),
                environment: args.environment.clone(),
                adapter_type: args.adapter_type.clone(),
            };
            core_call(group, || run_model(ctx, &request))
        }
        CommandGroupCli::Environments(args) => {
            let request = EnvironmentsRequest {
                project_dir: args.project_dir.clone(),
            };
            core_call(group, || list_environments(ctx, &request))
        }
        CommandGroupCli::Flatten(args) => {
            let request = FlattenRequest {
                project_dir: args.project.project_dir.clone(),
                environment: args.environment.clone(),
                adapter_type: args.adapter_type.clone(),
            };
            core_call(group, || flatten_environment(ctx, &request))
        }
        CommandGroupCli::Pack(args) => {
            let request = PackRequest {
                root: args.root.clone(),
                output: args.output.clone(),
            };
            core_call(group, || pack_directory(ctx, &request))
        }
        CommandGroupCli::Unpack(args) => {
            let request = UnpackRequest {
                archive: args.archive.clone(),
                dest: args.dest.clone(),
            };
            core_call(group, || unpack_archive(ctx, &request))
        }
        CommandGroupCli::IsolatedRun(args) => {
            let request = IsolatedRunRequest {
                request: args.request.clone(),
            };
            core_call(group, || isolated_run(ctx, &request))
        }
    }
}

fn core_call<F>(group: &CommandGroupCli, action: F) -> ExecutionOutcome
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    match action() {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(command = command_name(group), error = ?err, "command failed");
            outcome_for_error(&err)
        }
    }
}
