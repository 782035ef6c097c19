#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

mod core;

pub(crate) use crate::core::config;
pub(crate) use crate::core::config::context;
pub(crate) use crate::core::runtime::effects;

pub use crate::core::config::context::CommandContext;
pub use crate::core::config::{Config, DependencyConfig, GlobalOptions, RemoteConfig, RuntimeConfig};
pub use crate::core::project::{
    EnvironmentDefinition, ProjectEnvironments, RemoteService, RemoteSettings, LOCAL_ENVIRONMENT,
    PROJECT_FILE,
};
pub use crate::core::runtime::archive::{pack, unpack};
pub use crate::core::runtime::commands::{
    flatten_environment, isolated_run, list_environments, pack_directory, run_model,
    unpack_archive, EnvironmentsRequest, FlattenRequest, IsolatedRunRequest, PackRequest,
    RunModelRequest, UnpackRequest,
};
pub use crate::core::runtime::deps::default_pip_dependencies;
pub use crate::core::runtime::dispatch::run_in_environment_with_adapter;
pub use crate::core::runtime::effects::{
    Connection, Effects, EnvironmentKey, EnvironmentProvisioner, IsolateClient, KoldstartClient,
    ProvisionedEnvironment, PythonRuntime, SharedEffects, SystemEffects,
};
pub use crate::core::runtime::isolate::{ConnectionSession, HttpIsolateClient};
pub use crate::core::runtime::koldstart::{run_in_koldstart, HttpKoldstartClient, IsolatedFunction};
pub use crate::core::runtime::process::RunOutput;
pub use crate::core::runtime::runner::{
    rehydrate, run_isolated, run_with_adapter, AdapterHandle, ModelInvocation,
};
pub use crate::core::tooling::errors::{
    is_configuration_error, outcome_for_error, ConfigurationError, DestinationExistsError,
};
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};
