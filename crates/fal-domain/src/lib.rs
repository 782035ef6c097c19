#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod backend;
pub mod environment;
pub mod flatten;
pub mod request;

pub use backend::{
    BackendKind, Environment, LocalEnvironment, RemoteCredentials, RemoteEnvironment, RemoteHost,
};
pub use environment::{EnvironmentLayer, LayerConfiguration, LayerKind, LayerStack};
pub use flatten::{
    flatten, CondaDependency, FlatEnvironmentSpec, UnsupportedEnvironmentKind, CONDA_CHANNELS,
    CONDA_ENV_NAME,
};
pub use request::{
    AdapterConfig, AdapterResponse, Credentials, ExecutionRequest, MacroManifest, Manifest,
    SCRIPTS_PATH_VAR,
};
