//! Project-level environment definitions.

pub mod environments;

pub use environments::{
    EnvironmentDefinition, ProjectEnvironments, RemoteService, RemoteSettings, LOCAL_ENVIRONMENT,
    PROJECT_FILE,
};
