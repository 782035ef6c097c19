use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::environment::{EnvironmentLayer, LayerKind, LayerStack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    InProcess,
    LocalIsolated,
    IsolateServer,
    Koldstart,
}

impl BackendKind {
    #[must_use]
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::IsolateServer | Self::Koldstart)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::LocalIsolated => "local-isolated",
            Self::IsolateServer => "isolate-server",
            Self::Koldstart => "koldstart",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub key_id: String,
    pub key_secret: String,
}

impl RemoteCredentials {
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("Key {}:{}", self.key_id, self.key_secret)
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub url: Url,
    pub credentials: Option<RemoteCredentials>,
}

impl RemoteHost {
    /// Joins `path` under the host URL, keeping any base path the host has.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// An environment run by a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEnvironment {
    pub name: String,
    pub host: RemoteHost,
    pub target_kind: LayerKind,
    pub layers: LayerStack,
    pub machine_type: Option<String>,
}

/// An environment provisioned on this machine and run in a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEnvironment {
    pub name: String,
    pub layer: EnvironmentLayer,
}

/// Execution environment handle; the variant decides the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    InProcess,
    Local(LocalEnvironment),
    IsolateServer(RemoteEnvironment),
    Koldstart(RemoteEnvironment),
}

impl Environment {
    #[must_use]
    pub const fn backend_kind(&self) -> BackendKind {
        match self {
            Self::InProcess => BackendKind::InProcess,
            Self::Local(_) => BackendKind::LocalIsolated,
            Self::IsolateServer(_) => BackendKind::IsolateServer,
            Self::Koldstart(_) => BackendKind::Koldstart,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::InProcess => "local",
            Self::Local(local) => &local.name,
            Self::IsolateServer(remote) | Self::Koldstart(remote) => &remote.name,
        }
    }
}
