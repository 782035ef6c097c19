use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const SCRIPTS_PATH_VAR: &str = "fal-scripts-path";

/// Adapter reconstruction config; everything a fresh process needs to build
/// the database adapter again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub profile_name: String,
    pub target_name: String,
    pub project_root: PathBuf,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub cli_vars: BTreeMap<String, Value>,
    pub credentials: Credentials,
}

impl AdapterConfig {
    /// Directory holding the user's helper scripts.
    ///
    /// `cli_vars` win over project `vars`; with neither set the project root
    /// itself is used.
    #[must_use]
    pub fn scripts_path(&self) -> PathBuf {
        let relative = self
            .cli_vars
            .get(SCRIPTS_PATH_VAR)
            .or_else(|| self.vars.get(SCRIPTS_PATH_VAR))
            .and_then(Value::as_str)
            .unwrap_or_default();
        join_relative(&self.project_root, relative)
    }
}

fn join_relative(root: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "type")]
    pub adapter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials {
    #[must_use]
    pub fn is_bigquery_service_account(&self) -> bool {
        self.adapter_type == "bigquery" && self.method.as_deref() == Some("service-account")
    }
}

macro_rules! opaque_json {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Value);

        impl $name {
            #[must_use]
            pub fn fingerprint(&self) -> String {
                let mut hasher = Sha256::new();
                hasher.update(self.0.to_string().as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    };
}

opaque_json!(Manifest);
opaque_json!(MacroManifest);

/// Whatever the model's `main` returned; never inspected here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterResponse(pub Value);

/// Payload that crosses the isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    code: String,
    config: AdapterConfig,
    manifest: Manifest,
    macro_manifest: MacroManifest,
    #[serde(default, with = "archive_base64", skip_serializing_if = "Option::is_none")]
    local_packages: Option<Vec<u8>>,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        config: AdapterConfig,
        manifest: Manifest,
        macro_manifest: MacroManifest,
        local_packages: Option<Vec<u8>>,
    ) -> Self {
        Self {
            code: code.into(),
            config,
            manifest,
            macro_manifest,
            local_packages,
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[must_use]
    pub fn macro_manifest(&self) -> &MacroManifest {
        &self.macro_manifest
    }

    #[must_use]
    pub fn local_packages(&self) -> Option<&[u8]> {
        self.local_packages.as_deref()
    }
}

mod archive_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|raw| STANDARD.decode(raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn adapter_config(root: &Path, adapter_type: &str) -> AdapterConfig {
        AdapterConfig {
            profile_name: "jaffle_shop".into(),
            target_name: "dev".into(),
            project_root: root.to_path_buf(),
            vars: BTreeMap::new(),
            cli_vars: BTreeMap::new(),
            credentials: serde_json::from_value(json!({
                "type": adapter_type,
                "host": "localhost",
                "schema": "analytics",
            }))
            .expect("credentials"),
        }
    }
}
