//! Merge a stack of environment layers into the single environment a
//! one-environment backend accepts.

use serde::{Deserialize, Serialize};

use crate::environment::{EnvironmentLayer, LayerKind};

pub const CONDA_ENV_NAME: &str = "dbt_fal_env";
pub const CONDA_CHANNELS: [&str; 2] = ["conda-forge", "defaults"];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Environment type not supported: {kind}")]
pub struct UnsupportedEnvironmentKind {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CondaDependency {
    Package(String),
    Pip { pip: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FlatEnvironmentSpec {
    Virtualenv {
        requirements: Vec<String>,
    },
    Conda {
        name: String,
        channels: Vec<String>,
        dependencies: Vec<CondaDependency>,
    },
}

impl FlatEnvironmentSpec {
    #[must_use]
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Virtualenv { .. } => LayerKind::Virtualenv,
            Self::Conda { .. } => LayerKind::Conda,
        }
    }
}

/// Flattens `layers` into one environment of kind `target`.
///
/// Layers are read by field: `requirements` feed the virtualenv list or one
/// `{"pip": [...]}` entry per conda layer, `packages` feed conda
/// dependencies. Duplicates are kept and order is preserved.
///
/// # Errors
/// Returns [`UnsupportedEnvironmentKind`] when the target or any layer has a
/// kind other than `virtualenv` or `conda`.
pub fn flatten(
    target: &LayerKind,
    layers: &[EnvironmentLayer],
) -> Result<FlatEnvironmentSpec, UnsupportedEnvironmentKind> {
    if let Some(layer) = layers.iter().find(|layer| !layer.kind.is_supported()) {
        return Err(UnsupportedEnvironmentKind {
            kind: layer.kind.to_string(),
        });
    }
    match target {
        LayerKind::Virtualenv => Ok(flatten_virtualenv(layers)),
        LayerKind::Conda => Ok(flatten_conda(layers)),
        LayerKind::Unsupported(kind) => Err(UnsupportedEnvironmentKind { kind: kind.clone() }),
    }
}

fn flatten_virtualenv(layers: &[EnvironmentLayer]) -> FlatEnvironmentSpec {
    let requirements = layers
        .iter()
        .flat_map(|layer| layer.configuration.declared_requirements())
        .cloned()
        .collect();
    FlatEnvironmentSpec::Virtualenv { requirements }
}

fn flatten_conda(layers: &[EnvironmentLayer]) -> FlatEnvironmentSpec {
    let mut dependencies = Vec::new();
    for layer in layers {
        dependencies.extend(
            layer
                .configuration
                .declared_packages()
                .iter()
                .cloned()
                .map(CondaDependency::Package),
        );
        let requirements = layer.configuration.declared_requirements();
        if !requirements.is_empty() {
            dependencies.push(CondaDependency::Pip {
                pip: requirements.to_vec(),
            });
        }
    }
    FlatEnvironmentSpec::Conda {
        name: CONDA_ENV_NAME.to_string(),
        channels: CONDA_CHANNELS.iter().map(ToString::to_string).collect(),
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LayerConfiguration;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn virtualenv_layers_concatenate_with_duplicates() {
        let layers = vec![
            EnvironmentLayer::virtualenv(strings(&["pandas"])),
            EnvironmentLayer::virtualenv(strings(&["numpy", "pandas"])),
        ];
        let flat = flatten(&LayerKind::Virtualenv, &layers).expect("flatten");
        assert_eq!(
            flat,
            FlatEnvironmentSpec::Virtualenv {
                requirements: strings(&["pandas", "numpy", "pandas"]),
            }
        );
    }

    #[test]
    fn conda_layers_get_one_pip_entry_per_declaring_layer() {
        let layers = vec![
            EnvironmentLayer::conda(strings(&["python=3.9"]), Some(strings(&["scikit-learn"]))),
            EnvironmentLayer::conda(strings(&["numpy"]), None),
        ];
        let flat = flatten(&LayerKind::Conda, &layers).expect("flatten");
        assert_eq!(
            serde_json::to_value(&flat).unwrap(),
            json!({
                "kind": "conda",
                "name": "dbt_fal_env",
                "channels": ["conda-forge", "defaults"],
                "dependencies": ["python=3.9", {"pip": ["scikit-learn"]}, "numpy"],
            })
        );
    }

    #[test]
    fn conda_pip_entries_are_never_merged() {
        let layers = vec![
            EnvironmentLayer::conda(strings(&["python=3.10"]), Some(strings(&["pandas"]))),
            EnvironmentLayer::virtualenv(strings(&["dbt-core", "dbt-postgres"])),
            EnvironmentLayer::conda(Vec::new(), Some(Vec::new())),
        ];
        let FlatEnvironmentSpec::Conda { dependencies, .. } =
            flatten(&LayerKind::Conda, &layers).expect("flatten")
        else {
            panic!("expected conda spec");
        };
        let pip_entries = dependencies
            .iter()
            .filter(|dep| matches!(dep, CondaDependency::Pip { .. }))
            .count();
        assert_eq!(pip_entries, 2, "empty requirements must not add an entry");
        assert_eq!(
            dependencies.last(),
            Some(&CondaDependency::Pip {
                pip: strings(&["dbt-core", "dbt-postgres"])
            })
        );
    }

    #[test]
    fn empty_stack_still_yields_conda_skeleton() {
        let flat = flatten(&LayerKind::Conda, &[]).expect("flatten");
        assert_eq!(
            flat,
            FlatEnvironmentSpec::Conda {
                name: CONDA_ENV_NAME.into(),
                channels: strings(&CONDA_CHANNELS),
                dependencies: Vec::new(),
            }
        );
    }

    #[test]
    fn unsupported_layer_fails_for_every_target() {
        let layers = vec![
            EnvironmentLayer::virtualenv(strings(&["pandas"])),
            EnvironmentLayer {
                kind: LayerKind::from("docker"),
                configuration: LayerConfiguration::default(),
            },
        ];
        for target in [LayerKind::Virtualenv, LayerKind::Conda] {
            let err = flatten(&target, &layers).expect_err("docker layers are rejected");
            assert_eq!(err.kind, "docker");
        }
    }

    #[test]
    fn unsupported_target_fails_even_without_layers() {
        let err = flatten(&LayerKind::from("pyenv"), &[]).expect_err("unsupported target");
        assert_eq!(err.to_string(), "Environment type not supported: pyenv");
    }

    #[test]
    fn virtualenv_target_ignores_conda_packages() {
        let layers = vec![EnvironmentLayer::conda(
            strings(&["python=3.9"]),
            Some(strings(&["requests"])),
        )];
        let flat = flatten(&LayerKind::Virtualenv, &layers).expect("flatten");
        assert_eq!(
            serde_json::to_value(flat).unwrap(),
            json!({"kind": "virtualenv", "requirements": ["requests"]})
        );
    }
}
