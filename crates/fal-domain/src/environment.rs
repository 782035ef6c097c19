use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a single environment layer.
///
/// Unknown kinds deserialize into [`LayerKind::Unsupported`] instead of
/// failing, so the flattener can reject them with a typed error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayerKind {
    Virtualenv,
    Conda,
    Unsupported(String),
}

impl LayerKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Virtualenv => "virtualenv",
            Self::Conda => "conda",
            Self::Unsupported(raw) => raw.as_str(),
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl From<String> for LayerKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "virtualenv" => Self::Virtualenv,
            "conda" => Self::Conda,
            _ => Self::Unsupported(value),
        }
    }
}

impl From<&str> for LayerKind {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<LayerKind> for String {
    fn from(value: LayerKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific settings of a layer.
///
/// `None` and `Some(vec![])` are kept apart on the wire; the flattener treats
/// both as "nothing declared".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,
}

impl LayerConfiguration {
    /// Requirements declared by this layer, empty when absent.
    #[must_use]
    pub fn declared_requirements(&self) -> &[String] {
        self.requirements.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn declared_packages(&self) -> &[String] {
        self.packages.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentLayer {
    pub kind: LayerKind,
    #[serde(default)]
    pub configuration: LayerConfiguration,
}

impl EnvironmentLayer {
    #[must_use]
    pub fn virtualenv(requirements: Vec<String>) -> Self {
        Self {
            kind: LayerKind::Virtualenv,
            configuration: LayerConfiguration {
                requirements: Some(requirements),
                packages: None,
            },
        }
    }

    #[must_use]
    pub fn conda(packages: Vec<String>, requirements: Option<Vec<String>>) -> Self {
        Self {
            kind: LayerKind::Conda,
            configuration: LayerConfiguration {
                requirements,
                packages: Some(packages),
            },
        }
    }
}

/// Ordered stack of layers; later layers add to earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerStack {
    layers: Vec<EnvironmentLayer>,
}

impl LayerStack {
    #[must_use]
    pub fn new(layers: Vec<EnvironmentLayer>) -> Self {
        Self { layers }
    }

    /// Returns a new stack with `extra` appended; `self` is left untouched.
    #[must_use]
    pub fn with_layer(&self, extra: EnvironmentLayer) -> Self {
        self.with_layers(std::iter::once(extra))
    }

    #[must_use]
    pub fn with_layers(&self, extra: impl IntoIterator<Item = EnvironmentLayer>) -> Self {
        let mut layers = self.layers.clone();
        layers.extend(extra);
        Self { layers }
    }

    #[must_use]
    pub fn layers(&self) -> &[EnvironmentLayer] {
        &self.layers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl FromIterator<EnvironmentLayer> for LayerStack {
    fn from_iter<T: IntoIterator<Item = EnvironmentLayer>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
