use crate::config::DependencyConfig;

/// Adapter type used by dbt-fal itself; it has no `dbt-fal` plugin package.
const FAL_ADAPTER: &str = "fal";

/// Packages an isolated environment needs before user requirements apply.
#[must_use]
pub fn default_pip_dependencies(
    adapter_type: &str,
    is_remote: bool,
    config: &DependencyConfig,
) -> Vec<String> {
    let mut deps = vec![pinned("dbt-core", config.dbt_version.as_deref())];
    if !adapter_type.is_empty() && adapter_type != FAL_ADAPTER {
        deps.push(format!("dbt-{adapter_type}"));
    }
    if is_remote {
        deps.push(pinned("dbt-fal", config.fal_version.as_deref()));
    }
    deps
}

fn pinned(name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{name}=={version}"),
        None => name.to_string(),
    }
}
