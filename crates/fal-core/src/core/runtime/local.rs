use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use fal_domain::{EnvironmentLayer, LayerKind, UnsupportedEnvironmentKind};

use super::effects::{EnvironmentProvisioner, ProvisionedEnvironment, PythonRuntime};

const MARKER_FILE: &str = ".fal-env.json";
const SITE_PACKAGES_SCRIPT: &str = "import sysconfig; print(sysconfig.get_paths()['purelib'])";

#[derive(Debug, Serialize, Deserialize)]
struct EnvMarker {
    kind: String,
    site_packages: PathBuf,
}

/// Builds virtualenv and conda environments under a cache root, one
/// directory per distinct layer.
pub struct SystemProvisioner {
    python: Arc<dyn PythonRuntime>,
    cache_root: PathBuf,
}

impl SystemProvisioner {
    pub fn new(python: Arc<dyn PythonRuntime>, cache_root: PathBuf) -> Self {
        Self { python, cache_root }
    }

    fn prefix_for(&self, layer: &EnvironmentLayer) -> Result<PathBuf> {
        let canonical = serde_json::to_vec(layer)?;
        let digest = hex::encode(Sha256::digest(&canonical));
        Ok(self
            .cache_root
            .join(format!("{}-{}", layer.kind, &digest[..16])))
    }

    fn run_checked(&self, program: &str, args: &[String], cwd: &Path) -> Result<String> {
        debug!(program, ?args, "provisioning step");
        let output = self.python.run_command(program, args, &[], cwd)?;
        if !output.success() {
            bail!(
                "`{program} {}` failed with exit code {}: {}",
                args.join(" "),
                output.code,
                output.stderr.trim()
            );
        }
        Ok(output.stdout)
    }

    fn pip_install(&self, python: &Path, requirements: &[String], cwd: &Path) -> Result<()> {
        if requirements.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--disable-pip-version-check".to_string(),
        ];
        args.extend(requirements.iter().cloned());
        self.run_checked(&path_str(python)?, &args, cwd)?;
        Ok(())
    }

    fn build_virtualenv(&self, layer: &EnvironmentLayer, prefix: &Path) -> Result<PathBuf> {
        let base = self.python.detect_interpreter()?;
        self.run_checked(
            &base,
            &["-m".to_string(), "venv".to_string(), path_str(prefix)?],
            &self.cache_root,
        )?;
        let python = venv_python(prefix);
        self.pip_install(
            &python,
            layer.configuration.declared_requirements(),
            &self.cache_root,
        )?;
        Ok(python)
    }

    fn build_conda(&self, layer: &EnvironmentLayer, prefix: &Path) -> Result<PathBuf> {
        let conda = which::which("conda")
            .or_else(|_| which::which("mamba"))
            .map_err(|_| anyhow!("conda environments need `conda` or `mamba` on PATH"))?;
        let mut args = vec![
            "create".to_string(),
            "--yes".to_string(),
            "--prefix".to_string(),
            path_str(prefix)?,
        ];
        for channel in fal_domain::CONDA_CHANNELS {
            args.push("--channel".to_string());
            args.push(channel.to_string());
        }
        let packages = layer.configuration.declared_packages();
        if packages.iter().any(|pkg| pkg.starts_with("python")) {
            args.extend(packages.iter().cloned());
        } else {
            args.push("python".to_string());
            args.extend(packages.iter().cloned());
        }
        self.run_checked(&path_str(&conda)?, &args, &self.cache_root)?;
        let python = conda_python(prefix);
        self.pip_install(
            &python,
            layer.configuration.declared_requirements(),
            &self.cache_root,
        )?;
        Ok(python)
    }
}

impl EnvironmentProvisioner for SystemProvisioner {
    fn create(&self, layer: &EnvironmentLayer) -> Result<ProvisionedEnvironment> {
        if let LayerKind::Unsupported(kind) = &layer.kind {
            return Err(UnsupportedEnvironmentKind { kind: kind.clone() }.into());
        }
        let prefix = self.prefix_for(layer)?;
        let marker_path = prefix.join(MARKER_FILE);
        if let Some(marker) = read_marker(&marker_path) {
            debug!(prefix = %prefix.display(), "reusing provisioned environment");
            let python = match layer.kind {
                LayerKind::Conda => conda_python(&prefix),
                _ => venv_python(&prefix),
            };
            return Ok(ProvisionedEnvironment {
                prefix,
                python,
                site_packages: marker.site_packages,
            });
        }
        if prefix.exists() {
            debug!(prefix = %prefix.display(), "removing incomplete environment");
            fs::remove_dir_all(&prefix)
                .with_context(|| format!("failed to clear {}", prefix.display()))?;
        }
        fs::create_dir_all(&self.cache_root)
            .with_context(|| format!("failed to create {}", self.cache_root.display()))?;

        info!(kind = %layer.kind, prefix = %prefix.display(), "provisioning environment");
        let python = match &layer.kind {
            LayerKind::Virtualenv => self.build_virtualenv(layer, &prefix)?,
            LayerKind::Conda => self.build_conda(layer, &prefix)?,
            LayerKind::Unsupported(kind) => {
                return Err(UnsupportedEnvironmentKind { kind: kind.clone() }.into())
            }
        };
        let site_packages = PathBuf::from(
            self.run_checked(
                &path_str(&python)?,
                &["-c".to_string(), SITE_PACKAGES_SCRIPT.to_string()],
                &self.cache_root,
            )?
            .trim(),
        );
        let marker = EnvMarker {
            kind: layer.kind.to_string(),
            site_packages: site_packages.clone(),
        };
        fs::write(&marker_path, serde_json::to_vec_pretty(&marker)?)
            .with_context(|| format!("failed to write {}", marker_path.display()))?;
        Ok(ProvisionedEnvironment {
            prefix,
            python,
            site_packages,
        })
    }
}

fn read_marker(path: &Path) -> Option<EnvMarker> {
    let contents = fs::read(path).ok()?;
    serde_json::from_slice(&contents).ok()
}

fn venv_python(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("Scripts").join("python.exe")
    } else {
        prefix.join("bin").join("python")
    }
}

fn conda_python(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("python.exe")
    } else {
        prefix.join("bin").join("python")
    }
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| anyhow!("non-utf8 path: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::process::RunOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPython {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl PythonRuntime for ScriptedPython {
        fn detect_interpreter(&self) -> Result<String> {
            Ok("/usr/bin/python3".into())
        }

        fn run_command(
            &self,
            python: &str,
            args: &[String],
            _env: &[(String, String)],
            _cwd: &Path,
        ) -> Result<RunOutput> {
            let mut call = vec![python.to_string()];
            call.extend(args.iter().cloned());
            self.calls.lock().unwrap().push(call);
            if args.get(1).map(String::as_str) == Some("venv") {
                fs::create_dir_all(Path::new(&args[2]).join("bin"))?;
            }
            let stdout = if args.first().map(String::as_str) == Some("-c") {
                "/envs/lib/python3.11/site-packages\n".to_string()
            } else {
                String::new()
            };
            Ok(RunOutput {
                code: 0,
                stdout,
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn virtualenv_is_built_then_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let python = Arc::new(ScriptedPython::default());
        let provisioner = SystemProvisioner::new(python.clone(), tmp.path().join("envs"));
        let layer = EnvironmentLayer::virtualenv(vec!["dbt-core".into(), "dbt-postgres".into()]);

        let first = provisioner.create(&layer).expect("create");
        assert_eq!(
            first.site_packages,
            PathBuf::from("/envs/lib/python3.11/site-packages")
        );
        assert!(first.prefix.join(MARKER_FILE).exists());
        let calls = python.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3, "venv, pip install, site-packages query");
        assert!(calls[1].ends_with(&["dbt-core".to_string(), "dbt-postgres".to_string()]));

        let second = provisioner.create(&layer).expect("reuse");
        assert_eq!(second, first);
        assert_eq!(python.calls.lock().unwrap().len(), 3, "no new commands");
    }

    #[test]
    fn distinct_layers_get_distinct_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        let provisioner =
            SystemProvisioner::new(Arc::new(ScriptedPython::default()), tmp.path().to_path_buf());
        let a = provisioner
            .prefix_for(&EnvironmentLayer::virtualenv(vec!["pandas".into()]))
            .unwrap();
        let b = provisioner
            .prefix_for(&EnvironmentLayer::virtualenv(vec!["numpy".into()]))
            .unwrap();
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("virtualenv-"));
    }

    #[test]
    fn unsupported_layers_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let provisioner =
            SystemProvisioner::new(Arc::new(ScriptedPython::default()), tmp.path().to_path_buf());
        let layer = EnvironmentLayer {
            kind: LayerKind::from("docker"),
            configuration: fal_domain::LayerConfiguration::default(),
        };
        let err = provisioner.create(&layer).expect_err("docker");
        assert!(err.downcast_ref::<UnsupportedEnvironmentKind>().is_some());
    }

    #[test]
    fn unsupported_layers_leave_the_cache_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let python = Arc::new(ScriptedPython::default());
        let cache = tmp.path().join("envs");
        let provisioner = SystemProvisioner::new(python.clone(), cache.clone());
        let layer = EnvironmentLayer {
            kind: LayerKind::from("docker"),
            configuration: fal_domain::LayerConfiguration::default(),
        };
        provisioner.create(&layer).expect_err("docker");
        assert!(!cache.exists(), "cache root must not be created");

        let stale = provisioner.prefix_for(&layer).unwrap();
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("keep.txt"), "keep").unwrap();
        provisioner.create(&layer).expect_err("docker");
        assert_eq!(fs::read_to_string(stale.join("keep.txt")).unwrap(), "keep");
        assert!(python.calls.lock().unwrap().is_empty());
    }
}
