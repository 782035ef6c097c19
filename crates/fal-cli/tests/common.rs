#![allow(dead_code)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;

pub const SUPPORT_MODULE: &str = r#"def reconstruct_adapter(config, manifest, macro_manifest):
    return {"profile": config["profile_name"], "target": config["target_name"]}

def prepare_for_adapter(adapter, fn):
    return lambda *args, **kwargs: fn(adapter, *args, **kwargs)

def read_relation_as_df(adapter, name):
    return {"relation": name, "profile": adapter["profile"]}

def write_df_to_relation(adapter, df, name):
    return len(df)
"#;

/// `fal` with its cache pointed inside `scratch`.
pub fn fal(scratch: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("fal");
    cmd.env("FAL_ENV_CACHE", scratch.join("envs"))
        .env_remove("FAL_KEY_ID")
        .env_remove("FAL_KEY_SECRET")
        .env("NO_COLOR", "1");
    cmd
}

pub fn find_python() -> Option<String> {
    for candidate in ["python3", "python"] {
        let found = std::process::Command::new(candidate)
            .args(["-c", "import sys; print(sys.executable)"])
            .output();
        if let Ok(output) = found {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }
    None
}

pub fn parse_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("json envelope")
}
