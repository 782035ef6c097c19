use std::fs;

use fal_domain::{AdapterConfig, ExecutionRequest, MacroManifest, Manifest};
use serde_json::json;

mod common;

use common::{fal, find_python, parse_json, SUPPORT_MODULE};

const MODEL: &str = r#"from helpers import shout

def main(read_df, write_df):
    df = read_df("orders")
    return {"read": df, "written": write_df([1, 2], "out"), "shout": shout("hi")}
"#;

fn adapter_config(root: &std::path::Path) -> AdapterConfig {
    serde_json::from_value(json!({
        "profile_name": "jaffle_shop",
        "target_name": "dev",
        "project_root": root,
        "credentials": {"type": "postgres"},
    }))
    .expect("config")
}

#[test]
fn run_in_process_uses_project_scripts() {
    let Some(python) = find_python() else {
        eprintln!("skipping in-process run test (python not found)");
        return;
    };
    let temp = tempfile::tempdir().expect("tempdir");
    let project = temp.path().join("project");
    fs::create_dir_all(&project).expect("project");
    fs::write(project.join("fal_test_support.py"), SUPPORT_MODULE).expect("support");
    fs::write(project.join("helpers.py"), "def shout(s):\n    return s.upper()\n")
        .expect("helpers");
    let model = temp.path().join("model.py");
    fs::write(&model, MODEL).expect("model");
    let config = temp.path().join("config.json");
    fs::write(
        &config,
        serde_json::to_string(&adapter_config(&project)).expect("serialize"),
    )
    .expect("config");

    let assert = fal(temp.path())
        .env("FAL_RUNTIME_PYTHON", &python)
        .env("FAL_SUPPORT_MODULE", "fal_test_support")
        .args(["--json", "run"])
        .arg(&model)
        .arg("--config")
        .arg(&config)
        .assert()
        .success();
    let envelope = parse_json(&assert.get_output().stdout);
    assert_eq!(envelope["details"]["backend"], "in-process");
    assert_eq!(
        envelope["details"]["result"],
        json!({
            "read": {"relation": "orders", "profile": "jaffle_shop"},
            "written": 2,
            "shout": "HI",
        })
    );
}

#[test]
fn isolated_run_unpacks_shipped_scripts() {
    let Some(python) = find_python() else {
        eprintln!("skipping isolated run test (python not found)");
        return;
    };
    let temp = tempfile::tempdir().expect("tempdir");
    let local = temp.path().join("local_scripts");
    fs::create_dir_all(&local).expect("scripts");
    fs::write(local.join("fal_test_support.py"), SUPPORT_MODULE).expect("support");
    fs::write(local.join("helpers.py"), "def shout(s):\n    return s + '!'\n").expect("helpers");

    let remote_root = temp.path().join("remote");
    let request = ExecutionRequest::new(
        MODEL,
        adapter_config(&remote_root),
        Manifest::default(),
        MacroManifest::default(),
        Some(fal_core::pack(&local).expect("pack")),
    );
    let request_file = temp.path().join("request.json");
    fs::write(
        &request_file,
        serde_json::to_string(&request).expect("serialize"),
    )
    .expect("request");

    let assert = fal(temp.path())
        .env("FAL_RUNTIME_PYTHON", &python)
        .env("FAL_SUPPORT_MODULE", "fal_test_support")
        .args(["--json", "isolated-run", "--request"])
        .arg(&request_file)
        .assert()
        .success();
    let envelope = parse_json(&assert.get_output().stdout);
    assert_eq!(envelope["details"]["result"]["shout"], "hi!");
    assert!(remote_root.join("helpers.py").exists());

    fal(temp.path())
        .env("FAL_RUNTIME_PYTHON", &python)
        .args(["isolated-run", "--request"])
        .arg(&request_file)
        .assert()
        .code(2);
}

#[test]
fn bigquery_service_account_is_rejected_for_remote_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let project = temp.path().join("project");
    fs::create_dir_all(&project).expect("project");
    fs::write(
        project.join("fal_project.yml"),
        "remote:\n  host: http://127.0.0.1:9\nenvironments:\n  - name: ml\n    type: venv\n",
    )
    .expect("project file");
    let model = temp.path().join("model.py");
    fs::write(&model, MODEL).expect("model");
    let config = temp.path().join("config.json");
    fs::write(
        &config,
        json!({
            "profile_name": "jaffle_shop",
            "target_name": "dev",
            "project_root": project,
            "credentials": {"type": "bigquery", "method": "service-account"},
        })
        .to_string(),
    )
    .expect("config");

    let assert = fal(temp.path())
        .args(["--json", "run", "--environment", "ml", "--config"])
        .arg(&config)
        .arg(&model)
        .assert()
        .code(1);
    let envelope = parse_json(&assert.get_output().stdout);
    assert!(envelope["message"]
        .as_str()
        .expect("message")
        .contains("service-account-json"));
}
