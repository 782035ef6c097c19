//! Bridge from layered isolate environments to koldstart, which accepts
//! exactly one flat environment per function.
//!
//! Virtualenv stacks merge every layer's requirements into one list. Conda
//! stacks become a single env definition where each layer's pip
//! requirements stay a separate `{"pip": [...]}` entry.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use fal_domain::{
    flatten, AdapterResponse, ExecutionRequest, FlatEnvironmentSpec, LayerStack,
    RemoteEnvironment, RemoteHost,
};

use super::effects::{EnvironmentKey, KoldstartClient};
use super::isolate::{authorized, build_http_client, checked, RunReply};

/// Koldstart has no separate provisioning call; the key only identifies the
/// stack in logs.
pub(crate) fn environment_key(layers: &LayerStack) -> Result<EnvironmentKey> {
    let canonical = serde_json::to_vec(layers)?;
    Ok(EnvironmentKey(hex::encode(Sha256::digest(&canonical))))
}

/// A remote function bound to its environment, machine, and payload.
pub struct IsolatedFunction<'a> {
    client: &'a dyn KoldstartClient,
    host: &'a RemoteHost,
    definition: FlatEnvironmentSpec,
    machine_type: Option<&'a str>,
    payload: ExecutionRequest,
}

impl<'a> IsolatedFunction<'a> {
    pub fn new(
        client: &'a dyn KoldstartClient,
        host: &'a RemoteHost,
        definition: FlatEnvironmentSpec,
        machine_type: Option<&'a str>,
        payload: ExecutionRequest,
    ) -> Self {
        Self {
            client,
            host,
            definition,
            machine_type,
            payload,
        }
    }

    #[must_use]
    pub fn definition(&self) -> &FlatEnvironmentSpec {
        &self.definition
    }

    pub fn call(self) -> Result<AdapterResponse> {
        self.client.run_isolated(
            self.host,
            &self.definition,
            self.machine_type,
            &self.payload,
        )
    }
}

/// Flattens `layers` for `environment` and runs `payload` on koldstart.
///
/// # Errors
/// Propagates [`fal_domain::UnsupportedEnvironmentKind`] for targets other
/// than virtualenv or conda, and any failure reported by the service.
pub fn run_in_koldstart(
    client: &dyn KoldstartClient,
    environment: &RemoteEnvironment,
    layers: &LayerStack,
    payload: ExecutionRequest,
) -> Result<AdapterResponse> {
    let definition = flatten(&environment.target_kind, layers.layers())?;
    info!(
        environment = %environment.name,
        kind = %definition.kind(),
        machine_type = environment.machine_type.as_deref().unwrap_or("default"),
        "running model on koldstart"
    );
    let function = IsolatedFunction::new(
        client,
        &environment.host,
        definition,
        environment.machine_type.as_deref(),
        payload,
    );
    function.call()
}

#[derive(Serialize)]
struct RunFunction<'a> {
    definition: &'a FlatEnvironmentSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    machine_type: Option<&'a str>,
    payload: &'a ExecutionRequest,
}

pub struct HttpKoldstartClient {
    client: Client,
}

impl HttpKoldstartClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }
}

impl KoldstartClient for HttpKoldstartClient {
    fn run_isolated(
        &self,
        host: &RemoteHost,
        definition: &FlatEnvironmentSpec,
        machine_type: Option<&str>,
        payload: &ExecutionRequest,
    ) -> Result<AdapterResponse> {
        let url = host.endpoint("functions/run");
        debug!(%url, "submitting isolated function");
        let response = authorized(self.client.post(&url), host)
            .json(&RunFunction {
                definition,
                machine_type,
                payload,
            })
            .send()
            .with_context(|| format!("failed to reach koldstart at {url}"))?;
        checked(response, "koldstart run")?
            .json::<RunReply>()
            .context("invalid koldstart reply")?
            .into_response("koldstart")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fal_domain::{
        EnvironmentLayer, LayerKind, MacroManifest, Manifest, UnsupportedEnvironmentKind,
    };
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;
    use std::panic;
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct RecordingKoldstart {
        seen: Mutex<Vec<(FlatEnvironmentSpec, Option<String>)>>,
    }

    impl KoldstartClient for RecordingKoldstart {
        fn run_isolated(
            &self,
            _host: &RemoteHost,
            definition: &FlatEnvironmentSpec,
            machine_type: Option<&str>,
            _payload: &ExecutionRequest,
        ) -> Result<AdapterResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((definition.clone(), machine_type.map(ToOwned::to_owned)));
            Ok(AdapterResponse(json!("ok")))
        }
    }

    fn payload() -> ExecutionRequest {
        let config = serde_json::from_value(json!({
            "profile_name": "p",
            "target_name": "t",
            "project_root": "/project",
            "credentials": {"type": "snowflake"},
        }))
        .unwrap();
        ExecutionRequest::new("", config, Manifest::default(), MacroManifest::default(), None)
    }

    fn environment(kind: &str, host: &str) -> RemoteEnvironment {
        RemoteEnvironment {
            name: "ml".into(),
            host: RemoteHost {
                url: Url::parse(host).unwrap(),
                credentials: None,
            },
            target_kind: LayerKind::from(kind),
            layers: LayerStack::default(),
            machine_type: Some("GPU".into()),
        }
    }

    #[test]
    fn conda_stack_is_flattened_before_the_call() {
        let client = RecordingKoldstart::default();
        let env = environment("conda", "https://koldstart.example.com");
        let layers = LayerStack::new(vec![
            EnvironmentLayer::conda(vec!["python=3.9".into()], Some(vec!["scikit-learn".into()])),
            EnvironmentLayer::virtualenv(vec!["dbt-core".into(), "dbt-snowflake".into()]),
        ]);
        let response = run_in_koldstart(&client, &env, &layers, payload()).expect("run");
        assert_eq!(response, AdapterResponse(json!("ok")));

        let seen = client.seen.lock().unwrap();
        let (definition, machine) = &seen[0];
        assert_eq!(machine.as_deref(), Some("GPU"));
        assert_eq!(
            serde_json::to_value(definition).unwrap()["dependencies"],
            json!([
                "python=3.9",
                {"pip": ["scikit-learn"]},
                {"pip": ["dbt-core", "dbt-snowflake"]},
            ])
        );
    }

    #[test]
    fn unsupported_target_never_reaches_the_service() {
        let client = RecordingKoldstart::default();
        let env = environment("pyenv", "https://koldstart.example.com");
        let err = run_in_koldstart(&client, &env, &LayerStack::default(), payload())
            .expect_err("unsupported");
        assert!(err.downcast_ref::<UnsupportedEnvironmentKind>().is_some());
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn environment_key_is_stable_per_stack() {
        let a = LayerStack::new(vec![EnvironmentLayer::virtualenv(vec!["pandas".into()])]);
        let b = a.with_layer(EnvironmentLayer::virtualenv(vec!["numpy".into()]));
        assert_eq!(environment_key(&a).unwrap(), environment_key(&a.clone()).unwrap());
        assert_ne!(environment_key(&a).unwrap(), environment_key(&b).unwrap());
    }

    #[test]
    fn http_client_posts_definition_and_payload() -> Result<()> {
        let server = match panic::catch_unwind(Server::run) {
            Ok(server) => server,
            Err(_) => {
                eprintln!("skipping koldstart http test (httptest server unavailable)");
                return Ok(());
            }
        };
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/functions/run"),
                request::body(json_decoded(|body: &serde_json::Value| {
                    body["definition"] == json!({"kind": "virtualenv", "requirements": ["pandas"]})
                        && body["machine_type"] == json!("GPU")
                        && body["payload"]["config"]["profile_name"] == json!("p")
                })),
            ])
            .respond_with(json_encoded(json!({"result": [1, 2, 3]}))),
        );
        let client = HttpKoldstartClient::new(Duration::from_secs(5))?;
        let env = environment("virtualenv", &server.url_str("/"));
        let layers = LayerStack::new(vec![EnvironmentLayer::virtualenv(vec!["pandas".into()])]);
        let response = run_in_koldstart(&client, &env, &layers, payload())?;
        assert_eq!(response, AdapterResponse(json!([1, 2, 3])));
        Ok(())
    }
}
