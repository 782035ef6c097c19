use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use fal_domain::{AdapterResponse, ExecutionRequest, LayerKind, LayerStack, RemoteHost};

use super::effects::{Connection, EnvironmentKey, IsolateClient};

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(format!("fal/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

pub(crate) fn authorized(builder: RequestBuilder, host: &RemoteHost) -> RequestBuilder {
    match &host.credentials {
        Some(creds) => builder.header(reqwest::header::AUTHORIZATION, creds.authorization()),
        None => builder,
    }
}

/// Reply shape shared by every run endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct RunReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RunReply {
    pub(crate) fn into_response(self, service: &str) -> Result<AdapterResponse> {
        if let Some(error) = self.error {
            bail!("{service} run failed: {error}");
        }
        Ok(AdapterResponse(self.result.unwrap_or(Value::Null)))
    }
}

pub(crate) fn checked(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(anyhow!("{what} failed with HTTP {status}: {}", body.trim()))
}

#[derive(Serialize)]
struct CreateEnvironment<'a> {
    kind: &'a LayerKind,
    layers: &'a LayerStack,
}

#[derive(Deserialize)]
struct CreatedEnvironment {
    key: String,
}

#[derive(Deserialize)]
struct OpenedConnection {
    connection_id: String,
}

/// JSON-over-HTTP client for an isolate server.
pub struct HttpIsolateClient {
    client: Client,
}

impl HttpIsolateClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }
}

impl IsolateClient for HttpIsolateClient {
    fn create_environment(
        &self,
        host: &RemoteHost,
        target: &LayerKind,
        layers: &LayerStack,
    ) -> Result<EnvironmentKey> {
        let url = host.endpoint("environments");
        debug!(%url, kind = %target, layers = layers.len(), "creating remote environment");
        let request = authorized(self.client.post(&url), host).json(&CreateEnvironment {
            kind: target,
            layers,
        });
        let response = request
            .send()
            .with_context(|| format!("failed to reach isolate server at {url}"))?;
        let created: CreatedEnvironment = checked(response, "environment creation")?
            .json()
            .context("invalid environment creation reply")?;
        Ok(EnvironmentKey(created.key))
    }

    fn open_connection(
        &self,
        host: &RemoteHost,
        key: &EnvironmentKey,
    ) -> Result<Box<dyn Connection>> {
        let url = host.endpoint(&format!("environments/{}/connections", key.0));
        let response = authorized(self.client.post(&url), host)
            .send()
            .with_context(|| format!("failed to reach isolate server at {url}"))?;
        let opened: OpenedConnection = checked(response, "opening connection")?
            .json()
            .context("invalid connection reply")?;
        debug!(connection = %opened.connection_id, "opened isolate connection");
        Ok(Box::new(HttpConnection {
            client: self.client.clone(),
            host: host.clone(),
            id: opened.connection_id,
        }))
    }
}

struct HttpConnection {
    client: Client,
    host: RemoteHost,
    id: String,
}

impl Connection for HttpConnection {
    fn run(&mut self, request: &ExecutionRequest) -> Result<AdapterResponse> {
        let url = self.host.endpoint(&format!("connections/{}/run", self.id));
        let response = authorized(self.client.post(&url), &self.host)
            .json(request)
            .send()
            .with_context(|| format!("failed to reach isolate server at {url}"))?;
        checked(response, "isolated run")?
            .json::<RunReply>()
            .context("invalid run reply")?
            .into_response("isolate server")
    }

    fn close(&mut self) -> Result<()> {
        let url = self.host.endpoint(&format!("connections/{}", self.id));
        let response = authorized(self.client.delete(&url), &self.host)
            .send()
            .with_context(|| format!("failed to reach isolate server at {url}"))?;
        checked(response, "closing connection")?;
        Ok(())
    }
}

/// Connection scoped to one submission.
///
/// Call [`ConnectionSession::close`] once the run succeeded so a failed close
/// is reported; a session dropped without it closes on a best-effort basis.
pub struct ConnectionSession {
    connection: Option<Box<dyn Connection>>,
}

impl ConnectionSession {
    pub fn open(
        client: &dyn IsolateClient,
        host: &RemoteHost,
        key: &EnvironmentKey,
    ) -> Result<Self> {
        Ok(Self {
            connection: Some(client.open_connection(host, key)?),
        })
    }

    pub fn run(&mut self, request: &ExecutionRequest) -> Result<AdapterResponse> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow!("connection already closed"))?;
        connection.run(request)
    }

    /// Closes the connection and surfaces any failure to do so.
    pub fn close(mut self) -> Result<()> {
        match self.connection.take() {
            Some(mut connection) => connection.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.close() {
                warn!(error = %err, "failed to close isolate connection");
            }
        }
    }
}
