use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failures surfaced by the backend command executor. The bridge neither
/// wraps nor retries these; callers see them verbatim.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("command {command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("malformed response for {command}: {message}")]
    MalformedResponse { command: String, message: String },
}

pub type ExecuteResult<T> = Result<T, ExecuteError>;

/// The backend process that performs privileged operations (starting and
/// stopping the proxy kernel, changing system network settings). Opaque to
/// the bridge; commands are addressed by name with a JSON argument map.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, args: Map<String, Value>) -> ExecuteResult<Value>;
}

/// Command transport against the backend sidecar's loopback HTTP endpoint.
///
/// Requests carry no transport timeout: a stuck command is expected to hold
/// the lifecycle guard until the backend answers (known limitation).
pub struct HttpCommandExecutor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCommandExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn for_port(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{port}"))
    }
}

#[async_trait]
impl CommandExecutor for HttpCommandExecutor {
    async fn execute(&self, command: &str, args: Map<String, Value>) -> ExecuteResult<Value> {
        let target = format!("{}/commands/{}", self.base_url, command);
        let response = self
            .client
            .post(&target)
            .json(&Value::Object(args))
            .send()
            .await
            .map_err(|err| ExecuteError::Unreachable(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ExecuteError::Unreachable(err.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ExecuteError::UnknownCommand(command.to_string()));
        }

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| {
                    body.get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("backend responded with status {status}"));
            return Err(ExecuteError::CommandFailed {
                command: command.to_string(),
                message,
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| ExecuteError::MalformedResponse {
            command: command.to_string(),
            message: err.to_string(),
        })
    }
}
