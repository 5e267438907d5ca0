/// Boomi Workflow Client
///
/// Posts the `add` payload to a Boomi web service listener with HTTP Basic
/// authentication and classifies the outcome. The transport is a trait so
/// that the classification can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::core::config::BoomiConfig;

/// Upper bound on the whole Boomi round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How many characters of a failed response body are echoed back.
const HTTP_ERROR_BODY_CHARS: usize = 100;

/// Request body expected by the Boomi process; both operands as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddPayload {
    pub a: String,
    pub b: String,
}

impl AddPayload {
    pub fn new(a: i64, b: i64) -> Self {
        Self {
            a: a.to_string(),
            b: b.to_string(),
        }
    }
}

/// Raw HTTP outcome before classification.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub status: u16,
    pub body: String,
}

/// Why the remote computation could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP {status}: {snippet}")]
    Http { status: u16, snippet: String },
    #[error("Failed to parse Boomi response: {0}")]
    Decode(String),
}

impl WorkflowError {
    /// Value of the response `status` field for this failure.
    pub fn status(&self) -> &'static str {
        match self {
            WorkflowError::Transport(_) => "request_error",
            WorkflowError::Http { .. } => "http_error",
            WorkflowError::Decode(_) => "json_parse_error",
        }
    }
}

/// Successful Boomi execution. Fields the process did not return are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowReply {
    pub result: Option<i128>,
    pub atom_name: Option<Value>,
    pub execution_id: Option<Value>,
}

#[async_trait]
pub trait WorkflowTransport: Send + Sync {
    /// POST the payload; only transport-level failures are errors here.
    async fn post(&self, payload: &AddPayload) -> Result<RawReply, WorkflowError>;
}

/// Classify a raw reply: non-200 first, then JSON shape.
pub fn interpret(reply: RawReply) -> Result<WorkflowReply, WorkflowError> {
    if reply.status != 200 {
        return Err(WorkflowError::Http {
            status: reply.status,
            snippet: reply.body.chars().take(HTTP_ERROR_BODY_CHARS).collect(),
        });
    }

    let parsed: Value =
        serde_json::from_str(&reply.body).map_err(|e| WorkflowError::Decode(e.to_string()))?;
    let object = parsed
        .as_object()
        .ok_or_else(|| WorkflowError::Decode(format!("expected a JSON object, got {}", parsed)))?;

    Ok(WorkflowReply {
        result: parse_result(object)?,
        atom_name: object.get("atom_name").cloned(),
        execution_id: object.get("execution_id").cloned(),
    })
}

/// `result` may be a JSON integer, a float with no fractional part, or a
/// decimal integer string.
fn parse_result(object: &Map<String, Value>) -> Result<Option<i128>, WorkflowError> {
    let Some(value) = object.get("result") else {
        return Ok(None);
    };

    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i128)
            }),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    };

    parsed
        .map(Some)
        .ok_or_else(|| WorkflowError::Decode(format!("invalid integer result: {}", value)))
}

/// reqwest-backed transport with basic auth and the fixed timeout.
pub struct BoomiClient {
    http: Client,
    endpoint: String,
    username: String,
    token: Option<String>,
}

impl BoomiClient {
    pub fn new(config: &BoomiConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("gcp-boomi-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl WorkflowTransport for BoomiClient {
    async fn post(&self, payload: &AddPayload) -> Result<RawReply, WorkflowError> {
        debug!("Making request to Boomi with payload: {:?}", payload);

        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, self.token.as_deref())
            .json(payload)
            .send()
            .await
            .map_err(|e| WorkflowError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| WorkflowError::Transport(e.to_string()))?;

        Ok(RawReply { status, body })
    }
}
