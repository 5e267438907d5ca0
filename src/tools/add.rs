/// Add Tool Implementation
///
/// Adds two integers through a Boomi process. The local sum is computed
/// before any remote interaction and is returned whenever the remote call
/// fails; on success the Boomi `result` is reported along with the runtime
/// and execution identifiers.

use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::clients::boomi::{interpret, AddPayload, WorkflowError, WorkflowReply, WorkflowTransport};
use crate::core::server::{parse_arguments, tool_output, MCPTool, ToolRegistry};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

/// Result of one `add` call. The sum is widened so that it is exact for
/// every pair of 64-bit operands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AddOutcome {
    /// Boomi answered.
    Remote {
        sum: i128,
        runtime_name: Value,
        execution_id: Value,
        status: &'static str,
    },
    /// Boomi could not be used; `sum` is the local result.
    Fallback {
        sum: i128,
        status: &'static str,
        error: String,
    },
}

impl AddOutcome {
    pub fn sum(&self) -> i128 {
        match self {
            AddOutcome::Remote { sum, .. } | AddOutcome::Fallback { sum, .. } => *sum,
        }
    }
}

/// Handler for the `add` tool.
pub struct AddTool {
    transport: Arc<dyn WorkflowTransport>,
}

impl AddTool {
    pub fn new(transport: Arc<dyn WorkflowTransport>) -> Self {
        Self { transport }
    }

    /// One POST to Boomi, classified into a reply or the failure kind.
    async fn attempt(&self, a: i64, b: i64) -> Result<WorkflowReply, WorkflowError> {
        let reply = self.transport.post(&AddPayload::new(a, b)).await?;
        info!("Boomi response status: {}", reply.status);
        interpret(reply)
    }

    /// Add `a` and `b`. Every remote outcome maps to a well-formed result.
    pub async fn add(&self, a: i64, b: i64) -> AddOutcome {
        info!("Add tool called with a={}, b={}", a, b);

        let local_result = i128::from(a) + i128::from(b);

        match self.attempt(a, b).await {
            Ok(reply) => {
                let sum = reply.result.unwrap_or(local_result);
                if sum != local_result {
                    warn!("Boomi returned {} but {} + {} = {}", sum, a, b, local_result);
                }
                AddOutcome::Remote {
                    sum,
                    runtime_name: reply.atom_name.unwrap_or_else(|| Value::from(UNKNOWN)),
                    execution_id: reply.execution_id.unwrap_or_else(|| Value::from(UNKNOWN)),
                    status: "success",
                }
            }
            Err(e) => {
                match &e {
                    WorkflowError::Transport(msg) => warn!("Request error: {}", msg),
                    WorkflowError::Http { .. } => warn!("Boomi rejected request: {}", e),
                    WorkflowError::Decode(msg) => warn!("Error parsing JSON: {}", msg),
                }
                AddOutcome::Fallback {
                    sum: local_result,
                    status: e.status(),
                    error: e.to_string(),
                }
            }
        }
    }
}

async fn call_add(tool: Arc<AddTool>, args: Value) -> Result<Box<RawValue>, String> {
    let AddArgs { a, b } = parse_arguments(args)?;
    tool_output(&tool.add(a, b).await)
}

/// Register the add tool.
pub fn register(registry: &mut ToolRegistry, tool: Arc<AddTool>) {
    registry.register(
        MCPTool {
            name: "add".to_string(),
            description: "Add two numbers using Boomi integration".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "a": { "type": "integer", "description": "First addend" },
                    "b": { "type": "integer", "description": "Second addend" }
                },
                "required": ["a", "b"]
            }),
        },
        Box::new(move |args| call_add(tool.clone(), args).boxed()),
    );
}
