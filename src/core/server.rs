/// MCP Server Implementation
///
/// This module contains the core MCP server implementation including:
/// - JSON-RPC 2.0 request/response structures
/// - Tool registry for managing available tools
/// - A transport-independent request dispatcher
/// - HTTP server setup with Actix Web
/// - STDIO server implementation for line-based communication

use actix_web::{
    web, App, HttpServer, HttpResponse, Result,
    middleware::{Compress, Logger, DefaultHeaders},
};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use crate::core::config::ServerConfig;

/// MCP protocol revision reported in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Application state shared across all worker threads in HTTP mode.
///
/// Contains the server metadata reported in MCP protocol responses.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server name as reported in MCP initialize responses
    pub server_name: String,
    /// Server version string as reported in MCP initialize responses
    pub server_version: String,
}

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// The jsonrpc field must be "2.0", id is optional (None for notifications),
/// method specifies the MCP method to call, and params contains
/// method-specific parameters.
#[derive(Deserialize, Debug)]
pub struct MCPRequest {
    /// JSON-RPC version identifier, must be "2.0"
    #[allow(dead_code)]
    jsonrpc: String,
    /// Request ID for correlating responses. None indicates a notification.
    id: Option<serde_json::Value>,
    /// MCP method name (e.g., "initialize", "tools/list", "tools/call")
    method: String,
    /// Method-specific parameters as JSON value
    params: Option<serde_json::Value>,
}

impl MCPRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Responses include jsonrpc "2.0", the request id, and either a result
/// or an error.
#[derive(Serialize, Debug)]
pub struct MCPResponse {
    jsonrpc: String,
    id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<MCPError>,
}

impl MCPResponse {
    fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Debug)]
pub struct MCPError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    code: i32,
    /// Human-readable error message
    message: String,
    /// Optional additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

/// JSON-RPC error codes used by the dispatcher.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

/// MCP tool definition structure.
///
/// Each tool has a unique name, description, and JSON schema defining
/// its input parameters. This structure is serialized when listing tools.
#[derive(Serialize, Debug, Clone)]
pub struct MCPTool {
    /// Unique tool identifier (e.g., "list_instances", "add")
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Tool handler function type definition.
///
/// Handlers take JSON arguments and resolve to either a serialized JSON
/// result or an error string. `Err` is reserved for arguments the handler
/// cannot accept; remote failures are part of the JSON result.
pub type ToolHandler =
    Box<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<Box<RawValue>, String>> + Send + Sync>;

/// Registry of available MCP tools.
///
/// Keeps tool definitions in registration order for discovery and a map of
/// tool names to their handlers for execution.
pub struct ToolRegistry {
    /// List of all registered tools (for tools/list method)
    pub tools: Vec<MCPTool>,
    /// Map of tool names to their handler functions (for tools/call method)
    pub handlers: HashMap<String, ToolHandler>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Register a tool with the registry.
    ///
    /// # Arguments
    /// * `tool` - Tool definition with name, description, and input schema
    /// * `handler` - Function that executes the tool when called
    pub fn register(&mut self, tool: MCPTool, handler: ToolHandler) {
        let name = tool.name.clone();
        self.tools.push(tool);
        self.handlers.insert(name, handler);
    }
}

/// Deserialize tool arguments into the handler's parameter struct.
pub fn parse_arguments<T: DeserializeOwned>(args: serde_json::Value) -> std::result::Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

/// Serialize a tool result. Serializing straight to text keeps integers
/// that do not fit a `serde_json::Number` exact.
pub fn tool_output<T: Serialize>(value: &T) -> std::result::Result<Box<RawValue>, String> {
    serde_json::value::to_raw_value(value).map_err(|e| format!("Failed to serialize result: {}", e))
}

/// Route a request to its method handler.
///
/// Shared by the HTTP and STDIO transports. Notifications are routed like
/// any other request; the transports decide not to answer them.
pub async fn dispatch(state: &AppState, registry: &ToolRegistry, req: MCPRequest) -> MCPResponse {
    match req.method.as_str() {
        "initialize" => handle_initialize(state, req.id),
        "tools/list" => handle_tools_list(registry, req.id),
        "tools/call" => handle_tools_call(registry, req.id, req.params).await,
        _ => MCPResponse::failure(
            req.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        ),
    }
}

/// Handle MCP initialize method.
///
/// Returns the protocol version, server capabilities and server information.
fn handle_initialize(state: &AppState, id: Option<serde_json::Value>) -> MCPResponse {
    MCPResponse::success(
        id,
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": state.server_name,
                "version": state.server_version
            }
        }),
    )
}

/// Handle MCP tools/list method.
fn handle_tools_list(registry: &ToolRegistry, id: Option<serde_json::Value>) -> MCPResponse {
    MCPResponse::success(id, serde_json::json!({ "tools": registry.tools }))
}

/// Handle MCP tools/call method.
///
/// Looks up the named tool, runs its handler with the supplied arguments and
/// wraps the result as MCP text content.
async fn handle_tools_call(
    registry: &ToolRegistry,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> MCPResponse {
    let Some(tool_params) = params else {
        return MCPResponse::failure(id, error_codes::INVALID_PARAMS, "Invalid params".to_string());
    };

    let tool_name = tool_params.get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    // Arguments default to an empty object if not provided
    let arguments = tool_params.get("arguments")
        .cloned()
        .unwrap_or(serde_json::json!({}));

    let Some(handler) = registry.handlers.get(tool_name) else {
        return MCPResponse::failure(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown tool: {}", tool_name),
        );
    };

    debug!(tool = tool_name, "Calling tool");
    match handler(arguments).await {
        Ok(result) => MCPResponse::success(
            id,
            serde_json::json!({
                "content": [
                    {
                        "type": "text",
                        "text": result.get()
                    }
                ],
                "isError": false
            }),
        ),
        Err(e) => {
            warn!(tool = tool_name, "Tool rejected call: {}", e);
            MCPResponse::success(
                id,
                serde_json::json!({
                    "content": [
                        {
                            "type": "text",
                            "text": format!("Error: {}", e)
                        }
                    ],
                    "isError": true
                }),
            )
        }
    }
}

/// Health check endpoint handler.
async fn health(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": state.server_name
    })))
}

/// MCP JSON-RPC request handler for HTTP mode.
///
/// Counts the request, dispatches it and returns the JSON-RPC response.
/// Notifications are acknowledged with 202 and no body.
async fn mcp_handler(
    state: web::Data<AppState>,
    registry: web::Data<ToolRegistry>,
    counter: web::Data<AtomicU64>,
    req: web::Json<MCPRequest>,
) -> Result<HttpResponse> {
    // Relaxed is enough: the counter is only read for reporting
    counter.fetch_add(1, Ordering::Relaxed);

    let req = req.into_inner();
    if req.is_notification() {
        debug!(method = %req.method, "Notification received");
        return Ok(HttpResponse::Accepted().finish());
    }

    let response = dispatch(&state, &registry, req).await;
    Ok(HttpResponse::Ok().json(response))
}

/// Metrics endpoint handler: total MCP requests since start.
async fn metrics_handler(counter: web::Data<AtomicU64>) -> Result<HttpResponse> {
    let count = counter.load(Ordering::Relaxed);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "requests_total": count,
        "status": "ok"
    })))
}

/// Server-Sent Events endpoint for tools discovery.
///
/// Emits a single event carrying the tools list and count.
async fn sse_tools_discovery(registry: web::Data<ToolRegistry>) -> Result<HttpResponse> {
    use actix_web::http::header;

    let tools_data = serde_json::json!({
        "tools": registry.tools,
        "count": registry.tools.len()
    });

    let sse_data = format!(
        "data: {}\n\n",
        serde_json::to_string(&tools_data).unwrap_or_else(|_| "{}".to_string())
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
            header::CacheDirective::MustRevalidate,
        ]))
        // Disable nginx buffering for real-time streaming
        .insert_header(("x-accel-buffering", "no"))
        .body(sse_data))
}

/// Mount the MCP routes and their shared data on an App.
fn configure_routes(
    state: web::Data<AppState>,
    registry: web::Data<ToolRegistry>,
    counter: web::Data<AtomicU64>,
) -> impl Fn(&mut web::ServiceConfig) + Clone {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(state.clone())
            .app_data(registry.clone())
            .app_data(counter.clone())
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/sse", web::get().to(sse_tools_discovery))
            .route("/mcp", web::post().to(mcp_handler))
            .route("/", web::post().to(mcp_handler))
            .route("/", web::get().to(health));
    }
}

/// Run the MCP server in HTTP mode.
///
/// # Configuration
/// - Worker threads: from `ServerConfig::workers`
/// - Max connections: 10,000 concurrent connections
/// - Connection rate limit: 1,000 connections per second
/// - Keep-alive: 30 seconds
/// - Request timeout: 30 seconds
/// - Disconnect timeout: 2 seconds
/// - Shutdown timeout: 10 seconds
pub async fn run_server_http(
    state: AppState,
    registry: Arc<ToolRegistry>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    use std::time::Duration;

    let bind_addr = config.bind_addr();
    let app_state = web::Data::new(state);
    let tool_registry = web::Data::from(registry);
    let request_count = web::Data::new(AtomicU64::new(0));

    info!(
        name = %app_state.server_name,
        version = %app_state.server_version,
        bind = %bind_addr,
        workers = config.workers,
        tools = tool_registry.tools.len(),
        "MCP server starting (HTTP mode)"
    );

    let routes = configure_routes(app_state, tool_registry, request_count);

    HttpServer::new(move || {
        App::new()
            .configure(routes.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block"))
            )
            // %r = request line, %s = status, %Dms = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
    })
    .workers(config.workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Reads JSON-RPC requests line-by-line from stdin and writes one response
/// line per request to stdout. Logging goes to stderr so it never mixes with
/// the protocol stream.
pub async fn run_server_stdio(state: AppState, registry: Arc<ToolRegistry>) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

    info!(
        name = %state.server_name,
        version = %state.server_version,
        tools = registry.tools.len(),
        "MCP server starting (STDIO mode)"
    );

    let stdin = BufReader::with_capacity(8192, tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = BufWriter::with_capacity(8192, tokio::io::stdout());

    while let Some(line) = lines.next_line().await? {
        let Some(response) = handle_stdio_line(&state, &registry, &line).await else {
            continue;
        };

        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!("Error serializing response: {}", e);
                continue;
            }
        };

        // One response per line, flushed immediately
        stdout.write_all(response_json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("STDIO input closed");
    Ok(())
}

/// Turn one input line into the response to write, if any.
///
/// Blank lines and notifications produce nothing. Unparseable requests get
/// a parse error only when an `id` can still be recovered from the line.
async fn handle_stdio_line(state: &AppState, registry: &ToolRegistry, line: &str) -> Option<MCPResponse> {
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<MCPRequest>(line) {
        Ok(req) if req.is_notification() => {
            debug!(method = %req.method, "Notification received");
            None
        }
        Ok(req) => Some(dispatch(state, registry, req).await),
        Err(e) => {
            warn!("Parse error: {}", e);
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|partial| partial.get("id").cloned())?;
            Some(MCPResponse::failure(
                Some(id),
                error_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use futures_util::FutureExt;
    use serde_json::{json, Value};

    fn state() -> AppState {
        AppState {
            server_name: "Test Server".to_string(),
            server_version: "9.9.9".to_string(),
        }
    }

    #[derive(Deserialize)]
    struct EchoArgs {
        message: String,
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            MCPTool {
                name: "echo".to_string(),
                description: "Echo a message back".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }),
            },
            Box::new(|args| echo(args).boxed()),
        );
        registry
    }

    async fn echo(args: Value) -> std::result::Result<Box<RawValue>, String> {
        let EchoArgs { message } = parse_arguments(args)?;
        tool_output(&json!({ "message": message }))
    }

    fn request(value: Value) -> MCPRequest {
        serde_json::from_value(value).unwrap()
    }

    fn to_value(response: MCPResponse) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let response = dispatch(
            &state(),
            &registry(),
            request(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})),
        )
        .await;

        let value = to_value(response);
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["result"]["serverInfo"]["name"], "Test Server");
        assert_eq!(value["result"]["serverInfo"]["version"], "9.9.9");
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn tools_list_uses_camel_case_schema() {
        let response = dispatch(
            &state(),
            &registry(),
            request(json!({"jsonrpc": "2.0", "id": "a", "method": "tools/list"})),
        )
        .await;

        let value = to_value(response);
        let tool = &value["result"]["tools"][0];
        assert_eq!(tool["name"], "echo");
        assert!(tool.get("inputSchema").is_some());
        assert!(tool.get("input_schema").is_none());
    }

    #[tokio::test]
    async fn tools_call_wraps_result_as_text_content() {
        let response = dispatch(
            &state(),
            &registry(),
            request(json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "echo", "arguments": {"message": "hi"}}
            })),
        )
        .await;

        let value = to_value(response);
        assert_eq!(value["result"]["isError"], false);
        let text = value["result"]["content"][0]["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"message": "hi"}));
    }

    #[tokio::test]
    async fn bad_arguments_are_tool_errors() {
        let response = dispatch(
            &state(),
            &registry(),
            request(json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "echo", "arguments": {"message": 5}}
            })),
        )
        .await;

        let value = to_value(response);
        assert_eq!(value["result"]["isError"], true);
        assert!(value["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Error: Invalid arguments"));
    }

    #[tokio::test]
    async fn protocol_errors_use_json_rpc_codes() {
        let reg = registry();
        let st = state();

        let missing_params = to_value(
            dispatch(&st, &reg, request(json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call"}))).await,
        );
        assert_eq!(missing_params["error"]["code"], error_codes::INVALID_PARAMS);

        let unknown_tool = to_value(
            dispatch(
                &st,
                &reg,
                request(json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {"name": "nope"}})),
            )
            .await,
        );
        assert_eq!(unknown_tool["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(unknown_tool["error"]["message"], "Unknown tool: nope");

        let unknown_method = to_value(
            dispatch(&st, &reg, request(json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"}))).await,
        );
        assert_eq!(unknown_method["error"]["message"], "Method not found: resources/list");
    }

    #[tokio::test]
    async fn stdio_skips_blank_lines_and_notifications() {
        let st = state();
        let reg = registry();

        assert!(handle_stdio_line(&st, &reg, "   ").await.is_none());
        assert!(handle_stdio_line(&st, &reg, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn stdio_parse_errors_echo_recoverable_ids() {
        let st = state();
        let reg = registry();

        // Valid JSON, but not a request (method is missing)
        let response = handle_stdio_line(&st, &reg, r#"{"jsonrpc":"2.0","id":7}"#).await.unwrap();
        let value = to_value(response);
        assert_eq!(value["id"], 7);
        assert_eq!(value["error"]["code"], error_codes::PARSE_ERROR);

        assert!(handle_stdio_line(&st, &reg, "{not json").await.is_none());
    }

    #[actix_rt::test]
    async fn http_routes_serve_health_and_rpc() {
        let counter = web::Data::new(AtomicU64::new(0));
        let app = test::init_service(App::new().configure(configure_routes(
            web::Data::new(state()),
            web::Data::new(registry()),
            counter.clone(),
        )))
        .await;

        let health: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/health").to_request(),
        )
        .await;
        assert_eq!(health, json!({"status": "ok", "service": "Test Server"}));

        let rpc: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/mcp")
                .set_json(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
                .to_request(),
        )
        .await;
        assert_eq!(rpc["result"]["tools"][0]["name"], "echo");

        let notification = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/")
                .set_json(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .to_request(),
        )
        .await;
        assert_eq!(notification.status(), actix_web::http::StatusCode::ACCEPTED);

        let metrics: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/metrics").to_request(),
        )
        .await;
        assert_eq!(metrics["requests_total"], 2);
    }

    #[actix_rt::test]
    async fn sse_lists_tools_as_one_event() {
        let app = test::init_service(App::new().configure(configure_routes(
            web::Data::new(state()),
            web::Data::new(registry()),
            web::Data::new(AtomicU64::new(0)),
        )))
        .await;

        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/sse").to_request()).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("\n\n"));
        let payload: Value = serde_json::from_str(text.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(payload["count"], 1);
    }
}
