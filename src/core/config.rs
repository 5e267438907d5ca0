/// Command-Line and Environment Configuration
///
/// Configuration is parsed once at startup from flags with environment
/// variable fallbacks (a `.env` file is loaded first if present) and then
/// handed to the tool constructors by value. Nothing reads the environment
/// after startup.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Default Compute Engine REST endpoint.
pub const DEFAULT_COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";

/// Default Boomi web service endpoint for the `add` tool.
pub const DEFAULT_BOOMI_ENDPOINT: &str =
    "https://c02-usa-east.integrate.boomi.com/ws/simple/executeMCPHelloWorld";

/// Default Boomi basic-auth user for the `add` tool.
pub const DEFAULT_BOOMI_USERNAME: &str = "mcp@solutionsteam-70I6P5.C3P9B2";

#[derive(Parser, Debug)]
#[command(name = "gcp-boomi-mcp")]
#[command(about = "MCP servers for GCP Compute Engine and Boomi workflow tools")]
#[command(version)]
pub struct Cli {
    /// Host to bind to
    #[arg(long, global = true, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, global = true, default_value_t = 8000)]
    pub port: u16,

    /// Transport to serve MCP over
    #[arg(long, global = true, env = "MCP_TRANSPORT_MODE", value_enum, default_value_t = TransportMode::Http)]
    pub transport: TransportMode,

    /// HTTP worker threads (defaults to CPU count, capped at 16)
    #[arg(long, global = true, env = "WORKER_THREADS")]
    pub workers: Option<usize>,

    /// Override the server name reported in `initialize`
    #[arg(long, global = true, env = "SERVER_NAME")]
    pub server_name: Option<String>,

    #[command(subcommand)]
    pub service: Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// Line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
    /// STDIO and HTTP concurrently
    Both,
}

#[derive(Subcommand, Debug)]
pub enum Service {
    /// Serve the GCP Manager tools (list/start/stop/get instances)
    Gcp(GcpArgs),
    /// Serve the Boomi demo tool (add)
    Boomi(BoomiArgs),
}

#[derive(Args, Debug)]
pub struct GcpArgs {
    /// Path to the service account key file
    #[arg(long, env = "GCP_CREDENTIALS_PATH", default_value = "credentials.json")]
    pub credentials_path: PathBuf,

    /// Compute Engine REST base URL
    #[arg(long, env = "GCP_COMPUTE_API", default_value = DEFAULT_COMPUTE_API)]
    pub compute_api: String,
}

#[derive(Args, Debug)]
pub struct BoomiArgs {
    /// Boomi web service endpoint
    #[arg(long, env = "BOOMI_ENDPOINT", default_value = DEFAULT_BOOMI_ENDPOINT)]
    pub endpoint: String,

    /// Boomi basic-auth username
    #[arg(long, env = "BOOMI_USERNAME", default_value = DEFAULT_BOOMI_USERNAME)]
    pub username: String,

    /// Boomi basic-auth token
    #[arg(long, env = "BOOMI_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// Settings for the hosting MCP server, independent of which tools it serves.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub transport: TransportMode,
    pub workers: usize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the Compute Engine tools.
#[derive(Debug, Clone)]
pub struct GcpConfig {
    pub credentials_path: PathBuf,
    pub compute_api: String,
}

/// Settings for the Boomi `add` tool.
#[derive(Clone)]
pub struct BoomiConfig {
    pub endpoint: String,
    pub username: String,
    pub token: Option<String>,
}

impl std::fmt::Debug for BoomiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoomiConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Which tool set the process hosts, with its configuration.
#[derive(Debug, Clone)]
pub enum ServiceConfig {
    Gcp(GcpConfig),
    Boomi(BoomiConfig),
}

impl ServiceConfig {
    /// Server name reported when none is configured explicitly.
    pub fn default_server_name(&self) -> &'static str {
        match self {
            ServiceConfig::Gcp(_) => "GCP Manager",
            ServiceConfig::Boomi(_) => "Demo",
        }
    }
}

impl Cli {
    /// Load `.env` (if any) and parse the command line.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Cli::parse()
    }

    /// Split the parsed command line into server and service configuration.
    pub fn into_config(self) -> (ServerConfig, ServiceConfig) {
        let service = match self.service {
            Service::Gcp(args) => ServiceConfig::Gcp(GcpConfig {
                credentials_path: args.credentials_path,
                compute_api: args.compute_api,
            }),
            Service::Boomi(args) => ServiceConfig::Boomi(BoomiConfig {
                endpoint: args.endpoint,
                username: args.username,
                token: args.token.filter(|t| !t.is_empty()),
            }),
        };

        // Defaults to CPU count but capped at 16 to avoid excessive context switching
        let workers = self
            .workers
            .filter(|w| *w > 0)
            .unwrap_or_else(|| num_cpus::get().clamp(1, 16));

        let server = ServerConfig {
            name: self
                .server_name
                .unwrap_or_else(|| service.default_server_name().to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: self.host,
            port: self.port,
            transport: self.transport,
            workers,
        };

        (server, service)
    }
}
