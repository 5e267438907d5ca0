/// Compute Engine Instances Client
///
/// Minimal REST client for the zonal instances API (list/get/start/stop).
/// Requests are authorized through an [`AccessTokenSource`]; caller-supplied
/// names are always percent-encoded as single path segments.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, error};

use crate::clients::gcp_auth::{AccessTokenSource, ServiceAccountTokens, TokenError, CLOUD_PLATFORM_SCOPE};

/// Failure of a Compute Engine call after credentials were loaded.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("request to Compute Engine failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("{code} {message}")]
    Provider { code: u16, message: String },
    #[error("failed to decode Compute Engine response: {0}")]
    Decode(String),
    #[error("invalid resource name: {0:?}")]
    InvalidName(String),
    #[error("invalid Compute Engine endpoint: {0}")]
    InvalidEndpoint(String),
}

// ============================================================
// API Resource Types
// ============================================================

/// Instance resource as returned by the API. Absent fields take their zero
/// value so that partial records still flatten cleanly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub id: u64,
    pub name: String,
    pub machine_type: String,
    pub status: String,
    pub zone: String,
    pub creation_timestamp: String,
    pub network_interfaces: Vec<NetworkInterface>,
    pub disks: Vec<AttachedDisk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    pub name: String,
    pub network: String,
    #[serde(rename = "networkIP")]
    pub network_ip: String,
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "natIP")]
    pub nat_ip: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedDisk {
    pub boot: bool,
    pub auto_delete: bool,
    pub source: String,
}

/// Zonal operation handle returned by start/stop.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub name: String,
    pub status: String,
    pub operation_type: String,
    pub target_link: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InstanceList {
    items: Vec<Instance>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// The API encodes uint64 ids as JSON strings.
fn u64_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ============================================================
// Client Seams
// ============================================================

/// Authenticated access to zonal instances.
#[async_trait]
pub trait InstancesApi: Send + Sync {
    /// All instances in the zone, following pagination to the end.
    async fn list(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError>;
    async fn get(&self, project: &str, zone: &str, instance: &str) -> Result<Instance, ComputeError>;
    async fn start(&self, project: &str, zone: &str, instance: &str) -> Result<Operation, ComputeError>;
    async fn stop(&self, project: &str, zone: &str, instance: &str) -> Result<Operation, ComputeError>;
}

/// Hands out an authenticated instances client per invocation, or `None`
/// when credentials cannot be loaded (the cause is logged, not returned).
#[async_trait]
pub trait InstancesProvider: Send + Sync {
    async fn instances_client(&self) -> Option<Box<dyn InstancesApi>>;
}

// ============================================================
// REST Implementation
// ============================================================

/// Parse a REST base URL that path segments can be appended to.
pub fn parse_base_url(base_url: &str) -> Result<Url, ComputeError> {
    match Url::parse(base_url) {
        Ok(url) if !url.cannot_be_a_base() => Ok(url),
        _ => Err(ComputeError::InvalidEndpoint(base_url.to_string())),
    }
}

/// A caller-supplied name used as one path segment. Empty and dot segments
/// would change which resource the path points at.
fn resource_name(name: &str) -> Result<&str, ComputeError> {
    match name {
        "" | "." | ".." => Err(ComputeError::InvalidName(name.to_string())),
        _ => Ok(name),
    }
}

/// Compute Engine REST client bound to one token source.
pub struct ComputeClient {
    http: Client,
    base_url: Url,
    tokens: Box<dyn AccessTokenSource>,
}

impl ComputeClient {
    pub fn new(http: Client, base_url: Url, tokens: Box<dyn AccessTokenSource>) -> Self {
        Self {
            http,
            base_url,
            tokens,
        }
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn resource_url(&self, segments: &[&str]) -> Result<Url, ComputeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ComputeError::InvalidEndpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn instances_url(&self, project: &str, zone: &str) -> Result<Url, ComputeError> {
        self.resource_url(&[
            "projects",
            resource_name(project)?,
            "zones",
            resource_name(zone)?,
            "instances",
        ])
    }

    fn instance_url(&self, project: &str, zone: &str, instance: &str) -> Result<Url, ComputeError> {
        self.resource_url(&[
            "projects",
            resource_name(project)?,
            "zones",
            resource_name(zone)?,
            "instances",
            resource_name(instance)?,
        ])
    }

    fn action_url(&self, project: &str, zone: &str, instance: &str, action: &str) -> Result<Url, ComputeError> {
        self.resource_url(&[
            "projects",
            resource_name(project)?,
            "zones",
            resource_name(zone)?,
            "instances",
            resource_name(instance)?,
            action,
        ])
    }

    async fn post_action(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        action: &str,
    ) -> Result<Operation, ComputeError> {
        let url = self.action_url(project, zone, instance, action)?;
        let authorization = self.tokens.authorization().await?;
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(ComputeError::Transport)?;

        decode(response).await
    }
}

/// Map a response to its resource type, or to the API error it carries.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ComputeError> {
    let status = response.status();
    let body = response.text().await.map_err(ComputeError::Transport)?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(api) => ComputeError::Provider {
                code: if api.error.code == 0 { status.as_u16() } else { api.error.code },
                message: api.error.message,
            },
            Err(_) => ComputeError::Provider {
                code: status.as_u16(),
                message: body,
            },
        });
    }

    serde_json::from_str(&body).map_err(|e| ComputeError::Decode(e.to_string()))
}

#[async_trait]
impl InstancesApi for ComputeClient {
    async fn list(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError> {
        let url = self.instances_url(project, zone)?;
        let authorization = self.tokens.authorization().await?;

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(url.clone())
                .header(reqwest::header::AUTHORIZATION, authorization.as_str());
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }
            debug!("GET {} (page_token={:?})", url, page_token);

            let response = request.send().await.map_err(ComputeError::Transport)?;
            let page: InstanceList = decode(response).await?;
            instances.extend(page.items);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(instances)
    }

    async fn get(&self, project: &str, zone: &str, instance: &str) -> Result<Instance, ComputeError> {
        let url = self.instance_url(project, zone, instance)?;
        let authorization = self.tokens.authorization().await?;
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(ComputeError::Transport)?;

        decode(response).await
    }

    async fn start(&self, project: &str, zone: &str, instance: &str) -> Result<Operation, ComputeError> {
        self.post_action(project, zone, instance, "start").await
    }

    async fn stop(&self, project: &str, zone: &str, instance: &str) -> Result<Operation, ComputeError> {
        self.post_action(project, zone, instance, "stop").await
    }
}

/// Builds a [`ComputeClient`] from the key file on every request.
pub struct ServiceAccountProvider {
    credentials_path: PathBuf,
    base_url: Url,
    http: Client,
}

impl ServiceAccountProvider {
    pub fn new(credentials_path: PathBuf, base_url: &str) -> Result<Self, ComputeError> {
        let base_url = parse_base_url(base_url)?;
        let http = Client::builder()
            .user_agent(concat!("gcp-boomi-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self {
            credentials_path,
            base_url,
            http,
        })
    }
}

#[async_trait]
impl InstancesProvider for ServiceAccountProvider {
    async fn instances_client(&self) -> Option<Box<dyn InstancesApi>> {
        match ServiceAccountTokens::from_file(&self.credentials_path, &[CLOUD_PLATFORM_SCOPE]).await {
            Ok(tokens) => Some(Box::new(ComputeClient::new(
                self.http.clone(),
                self.base_url.clone(),
                Box::new(tokens),
            ))),
            Err(e) => {
                error!("Error loading credentials: {}", e);
                None
            }
        }
    }
}
