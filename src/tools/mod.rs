/// Tools Module
///
/// Tool implementations, grouped by the service that hosts them. Each module
/// exports a `register` function that adds its tools to a registry; the
/// `*_registry` builders wire a service's tools to their real clients.

pub mod add;
pub mod compute;

use std::sync::Arc;

use crate::clients::boomi::BoomiClient;
use crate::clients::compute::{ComputeError, ServiceAccountProvider};
use crate::core::config::{BoomiConfig, GcpConfig, ServiceConfig};
use crate::core::server::ToolRegistry;

/// Tools for the GCP Manager service.
pub fn gcp_registry(config: &GcpConfig) -> Result<ToolRegistry, ComputeError> {
    let provider = ServiceAccountProvider::new(config.credentials_path.clone(), &config.compute_api)?;

    let mut registry = ToolRegistry::new();
    compute::register(&mut registry, Arc::new(compute::ComputeTools::new(Arc::new(provider))));
    Ok(registry)
}

/// Tools for the Boomi demo service.
pub fn boomi_registry(config: &BoomiConfig) -> Result<ToolRegistry, reqwest::Error> {
    let client = BoomiClient::new(config)?;

    let mut registry = ToolRegistry::new();
    add::register(&mut registry, Arc::new(add::AddTool::new(Arc::new(client))));
    Ok(registry)
}

/// Build the registry for whichever service was selected.
pub fn build_registry(service: &ServiceConfig) -> anyhow::Result<ToolRegistry> {
    let registry = match service {
        ServiceConfig::Gcp(config) => gcp_registry(config)?,
        ServiceConfig::Boomi(config) => boomi_registry(config)?,
    };
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DEFAULT_BOOMI_ENDPOINT, DEFAULT_BOOMI_USERNAME, DEFAULT_COMPUTE_API};
    use std::path::PathBuf;

    #[test]
    fn each_service_registers_only_its_tools() {
        let gcp = build_registry(&ServiceConfig::Gcp(GcpConfig {
            credentials_path: PathBuf::from("credentials.json"),
            compute_api: DEFAULT_COMPUTE_API.to_string(),
        }))
        .unwrap();
        let boomi = build_registry(&ServiceConfig::Boomi(BoomiConfig {
            endpoint: DEFAULT_BOOMI_ENDPOINT.to_string(),
            username: DEFAULT_BOOMI_USERNAME.to_string(),
            token: None,
        }))
        .unwrap();

        let names = |r: &ToolRegistry| r.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&gcp), vec!["list_instances", "start_instance", "stop_instance", "get_instance"]);
        assert_eq!(names(&boomi), vec!["add"]);
    }

    #[tokio::test]
    async fn gcp_tools_report_missing_credentials_file() {
        let registry = gcp_registry(&GcpConfig {
            credentials_path: PathBuf::from("/definitely/not/here/credentials.json"),
            compute_api: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();

        let list = &registry.handlers["list_instances"];
        let result = list(serde_json::json!({ "project": "p", "zone": "z" })).await.unwrap();
        let result: serde_json::Value = serde_json::from_str(result.get()).unwrap();
        assert_eq!(result, serde_json::json!({ "error": "Failed to load GCP credentials" }));
    }
}
