/// Compute Engine Tools
///
/// `list_instances`, `start_instance`, `stop_instance` and `get_instance`.
/// Each call loads credentials afresh, makes exactly one API call and
/// reshapes the outcome into a plain JSON object. Remote failures are
/// reported in the object (`"status": "error"`), never as tool errors.

use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::clients::compute::{
    AccessConfig, AttachedDisk, ComputeError, Instance, InstancesProvider, NetworkInterface, Operation,
};
use crate::core::server::{parse_arguments, tool_output, MCPTool, ToolRegistry};

/// Exact message returned when no client could be built.
pub const CREDENTIALS_UNAVAILABLE: &str = "Failed to load GCP credentials";

#[derive(Debug, Deserialize)]
struct ZoneArgs {
    project: String,
    zone: String,
}

#[derive(Debug, Deserialize)]
struct InstanceArgs {
    project: String,
    zone: String,
    instance_name: String,
}

/// Row of the `list_instances` result.
#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub id: u64,
    pub name: String,
    pub machine_type: String,
    pub status: String,
    pub zone: String,
    pub creation_timestamp: String,
}

impl From<&Instance> for InstanceSummary {
    fn from(instance: &Instance) -> Self {
        Self {
            id: instance.id,
            name: instance.name.clone(),
            machine_type: instance.machine_type.clone(),
            status: instance.status.clone(),
            zone: instance.zone.clone(),
            creation_timestamp: instance.creation_timestamp.clone(),
        }
    }
}

/// `get_instance` payload: the summary plus NICs and disks.
#[derive(Debug, Serialize)]
pub struct InstanceDetail {
    #[serde(flatten)]
    pub summary: InstanceSummary,
    pub network_interfaces: Vec<NetworkInterfaceSummary>,
    pub disks: Vec<DiskSummary>,
}

#[derive(Debug, Serialize)]
pub struct NetworkInterfaceSummary {
    pub name: String,
    pub network: String,
    pub network_ip: String,
    pub access_configs: Vec<AccessConfigSummary>,
}

#[derive(Debug, Serialize)]
pub struct AccessConfigSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub nat_ip: String,
}

#[derive(Debug, Serialize)]
pub struct DiskSummary {
    pub boot: bool,
    pub auto_delete: bool,
    pub source: String,
}

impl From<&AccessConfig> for AccessConfigSummary {
    fn from(ac: &AccessConfig) -> Self {
        Self {
            name: ac.name.clone(),
            kind: ac.kind.clone(),
            nat_ip: ac.nat_ip.clone(),
        }
    }
}

impl From<&NetworkInterface> for NetworkInterfaceSummary {
    fn from(nic: &NetworkInterface) -> Self {
        Self {
            name: nic.name.clone(),
            network: nic.network.clone(),
            network_ip: nic.network_ip.clone(),
            access_configs: nic.access_configs.iter().map(AccessConfigSummary::from).collect(),
        }
    }
}

impl From<&AttachedDisk> for DiskSummary {
    fn from(disk: &AttachedDisk) -> Self {
        Self {
            boot: disk.boot,
            auto_delete: disk.auto_delete,
            source: disk.source.clone(),
        }
    }
}

impl From<&Instance> for InstanceDetail {
    fn from(instance: &Instance) -> Self {
        Self {
            summary: InstanceSummary::from(instance),
            network_interfaces: instance
                .network_interfaces
                .iter()
                .map(NetworkInterfaceSummary::from)
                .collect(),
            disks: instance.disks.iter().map(DiskSummary::from).collect(),
        }
    }
}

fn credentials_unavailable() -> Value {
    json!({ "error": CREDENTIALS_UNAVAILABLE })
}

fn pending(operation: &Operation, message: String) -> Value {
    debug!(
        operation = %operation.name,
        kind = %operation.operation_type,
        status = %operation.status,
        target = %operation.target_link,
        "Operation accepted"
    );
    json!({
        "operation_id": operation.name,
        "status": "pending",
        "message": message
    })
}

fn remote_failure(context: &str, err: &ComputeError) -> Value {
    error!("Error {}: {}", context, err);
    json!({
        "error": err.to_string(),
        "status": "error"
    })
}

/// Handlers for the four instance tools.
pub struct ComputeTools {
    provider: Arc<dyn InstancesProvider>,
}

impl ComputeTools {
    pub fn new(provider: Arc<dyn InstancesProvider>) -> Self {
        Self { provider }
    }

    /// List VM instances in a project and zone.
    pub async fn list_instances(&self, project: &str, zone: &str) -> Value {
        info!("Listing instances in project={}, zone={}", project, zone);

        let Some(client) = self.provider.instances_client().await else {
            return credentials_unavailable();
        };

        match client.list(project, zone).await {
            Ok(instances) => {
                let instances: Vec<InstanceSummary> = instances.iter().map(InstanceSummary::from).collect();
                json!({
                    "count": instances.len(),
                    "instances": instances,
                    "status": "success"
                })
            }
            Err(e) => remote_failure("listing instances", &e),
        }
    }

    /// Request a start; returns as soon as the operation is accepted.
    pub async fn start_instance(&self, project: &str, zone: &str, instance_name: &str) -> Value {
        info!("Starting instance {} in project={}, zone={}", instance_name, project, zone);

        let Some(client) = self.provider.instances_client().await else {
            return credentials_unavailable();
        };

        match client.start(project, zone, instance_name).await {
            Ok(operation) => pending(&operation, format!("Start operation initiated for {}", instance_name)),
            Err(e) => remote_failure("starting instance", &e),
        }
    }

    /// Request a stop; returns as soon as the operation is accepted.
    pub async fn stop_instance(&self, project: &str, zone: &str, instance_name: &str) -> Value {
        info!("Stopping instance {} in project={}, zone={}", instance_name, project, zone);

        let Some(client) = self.provider.instances_client().await else {
            return credentials_unavailable();
        };

        match client.stop(project, zone, instance_name).await {
            Ok(operation) => pending(&operation, format!("Stop operation initiated for {}", instance_name)),
            Err(e) => remote_failure("stopping instance", &e),
        }
    }

    /// Fetch one instance with its network interfaces and disks.
    pub async fn get_instance(&self, project: &str, zone: &str, instance_name: &str) -> Value {
        info!(
            "Getting instance details for {} in project={}, zone={}",
            instance_name, project, zone
        );

        let Some(client) = self.provider.instances_client().await else {
            return credentials_unavailable();
        };

        match client.get(project, zone, instance_name).await {
            Ok(instance) => json!({
                "instance": InstanceDetail::from(&instance),
                "status": "success"
            }),
            Err(e) => remote_failure("getting instance details", &e),
        }
    }
}

async fn call_list(tools: Arc<ComputeTools>, args: Value) -> Result<Box<RawValue>, String> {
    let ZoneArgs { project, zone } = parse_arguments(args)?;
    tool_output(&tools.list_instances(&project, &zone).await)
}

async fn call_start(tools: Arc<ComputeTools>, args: Value) -> Result<Box<RawValue>, String> {
    let InstanceArgs { project, zone, instance_name } = parse_arguments(args)?;
    tool_output(&tools.start_instance(&project, &zone, &instance_name).await)
}

async fn call_stop(tools: Arc<ComputeTools>, args: Value) -> Result<Box<RawValue>, String> {
    let InstanceArgs { project, zone, instance_name } = parse_arguments(args)?;
    tool_output(&tools.stop_instance(&project, &zone, &instance_name).await)
}

async fn call_get(tools: Arc<ComputeTools>, args: Value) -> Result<Box<RawValue>, String> {
    let InstanceArgs { project, zone, instance_name } = parse_arguments(args)?;
    tool_output(&tools.get_instance(&project, &zone, &instance_name).await)
}

fn zone_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string", "description": "GCP project ID" },
            "zone": { "type": "string", "description": "Compute zone, e.g. us-central1-a" }
        },
        "required": ["project", "zone"]
    })
}

fn instance_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string", "description": "GCP project ID" },
            "zone": { "type": "string", "description": "Compute zone, e.g. us-central1-a" },
            "instance_name": { "type": "string", "description": "Name of the VM instance" }
        },
        "required": ["project", "zone", "instance_name"]
    })
}

fn tool(name: &str, description: &str, input_schema: Value) -> MCPTool {
    MCPTool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Register the four instance tools.
pub fn register(registry: &mut ToolRegistry, tools: Arc<ComputeTools>) {
    let t = tools.clone();
    registry.register(
        tool("list_instances", "List VM instances in a GCP project and zone", zone_schema()),
        Box::new(move |args| call_list(t.clone(), args).boxed()),
    );

    let t = tools.clone();
    registry.register(
        tool("start_instance", "Start a VM instance in GCP", instance_schema()),
        Box::new(move |args| call_start(t.clone(), args).boxed()),
    );

    let t = tools.clone();
    registry.register(
        tool("stop_instance", "Stop a VM instance in GCP", instance_schema()),
        Box::new(move |args| call_stop(t.clone(), args).boxed()),
    );

    let t = tools;
    registry.register(
        tool("get_instance", "Get details of a specific VM instance", instance_schema()),
        Box::new(move |args| call_get(t.clone(), args).boxed()),
    );
}
