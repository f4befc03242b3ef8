//! Infrastructure graph: how traffic reaches each workload on the host.
//!
//! Layers run Internet -> nginx -> vhosts -> containers, with host port
//! mappings as a direct path and docker networks NATed through the host.

use crate::controllers::docker::{self, DockerContainer, DockerNetwork, ListContainersCmd};
use crate::controllers::nginx::{self, NginxStatusCmd, NginxVhost};
use crate::error::{GatewayError, GatewayResult};
use crate::server::session::Session;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfraNodeType {
    Internet,
    Nginx,
    Vhost,
    HostPort,
    Container,
    DockerNetwork,
    HostNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Stopped,
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraNode {
    pub id: String,
    pub label: String,
    pub node_type: InfraNodeType,
    pub status: NodeStatus,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraEdge {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraSummary {
    pub total_containers: usize,
    pub running_containers: usize,
    pub total_vhosts: usize,
    pub enabled_vhosts: usize,
    pub nginx_status: String,
    pub total_volumes: usize,
    pub total_networks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureGraph {
    pub nodes: Vec<InfraNode>,
    pub edges: Vec<InfraEdge>,
    pub summary: InfraSummary,
}

/// Everything the graph is derived from.
#[derive(Debug, Clone, Default)]
pub struct InfraInputs {
    pub nginx_running: bool,
    pub nginx_version: String,
    pub host_interface: String,
    pub vhosts: Vec<NginxVhost>,
    pub containers: Vec<DockerContainer>,
    pub networks: Vec<DockerNetwork>,
    pub volume_count: usize,
}

#[derive(Default)]
struct GraphBuilder {
    node_ids: HashSet<String>,
    edge_keys: HashSet<(String, String, String)>,
    nodes: Vec<InfraNode>,
    edges: Vec<InfraEdge>,
}

impl GraphBuilder {
    fn node(&mut self, id: String, label: String, node_type: InfraNodeType, status: NodeStatus, metadata: Value) {
        if self.node_ids.insert(id.clone()) {
            self.nodes.push(InfraNode {
                id,
                label,
                node_type,
                status,
                metadata,
            });
        }
    }

    fn edge(&mut self, source: &str, target: &str, edge_type: &str, label: Option<String>) {
        let key = (source.to_string(), target.to_string(), edge_type.to_string());
        if self.edge_keys.insert(key) {
            self.edges.push(InfraEdge {
                source: source.to_string(),
                target: target.to_string(),
                edge_type: edge_type.to_string(),
                label,
            });
        }
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// Port of a `proxy_pass` URL, e.g. `http://127.0.0.1:3000/api` -> `3000`.
fn backend_port(backend: &str) -> Option<&str> {
    let without_scheme = backend.split_once("://").map_or(backend, |(_, rest)| rest);
    let authority = without_scheme.split('/').next()?;
    authority.rsplit_once(':').map(|(_, port)| port)
}

fn proxies_to(backend: &str, container: &DockerContainer) -> bool {
    if backend.contains(&container.name) || backend.contains(short_id(&container.id)) {
        return true;
    }
    backend_port(backend).is_some_and(|port| {
        container
            .ports
            .iter()
            .any(|p| !p.host_port.is_empty() && p.host_port == port)
    })
}

pub fn build_graph(inputs: &InfraInputs) -> InfrastructureGraph {
    let mut graph = GraphBuilder::default();

    graph.node(
        "internet".into(),
        "Internet".into(),
        InfraNodeType::Internet,
        NodeStatus::Healthy,
        json!({ "description": "External network" }),
    );
    graph.node(
        "nginx".into(),
        format!("Nginx {}", inputs.nginx_version).trim().to_string(),
        InfraNodeType::Nginx,
        if inputs.nginx_running { NodeStatus::Running } else { NodeStatus::Stopped },
        json!({ "version": inputs.nginx_version, "running": inputs.nginx_running }),
    );
    graph.edge("internet", "nginx", "routes_to", Some("80/443".into()));
    graph.node(
        "host_network".into(),
        format!("Host ({})", inputs.host_interface),
        InfraNodeType::HostNetwork,
        NodeStatus::Running,
        json!({ "interface": inputs.host_interface, "type": "host" }),
    );
    graph.edge("host_network", "internet", "outbound", Some("NAT".into()));

    for vhost in &inputs.vhosts {
        let vhost_id = format!("vhost:{}", vhost.name);
        graph.node(
            vhost_id.clone(),
            vhost.server_name.clone(),
            InfraNodeType::Vhost,
            if vhost.enabled { NodeStatus::Healthy } else { NodeStatus::Stopped },
            json!({
                "name": vhost.name,
                "server_name": vhost.server_name,
                "enabled": vhost.enabled,
                "ssl": vhost.ssl_enabled,
                "backend": vhost.proxy_pass,
            }),
        );
        graph.edge("nginx", &vhost_id, "serves", Some(vhost.listen_port.clone()));
    }

    for container in &inputs.containers {
        let container_id = format!("container:{}", container.name);
        graph.node(
            container_id.clone(),
            container.name.clone(),
            InfraNodeType::Container,
            if container.state == "running" { NodeStatus::Running } else { NodeStatus::Stopped },
            json!({ "id": container.id, "image": container.image, "state": container.state }),
        );

        for vhost in &inputs.vhosts {
            if let Some(backend) = &vhost.proxy_pass {
                if proxies_to(backend, container) {
                    graph.edge(
                        &format!("vhost:{}", vhost.name),
                        &container_id,
                        "proxies_to",
                        Some(backend.clone()),
                    );
                }
            }
        }

        for mapping in container.ports.iter().filter(|p| !p.host_port.is_empty()) {
            let port_id = format!("hostport:{}/{}", mapping.host_port, mapping.protocol);
            graph.node(
                port_id.clone(),
                format!("Port :{}", mapping.host_port),
                InfraNodeType::HostPort,
                NodeStatus::Running,
                json!({
                    "host_port": mapping.host_port,
                    "container_port": mapping.container_port,
                    "protocol": mapping.protocol,
                }),
            );
            graph.edge("internet", &port_id, "direct_access", Some(format!(":{}", mapping.host_port)));
            graph.edge(
                &port_id,
                &container_id,
                "port_mapping",
                Some(format!("-> :{}", mapping.container_port)),
            );
        }
    }

    for network in &inputs.networks {
        if matches!(network.name.as_str(), "none" | "host" | "null") {
            continue;
        }
        let network_id = format!("network:{}", network.name);
        graph.node(
            network_id.clone(),
            format!("{} ({})", network.name, network.driver),
            InfraNodeType::DockerNetwork,
            NodeStatus::Healthy,
            json!({
                "driver": network.driver,
                "scope": network.scope,
                "subnet": network.subnet,
                "containers": network.containers.len(),
            }),
        );
        graph.edge(&network_id, "host_network", "nat", Some("masquerade".into()));

        for container in &inputs.containers {
            if network.containers.contains(&container.name) {
                graph.edge(
                    &format!("container:{}", container.name),
                    &network_id,
                    "connected_to",
                    None,
                );
            }
        }
    }

    let summary = InfraSummary {
        total_containers: inputs.containers.len(),
        running_containers: inputs
            .containers
            .iter()
            .filter(|c| c.state == "running")
            .count(),
        total_vhosts: inputs.vhosts.len(),
        enabled_vhosts: inputs.vhosts.iter().filter(|v| v.enabled).count(),
        nginx_status: if inputs.nginx_running { "running" } else { "stopped" }.to_string(),
        total_volumes: inputs.volume_count,
        total_networks: inputs.networks.len(),
    };

    InfrastructureGraph {
        nodes: graph.nodes,
        edges: graph.edges,
        summary,
    }
}

/// Hosts without docker or nginx still get a graph; only transport-level
/// failures abort.
fn tolerate<T: Default>(result: GatewayResult<T>, what: &str) -> GatewayResult<T> {
    match result {
        Err(GatewayError::RemoteCommandFailed { code, stderr }) => {
            debug!("Skipping {} in graph (exit {}): {}", what, code, stderr);
            Ok(T::default())
        }
        other => other,
    }
}

pub async fn collect(session: &Session) -> GatewayResult<InfrastructureGraph> {
    let (nginx_running, nginx_version, _) = session.run(&NginxStatusCmd).await?;
    let interface = session
        .exec_checked("ip route show default 2>/dev/null | awk '{print $5; exit}'")
        .await?
        .value
        .trim()
        .to_string();
    let vhosts = tolerate(
        nginx::list_vhosts(session).await.map(|c| c.value),
        "vhosts",
    )?;
    let containers = tolerate(session.run(&ListContainersCmd).await, "containers")?;
    let networks = tolerate(docker::list_networks(session).await, "networks")?;
    let volumes = tolerate(docker::list_volumes(session).await, "volumes")?;

    Ok(build_graph(&InfraInputs {
        nginx_running,
        nginx_version,
        host_interface: if interface.is_empty() { "eth0".to_string() } else { interface },
        vhosts,
        containers,
        networks,
        volume_count: volumes.len(),
    }))
}
