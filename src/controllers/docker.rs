use crate::controllers::{not_found_on, parse_size, split_fields};
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::remote_cmd::{quote, RemoteCommand};
use crate::server::session::Session;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Time given to the daemon after a lifecycle action before re-listing.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Roots searched for compose files; nothing outside them is scanned.
pub const COMPOSE_ROOTS: [&str; 5] = ["/opt", "/srv", "/home", "/root", "/var/www"];
const COMPOSE_FILE_NAMES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];
const COMPOSE_MAX_DEPTH: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_ip: String,
    pub host_port: String,
    pub container_port: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: String,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub destination: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub created: String,
    pub started_at: Option<String>,
    pub env_vars: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub networks: Vec<String>,
    pub volumes: Vec<VolumeMount>,
    pub labels: Vec<Label>,
    pub command: String,
    pub working_dir: String,
    pub user: String,
    pub restart_policy: String,
    pub memory_limit: String,
    pub cpu_limit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerImage {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub size: u64,
    pub created: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerVolume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub scope: String,
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerNetwork {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeProject {
    pub name: String,
    pub path: String,
    pub services: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

impl ContainerAction {
    fn verb(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
        }
    }
}

pub struct ListContainersCmd;

impl RemoteCommand for ListContainersCmd {
    type Output = Vec<DockerContainer>;

    fn to_shell_string(&self) -> String {
        "docker ps -a --no-trunc --format '{{.ID}}|{{.Names}}|{{.Image}}|{{.Status}}|{{.State}}|{{.Ports}}'"
            .to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let containers = output
            .lines()
            .filter_map(|line| split_fields(line, 6))
            .map(|parts| DockerContainer {
                id: parts[0].to_string(),
                name: parts[1].to_string(),
                image: parts[2].to_string(),
                status: parts[3].to_string(),
                state: parts[4].to_string(),
                cpu_percent: 0.0,
                memory_usage: 0,
                memory_limit: 0,
                ports: parse_ports(&parts[5..].join("|")),
            })
            .collect();
        Ok(containers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

pub struct ContainerStatsCmd;

impl RemoteCommand for ContainerStatsCmd {
    type Output = HashMap<String, ContainerStats>;

    fn to_shell_string(&self) -> String {
        "docker stats --no-stream --no-trunc --format '{{.ID}}|{{.CPUPerc}}|{{.MemUsage}}'"
            .to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let mut stats = HashMap::new();
        for parts in output.lines().filter_map(|line| split_fields(line, 3)) {
            let cpu_percent = parts[1].trim().trim_end_matches('%').parse().unwrap_or(0.0);
            let (usage, limit) = parts[2].split_once('/').unwrap_or((parts[2], ""));
            stats.insert(
                parts[0].to_string(),
                ContainerStats {
                    cpu_percent,
                    memory_usage: parse_size(usage).unwrap_or(0),
                    memory_limit: parse_size(limit).unwrap_or(0),
                },
            );
        }
        Ok(stats)
    }
}

/// Parses the `Ports` column of `docker ps`,
/// e.g. `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 443/tcp`.
pub fn parse_ports(text: &str) -> Vec<PortMapping> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let (host, container) = match entry.split_once("->") {
                Some((host, container)) => (Some(host.trim()), container.trim()),
                None => (None, entry),
            };
            let (container_port, protocol) = container.split_once('/').unwrap_or((container, "tcp"));
            if container_port.is_empty() {
                return None;
            }
            let (host_ip, host_port) = match host {
                Some(host) => host
                    .rsplit_once(':')
                    .map(|(ip, port)| (ip.to_string(), port.to_string()))
                    .unwrap_or_else(|| (String::new(), host.to_string())),
                None => (String::new(), String::new()),
            };
            Some(PortMapping {
                host_ip,
                host_port,
                container_port: container_port.to_string(),
                protocol: protocol.to_string(),
            })
        })
        .collect()
}

pub struct InspectContainerCmd {
    pub container: String,
}

impl RemoteCommand for InspectContainerCmd {
    type Output = ContainerDetails;

    fn to_shell_string(&self) -> String {
        format!("docker inspect --type container {}", quote(&self.container))
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let parsed: Value = serde_json::from_str(output)
            .map_err(|e| anyhow::anyhow!("Unexpected docker inspect output: {}", e))?;
        let inspect = parsed
            .as_array()
            .and_then(|items| items.first())
            .ok_or_else(|| GatewayError::NotFound(format!("Container {}", self.container)))?;
        Ok(details_from_inspect(inspect))
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

fn details_from_inspect(inspect: &Value) -> ContainerDetails {
    let mut ports = Vec::new();
    if let Some(bindings) = inspect
        .pointer("/NetworkSettings/Ports")
        .and_then(Value::as_object)
    {
        for (key, hosts) in bindings {
            let (container_port, protocol) = key.split_once('/').unwrap_or((key, "tcp"));
            match hosts.as_array() {
                Some(hosts) if !hosts.is_empty() => {
                    for host in hosts {
                        ports.push(PortMapping {
                            host_ip: str_at(host, "/HostIp").to_string(),
                            host_port: str_at(host, "/HostPort").to_string(),
                            container_port: container_port.to_string(),
                            protocol: protocol.to_string(),
                        });
                    }
                }
                _ => ports.push(PortMapping {
                    host_ip: String::new(),
                    host_port: String::new(),
                    container_port: container_port.to_string(),
                    protocol: protocol.to_string(),
                }),
            }
        }
    }

    let networks = inspect
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
        .map(|n| n.keys().cloned().collect())
        .unwrap_or_default();

    let volumes = inspect
        .pointer("/Mounts")
        .and_then(Value::as_array)
        .map(|mounts| {
            mounts
                .iter()
                .map(|m| VolumeMount {
                    source: str_at(m, "/Source").to_string(),
                    destination: str_at(m, "/Destination").to_string(),
                    mode: match m.pointer("/RW").and_then(Value::as_bool) {
                        Some(false) => "ro".to_string(),
                        _ => "rw".to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    let mut labels: Vec<Label> = inspect
        .pointer("/Config/Labels")
        .and_then(Value::as_object)
        .map(|l| {
            l.iter()
                .map(|(k, v)| Label {
                    key: k.clone(),
                    value: v.as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    labels.sort_by(|a, b| a.key.cmp(&b.key));

    let join_strings = |pointer: &str| {
        inspect
            .pointer(pointer)
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    };
    let command = [join_strings("/Config/Entrypoint"), join_strings("/Config/Cmd")]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let memory_limit = match inspect.pointer("/HostConfig/Memory").and_then(Value::as_u64) {
        Some(0) | None => "unlimited".to_string(),
        Some(bytes) => bytes.to_string(),
    };
    let cpu_limit = match inspect.pointer("/HostConfig/NanoCpus").and_then(Value::as_u64) {
        Some(0) | None => "unlimited".to_string(),
        Some(nano) => format!("{:.2}", nano as f64 / 1e9),
    };

    let state = str_at(inspect, "/State/Status").to_string();
    let status = match inspect.pointer("/State/Health/Status").and_then(Value::as_str) {
        Some(health) => format!("{} ({})", state, health),
        None => state.clone(),
    };
    let started_at = match str_at(inspect, "/State/StartedAt") {
        "" | "0001-01-01T00:00:00Z" => None,
        started => Some(started.to_string()),
    };

    ContainerDetails {
        id: str_at(inspect, "/Id").to_string(),
        name: str_at(inspect, "/Name").trim_start_matches('/').to_string(),
        image: str_at(inspect, "/Config/Image").to_string(),
        state,
        status,
        created: str_at(inspect, "/Created").to_string(),
        started_at,
        env_vars: inspect
            .pointer("/Config/Env")
            .and_then(Value::as_array)
            .map(|e| e.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default(),
        ports,
        networks,
        volumes,
        labels,
        command,
        working_dir: str_at(inspect, "/Config/WorkingDir").to_string(),
        user: str_at(inspect, "/Config/User").to_string(),
        restart_policy: str_at(inspect, "/HostConfig/RestartPolicy/Name").to_string(),
        memory_limit,
        cpu_limit,
    }
}

pub struct ListImagesCmd;

impl RemoteCommand for ListImagesCmd {
    type Output = Vec<DockerImage>;

    fn to_shell_string(&self) -> String {
        "docker images --no-trunc --format '{{.ID}}|{{.Repository}}|{{.Tag}}|{{.Size}}|{{.CreatedSince}}'"
            .to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        Ok(output
            .lines()
            .filter_map(|line| split_fields(line, 5))
            .map(|parts| DockerImage {
                id: parts[0].to_string(),
                repository: parts[1].to_string(),
                tag: parts[2].to_string(),
                size: parse_size(parts[3]).unwrap_or(0),
                created: parts[4].to_string(),
                architecture: String::new(),
            })
            .collect())
    }
}

pub struct ImageArchitectureCmd {
    pub ids: Vec<String>,
}

impl RemoteCommand for ImageArchitectureCmd {
    type Output = HashMap<String, String>;

    fn to_shell_string(&self) -> String {
        let ids: Vec<String> = self.ids.iter().map(|id| quote(id)).collect();
        format!(
            "docker image inspect --format '{{{{.Id}}}}|{{{{.Architecture}}}}' {}",
            ids.join(" ")
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        Ok(output
            .lines()
            .filter_map(|line| split_fields(line, 2))
            .map(|parts| (parts[0].to_string(), parts[1].to_string()))
            .collect())
    }
}

pub struct ListVolumesCmd;

impl RemoteCommand for ListVolumesCmd {
    type Output = Vec<DockerVolume>;

    fn to_shell_string(&self) -> String {
        "docker volume ls --format '{{.Name}}|{{.Driver}}|{{.Mountpoint}}|{{.Scope}}|{{.Labels}}'"
            .to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        Ok(output
            .lines()
            .filter_map(|line| split_fields(line, 4))
            .map(|parts| DockerVolume {
                name: parts[0].to_string(),
                driver: parts[1].to_string(),
                mountpoint: parts[2].to_string(),
                scope: parts[3].to_string(),
                labels: parts
                    .get(4)
                    .map(|labels| parse_labels(labels))
                    .unwrap_or_default(),
            })
            .collect())
    }
}

fn parse_labels(text: &str) -> Vec<Label> {
    text.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some(Label {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

pub struct ListNetworksCmd;

impl RemoteCommand for ListNetworksCmd {
    type Output = Vec<DockerNetwork>;

    fn to_shell_string(&self) -> String {
        "docker network inspect $(docker network ls -q)".to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let parsed: Value = serde_json::from_str(output)
            .map_err(|e| anyhow::anyhow!("Unexpected docker network output: {}", e))?;
        let networks = parsed
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|n| {
                        let ipam = n
                            .pointer("/IPAM/Config")
                            .and_then(Value::as_array)
                            .and_then(|c| c.first());
                        let non_empty = |v: Option<&str>| {
                            v.filter(|s| !s.is_empty()).map(String::from)
                        };
                        let mut containers: Vec<String> = n
                            .pointer("/Containers")
                            .and_then(Value::as_object)
                            .map(|c| {
                                c.values()
                                    .filter_map(|v| v.pointer("/Name").and_then(Value::as_str))
                                    .map(String::from)
                                    .collect()
                            })
                            .unwrap_or_default();
                        containers.sort();
                        DockerNetwork {
                            id: str_at(n, "/Id").to_string(),
                            name: str_at(n, "/Name").to_string(),
                            driver: str_at(n, "/Driver").to_string(),
                            scope: str_at(n, "/Scope").to_string(),
                            subnet: non_empty(ipam.and_then(|c| c.get("Subnet")).and_then(Value::as_str)),
                            gateway: non_empty(ipam.and_then(|c| c.get("Gateway")).and_then(Value::as_str)),
                            containers,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(networks)
    }
}

pub struct ContainerActionCmd {
    pub container: String,
    pub action: ContainerAction,
}

impl RemoteCommand for ContainerActionCmd {
    type Output = ();

    fn to_shell_string(&self) -> String {
        format!("docker {} {}", self.action.verb(), quote(&self.container))
    }

    fn parse_output(&self, _output: &str) -> GatewayResult<()> {
        Ok(())
    }
}

pub struct ContainerLogsCmd {
    pub container: String,
    pub lines: u32,
}

impl RemoteCommand for ContainerLogsCmd {
    type Output = String;

    fn to_shell_string(&self) -> String {
        format!(
            "docker logs --tail {} --timestamps {} 2>&1",
            self.lines,
            quote(&self.container)
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<String> {
        Ok(output.to_string())
    }
}

pub struct ScanComposeCmd {
    pub roots: Vec<String>,
}

const COMPOSE_HEADER: &str = "==> ";

impl RemoteCommand for ScanComposeCmd {
    type Output = Vec<ComposeProject>;

    fn to_shell_string(&self) -> String {
        let roots: Vec<String> = self.roots.iter().map(|r| quote(r)).collect();
        let names: Vec<String> = COMPOSE_FILE_NAMES
            .iter()
            .map(|n| format!("-name {}", n))
            .collect();
        format!(
            "find {} -maxdepth {} -type f \\( {} \\) -exec sh -c 'for f; do echo \"{}$f\"; cat \"$f\"; echo; done' _ {{}} + 2>/dev/null; true",
            roots.join(" "),
            COMPOSE_MAX_DEPTH,
            names.join(" -o "),
            COMPOSE_HEADER
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let mut projects = Vec::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in output.lines() {
            if let Some(path) = line.strip_prefix(COMPOSE_HEADER) {
                if let Some((path, lines)) = current.take() {
                    projects.push(compose_project(path, &lines));
                }
                current = Some((path.trim().to_string(), Vec::new()));
            } else if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
        }
        if let Some((path, lines)) = current.take() {
            projects.push(compose_project(path, &lines));
        }

        projects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(projects)
    }
}

fn compose_project(path: String, lines: &[&str]) -> ComposeProject {
    let name = path
        .rsplit('/')
        .nth(1)
        .filter(|dir| !dir.is_empty())
        .unwrap_or("compose")
        .to_string();
    let content = lines.join("\n").trim_end().to_string();
    let services = compose_services(&content);
    ComposeProject {
        name,
        path,
        services,
        content,
    }
}

/// Top-level keys under `services:` in a compose file.
pub fn compose_services(content: &str) -> Vec<String> {
    let mut services = Vec::new();
    let mut in_services = false;
    let mut service_indent: Option<usize> = None;

    for line in content.lines() {
        let trimmed = line.trim_end();
        let body = trimmed.trim_start();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        let indent = trimmed.len() - body.len();

        if indent == 0 {
            in_services = body == "services:";
            service_indent = None;
            continue;
        }
        if !in_services {
            continue;
        }

        let indent_of_services = *service_indent.get_or_insert(indent);
        if indent == indent_of_services {
            if let Some(name) = body.strip_suffix(':') {
                services.push(name.trim_matches(['"', '\'']).to_string());
            }
        }
    }
    services
}

pub async fn list_containers(session: &Session) -> GatewayResult<Completed<Vec<DockerContainer>>> {
    let stats = session.run(&ContainerStatsCmd).await?;
    let listed = session.run_completed(&ListContainersCmd).await?;

    Ok(listed.map(|mut containers| {
        for container in containers.iter_mut() {
            if let Some(s) = stats.get(&container.id) {
                container.cpu_percent = s.cpu_percent;
                container.memory_usage = s.memory_usage;
                container.memory_limit = s.memory_limit;
            }
        }
        containers
    }))
}

pub async fn container_details(session: &Session, container: &str) -> GatewayResult<ContainerDetails> {
    session
        .run(&InspectContainerCmd {
            container: container.to_string(),
        })
        .await
        .map_err(|e| not_found_on(e, &["no such"], &format!("Container {}", container)))
}

/// Issues the action, then waits `SETTLE_DELAY` so a following re-fetch sees
/// the daemon's new state.
pub async fn container_action(
    session: &Session,
    container: &str,
    action: ContainerAction,
) -> GatewayResult<()> {
    info!("docker {} {}", action.verb(), container);
    session
        .run(&ContainerActionCmd {
            container: container.to_string(),
            action,
        })
        .await
        .map_err(|e| not_found_on(e, &["no such container"], &format!("Container {}", container)))?;
    tokio::time::sleep(SETTLE_DELAY).await;
    Ok(())
}

pub async fn container_logs(session: &Session, container: &str, lines: u32) -> GatewayResult<String> {
    session
        .run(&ContainerLogsCmd {
            container: container.to_string(),
            lines,
        })
        .await
        .map_err(|e| not_found_on(e, &["no such container"], &format!("Container {}", container)))
}

pub async fn list_images(session: &Session) -> GatewayResult<Vec<DockerImage>> {
    let mut images = session.run(&ListImagesCmd).await?;
    if images.is_empty() {
        return Ok(images);
    }

    let mut ids: Vec<String> = images.iter().map(|i| i.id.clone()).collect();
    ids.sort();
    ids.dedup();
    let arch = session.run(&ImageArchitectureCmd { ids }).await?;
    for image in images.iter_mut() {
        if let Some(a) = arch.get(&image.id) {
            image.architecture = a.clone();
        }
    }
    Ok(images)
}

pub async fn list_volumes(session: &Session) -> GatewayResult<Vec<DockerVolume>> {
    session.run(&ListVolumesCmd).await
}

pub async fn list_networks(session: &Session) -> GatewayResult<Vec<DockerNetwork>> {
    session.run(&ListNetworksCmd).await
}

pub async fn discover_compose_projects(
    session: &Session,
) -> GatewayResult<Completed<Vec<ComposeProject>>> {
    let cmd = ScanComposeCmd {
        roots: COMPOSE_ROOTS.iter().map(|r| r.to_string()).collect(),
    };
    let projects = session.run_completed(&cmd).await?;
    debug!("Discovered {} compose projects", projects.value.len());
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{scripted_session, ScriptedShell};
    use std::sync::Arc;

    const PS: &str = "\
aaa111|web|nginx:1.25|Up 2 hours|running|0.0.0.0:8080->80/tcp, :::8080->80/tcp
bbb222|db|postgres:16|Exited (0) 3 days ago|exited|
";
    const STATS: &str = "aaa111|1.50%|12.5MiB / 1GiB\n";

    #[test]
    fn ports_column_is_parsed() {
        let ports = parse_ports("0.0.0.0:8080->80/tcp, :::8443->443/tcp, 9000/udp");
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].host_ip, "0.0.0.0");
        assert_eq!(ports[0].host_port, "8080");
        assert_eq!(ports[0].container_port, "80");
        assert_eq!(ports[1].host_ip, "::");
        assert_eq!(ports[1].host_port, "8443");
        assert_eq!(ports[2].host_port, "");
        assert_eq!(ports[2].protocol, "udp");
    }

    #[test]
    fn compose_service_names_are_top_level_keys() {
        let content = "\
version: '3'
services:
  web:
    image: nginx
    ports:
      - 80:80
  worker:
    image: app
volumes:
  data:
";
        assert_eq!(compose_services(content), vec!["web", "worker"]);
    }

    #[test]
    fn scan_output_is_split_per_file() {
        let output = "\
==> /opt/shop/docker-compose.yml
services:
  api:
    image: shop

==> /srv/blog/compose.yaml
services:
  ghost:
    image: ghost
";
        let projects = ScanComposeCmd { roots: vec![] }.parse_output(output).unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].name, "shop");
        assert_eq!(projects[0].services, vec!["api"]);
        assert_eq!(projects[1].name, "blog");
        assert_eq!(projects[1].path, "/srv/blog/compose.yaml");
    }

    #[test]
    fn scan_is_limited_to_allow_listed_roots() {
        let cmd = ScanComposeCmd {
            roots: COMPOSE_ROOTS.iter().map(|r| r.to_string()).collect(),
        };
        let shell = cmd.to_shell_string();
        assert!(shell.starts_with("find /opt /srv /home /root /var/www -maxdepth 4"));
    }

    #[tokio::test]
    async fn containers_are_joined_with_stats() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("docker stats", STATS);
        shell.respond("docker ps -a", PS);
        let session = scripted_session(shell);

        let containers = list_containers(&session).await.unwrap().value;
        assert_eq!(containers.len(), 2);
        let web = &containers[0];
        assert_eq!(web.name, "web");
        assert_eq!(web.cpu_percent, 1.5);
        assert_eq!(web.memory_usage, 13_107_200);
        assert_eq!(web.memory_limit, 1 << 30);
        assert_eq!(web.ports.len(), 2);
        assert_eq!(containers[1].state, "exited");
        assert_eq!(containers[1].memory_usage, 0);
    }

    #[tokio::test]
    async fn missing_container_inspect_is_not_found() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond_full("docker inspect", "[]", "Error: No such container: ghost", 1);
        let session = scripted_session(shell);

        let err = container_details(&session, "ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn inspect_output_maps_to_details() {
        let inspect = r#"[{
            "Id": "aaa111",
            "Name": "/web",
            "Created": "2024-01-01T00:00:00Z",
            "State": {"Status": "running", "StartedAt": "2024-01-02T00:00:00Z"},
            "Config": {"Image": "nginx:1.25", "Env": ["A=1"], "Cmd": ["nginx", "-g", "daemon off;"],
                       "Entrypoint": null, "WorkingDir": "/", "User": "", "Labels": {"b": "2", "a": "1"}},
            "HostConfig": {"RestartPolicy": {"Name": "always"}, "Memory": 0, "NanoCpus": 500000000},
            "NetworkSettings": {"Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}], "443/tcp": null},
                                "Networks": {"bridge": {}}},
            "Mounts": [{"Source": "/data", "Destination": "/usr/share/nginx/html", "RW": false}]
        }]"#;
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("docker inspect", inspect);
        let session = scripted_session(shell);

        let details = container_details(&session, "web").await.unwrap();
        assert_eq!(details.name, "web");
        assert_eq!(details.command, "nginx -g daemon off;");
        assert_eq!(details.memory_limit, "unlimited");
        assert_eq!(details.cpu_limit, "0.50");
        assert_eq!(details.labels[0].key, "a");
        assert_eq!(details.volumes[0].mode, "ro");
        assert_eq!(details.ports.len(), 2);
        assert_eq!(details.networks, vec!["bridge"]);
    }

    #[tokio::test(start_paused = true)]
    async fn action_waits_for_settle_delay() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("docker restart web", "web\n");
        let session = scripted_session(shell.clone());

        let started = tokio::time::Instant::now();
        container_action(&session, "web", ContainerAction::Restart)
            .await
            .unwrap();
        assert!(started.elapsed() >= SETTLE_DELAY);
        assert_eq!(shell.executed(), vec!["docker restart web"]);
    }
}
