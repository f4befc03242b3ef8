use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::remote_cmd::{quote, RemoteCommand};
use crate::server::session::Session;
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

const LOCK_TARGET: &str = "ufw";

static WELL_KNOWN_PORTS: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (20, "FTP Data"),
        (21, "FTP"),
        (22, "SSH"),
        (25, "SMTP"),
        (53, "DNS"),
        (80, "HTTP"),
        (110, "POP3"),
        (143, "IMAP"),
        (443, "HTTPS"),
        (465, "SMTPS"),
        (587, "SMTP Submission"),
        (993, "IMAPS"),
        (995, "POP3S"),
        (1194, "OpenVPN"),
        (2375, "Docker"),
        (2376, "Docker TLS"),
        (3000, "Node.js"),
        (3306, "MySQL"),
        (5432, "PostgreSQL"),
        (5672, "RabbitMQ"),
        (6379, "Redis"),
        (8080, "HTTP Alt"),
        (8443, "HTTPS Alt"),
        (9000, "PHP-FPM"),
        (9090, "Prometheus"),
        (27017, "MongoDB"),
        (51820, "WireGuard"),
    ])
});

pub fn service_name(port: u16) -> Option<String> {
    WELL_KNOWN_PORTS.get(&port).map(|s| s.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UfwRule {
    pub number: u32,
    /// Rule text as listed by `ufw status numbered`, without the position.
    pub rule: String,
    pub to: String,
    pub action: String,
    pub direction: String,
    pub from: String,
    pub port: Option<String>,
    pub protocol: Option<String>,
    pub comment: Option<String>,
    pub v6: bool,
}

impl UfwRule {
    fn allows(&self) -> bool {
        matches!(self.action.as_str(), "ALLOW" | "LIMIT") && self.direction != "OUT"
    }

    /// Whether this rule's port spec (`22`, `80,443`, `6000:6007`) covers `port`.
    fn covers(&self, port: u16, protocol: &str) -> bool {
        let Some(spec) = self.port.as_deref() else {
            return false;
        };
        if let Some(proto) = self.protocol.as_deref() {
            if proto != protocol {
                return false;
            }
        }
        spec.split(',').any(|part| match part.split_once(':') {
            Some((lo, hi)) => match (lo.parse::<u16>(), hi.parse::<u16>()) {
                (Ok(lo), Ok(hi)) => (lo..=hi).contains(&port),
                _ => false,
            },
            None => part.parse::<u16>() == Ok(port),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: String,
    pub protocol: String,
    pub action: String,
    pub source: String,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningPort {
    pub port: u16,
    pub protocol: String,
    pub address: String,
    pub process: Option<String>,
    pub service_name: Option<String>,
    pub allowed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UfwStats {
    pub total_rules: u32,
    pub allow_rules: u32,
    pub deny_rules: u32,
    pub limit_rules: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UfwOverview {
    pub active: bool,
    pub logging: String,
    pub default_policy: String,
    pub rules: Vec<UfwRule>,
    pub open_ports: Vec<PortInfo>,
    pub blocked_ports: Vec<PortInfo>,
    pub listening_ports: Vec<ListeningPort>,
    pub stats: UfwStats,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UfwVerbose {
    pub active: bool,
    pub logging: String,
    pub default_policy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
    Reject,
    Limit,
}

impl RuleAction {
    fn verb(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
            RuleAction::Reject => "reject",
            RuleAction::Limit => "limit",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UfwRuleRequest {
    pub action: RuleAction,
    pub port: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl UfwRuleRequest {
    pub fn validate(&self) -> GatewayResult<()> {
        let invalid = |msg: String| Err(GatewayError::ValidationFailed(msg));

        let protocol = self.protocol.as_deref().unwrap_or("any");
        if !matches!(protocol, "tcp" | "udp" | "any") {
            return invalid(format!("Invalid protocol: {}", protocol));
        }

        // ufw takes up to 15 comma-separated ports or `lo:hi` ranges
        let entries: Vec<&str> = self.port.split(',').collect();
        if entries.len() > MAX_PORT_ENTRIES {
            return invalid(format!(
                "At most {} ports can be listed in one rule",
                MAX_PORT_ENTRIES
            ));
        }
        let mut has_range = false;
        for entry in &entries {
            match entry.split_once(':') {
                Some((lo, hi)) => match (parse_port(lo), parse_port(hi)) {
                    (Some(lo), Some(hi)) if lo < hi => has_range = true,
                    _ => return invalid(format!("Invalid port range: {}", entry)),
                },
                None => {
                    if parse_port(entry).is_none() {
                        return invalid(format!("Invalid port: {}", entry));
                    }
                }
            }
        }
        if (has_range || entries.len() > 1) && protocol == "any" {
            return invalid("Port lists and ranges need a protocol (tcp or udp)".to_string());
        }

        if let Some(from) = self.from.as_deref().filter(|f| *f != "any") {
            let (addr, prefix) = from.split_once('/').unwrap_or((from, ""));
            let addr_ok = addr.parse::<IpAddr>().is_ok();
            let max_prefix = if addr.contains(':') { 128 } else { 32 };
            let prefix_ok = prefix.is_empty() || prefix.parse::<u8>().is_ok_and(|p| p <= max_prefix);
            if !(addr_ok && prefix_ok) {
                return invalid(format!("Invalid source address: {}", from));
            }
        }

        if let Some(comment) = &self.comment {
            if comment.len() > 128 || comment.contains(['\'', '\n', '\r']) {
                return invalid("Comment must be a single line without quotes".to_string());
            }
        }
        Ok(())
    }

    fn to_command(&self) -> String {
        let protocol = self.protocol.as_deref().filter(|p| *p != "any");
        let mut command = format!("ufw {}", self.action.verb());
        match self.from.as_deref().filter(|f| *f != "any") {
            Some(from) => {
                command.push_str(&format!(" from {} to any port {}", quote(from), self.port));
                if let Some(proto) = protocol {
                    command.push_str(&format!(" proto {}", proto));
                }
            }
            None => match protocol {
                Some(proto) => command.push_str(&format!(" {}/{}", self.port, proto)),
                None => command.push_str(&format!(" {}", self.port)),
            },
        }
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            command.push_str(&format!(" comment {}", quote(comment)));
        }
        command
    }
}

const MAX_PORT_ENTRIES: usize = 15;

fn parse_port(text: &str) -> Option<u16> {
    text.parse::<u16>().ok().filter(|p| *p > 0)
}

/// Splits on runs of two or more spaces, the way ufw aligns its columns.
fn columns(text: &str) -> Vec<&str> {
    text.split("  ")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

fn normalize(rule: &str) -> String {
    rule.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn parse_rule_line(line: &str) -> Option<UfwRule> {
    let line = line.trim();
    let rest = line.strip_prefix('[')?;
    let (number, body) = rest.split_once(']')?;
    let number = number.trim().parse().ok()?;
    let body = body.trim();

    let (main, comment) = match body.split_once(" # ") {
        Some((main, comment)) => (main.trim_end(), Some(comment.trim().to_string())),
        None => (body, None),
    };
    let cols = columns(main);
    if cols.len() < 3 {
        return None;
    }
    let to = cols[0].to_string();
    let mut action_parts = cols[1].split_whitespace();
    let action = action_parts.next()?.to_string();
    let direction = action_parts.next().unwrap_or("IN").to_string();
    let from = cols[2..].join(" ");

    let target = to.split_whitespace().next().unwrap_or("");
    let (port, protocol) = match target.split_once('/') {
        Some((port, proto)) => (port, Some(proto.to_string())),
        None => (target, None),
    };
    let port = port
        .starts_with(|c: char| c.is_ascii_digit())
        .then(|| port.to_string());

    Some(UfwRule {
        number,
        rule: normalize(body),
        v6: to.contains("(v6)"),
        to,
        action,
        direction,
        from,
        port,
        protocol,
        comment,
    })
}

pub struct NumberedRulesCmd;

impl RemoteCommand for NumberedRulesCmd {
    type Output = Vec<UfwRule>;

    fn to_shell_string(&self) -> String {
        "ufw status numbered".to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        Ok(output.lines().filter_map(parse_rule_line).collect())
    }
}

pub struct VerboseStatusCmd;

impl RemoteCommand for VerboseStatusCmd {
    type Output = UfwVerbose;

    fn to_shell_string(&self) -> String {
        "ufw status verbose".to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let mut status = UfwVerbose::default();
        for line in output.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim().to_string();
                match key.trim() {
                    "Status" => status.active = value == "active",
                    "Logging" => status.logging = value,
                    "Default" => status.default_policy = value,
                    _ => {}
                }
            }
        }
        Ok(status)
    }
}

pub struct ListeningPortsCmd;

impl RemoteCommand for ListeningPortsCmd {
    type Output = Vec<ListeningPort>;

    fn to_shell_string(&self) -> String {
        "ss -tulnpH".to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let mut ports: Vec<ListeningPort> = Vec::new();
        for line in output.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 5 {
                continue;
            }
            let protocol = tokens[0].to_string();
            let Some((address, port)) = tokens[4].rsplit_once(':') else {
                continue;
            };
            let Ok(port) = port.parse::<u16>() else {
                continue;
            };
            if ports.iter().any(|p| p.port == port && p.protocol == protocol) {
                continue;
            }
            let process = tokens.get(6).and_then(|users| {
                let start = users.find("((\"")? + 3;
                let end = users[start..].find('"')? + start;
                Some(users[start..end].to_string())
            });
            ports.push(ListeningPort {
                port,
                protocol,
                address: address.trim_start_matches('[').trim_end_matches(']').to_string(),
                process,
                service_name: service_name(port),
                allowed: false,
            });
        }
        ports.sort_by(|a, b| (a.port, &a.protocol).cmp(&(b.port, &b.protocol)));
        Ok(ports)
    }
}

/// Combines ufw state with what is actually listening on the host.
pub fn build_overview(status: UfwVerbose, rules: Vec<UfwRule>, mut listening: Vec<ListeningPort>) -> UfwOverview {
    let mut stats = UfwStats {
        total_rules: rules.len() as u32,
        ..Default::default()
    };
    let mut open_ports = Vec::new();
    let mut blocked_ports = Vec::new();

    for rule in &rules {
        match rule.action.as_str() {
            "ALLOW" => stats.allow_rules += 1,
            "DENY" | "REJECT" => stats.deny_rules += 1,
            "LIMIT" => stats.limit_rules += 1,
            _ => {}
        }
        let Some(port) = &rule.port else {
            continue;
        };
        if rule.v6 || rule.direction == "OUT" {
            continue;
        }
        let info = PortInfo {
            port: port.clone(),
            protocol: rule.protocol.clone().unwrap_or_else(|| "any".to_string()),
            action: rule.action.clone(),
            source: rule.from.clone(),
            service_name: port.parse().ok().and_then(service_name),
        };
        if rule.allows() {
            open_ports.push(info);
        } else {
            blocked_ports.push(info);
        }
    }

    for listener in listening.iter_mut() {
        listener.allowed = rules
            .iter()
            .any(|r| r.allows() && r.covers(listener.port, &listener.protocol));
    }

    UfwOverview {
        active: status.active,
        logging: status.logging,
        default_policy: status.default_policy,
        rules,
        open_ports,
        blocked_ports,
        listening_ports: listening,
        stats,
    }
}

pub async fn overview(session: &Session) -> GatewayResult<Completed<UfwOverview>> {
    let status = session.run(&VerboseStatusCmd).await?;
    let listening = session.run(&ListeningPortsCmd).await?;
    let rules = session.run_completed(&NumberedRulesCmd).await?;
    Ok(rules.map(|rules| build_overview(status, rules, listening)))
}

pub async fn add_rule(session: &Session, request: &UfwRuleRequest) -> GatewayResult<()> {
    request.validate()?;
    let _target = session.lock_target(LOCK_TARGET).await;
    let command = request.to_command();
    info!("Adding firewall rule: {}", command);
    session.exec_checked(&command).await?;
    Ok(())
}

/// Deletes the rule at `position` only if it still reads `expected`.
pub async fn delete_rule(session: &Session, position: u32, expected: &str) -> GatewayResult<()> {
    let _target = session.lock_target(LOCK_TARGET).await;
    let rules = session.run(&NumberedRulesCmd).await?;

    let Some(rule) = rules.iter().find(|r| r.number == position) else {
        return Err(GatewayError::StaleIndex(format!(
            "No firewall rule at position {}",
            position
        )));
    };
    if rule.rule != normalize(expected) {
        debug!("Rule {} is now {:?}, expected {:?}", position, rule.rule, expected);
        return Err(GatewayError::StaleIndex(format!(
            "Firewall rule {} changed since it was listed",
            position
        )));
    }

    info!("Deleting firewall rule {}: {}", position, rule.rule);
    session
        .exec_checked(&format!("ufw --force delete {}", position))
        .await?;
    Ok(())
}

/// Returns false when the port was already allowed.
pub async fn allow_listening_port(session: &Session, port: u16, protocol: Option<&str>) -> GatewayResult<bool> {
    let _target = session.lock_target(LOCK_TARGET).await;
    let listening = session.run(&ListeningPortsCmd).await?;
    let Some(listener) = listening
        .iter()
        .find(|l| l.port == port && protocol.map_or(true, |p| l.protocol == p))
    else {
        return Err(GatewayError::NotFound(format!(
            "Nothing is listening on port {}",
            port
        )));
    };

    let rules = session.run(&NumberedRulesCmd).await?;
    if rules
        .iter()
        .any(|r| r.allows() && r.covers(port, &listener.protocol))
    {
        debug!("Port {}/{} already allowed", port, listener.protocol);
        return Ok(false);
    }

    info!("Allowing listening port {}/{}", port, listener.protocol);
    session
        .exec_checked(&format!("ufw allow {}/{}", port, listener.protocol))
        .await?;
    Ok(true)
}

pub async fn set_enabled(session: &Session, enabled: bool) -> GatewayResult<()> {
    let _target = session.lock_target(LOCK_TARGET).await;
    let command = if enabled { "ufw --force enable" } else { "ufw disable" };
    info!("{}", command);
    session.exec_checked(command).await?;
    Ok(())
}
