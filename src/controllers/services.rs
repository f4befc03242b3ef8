use crate::controllers::not_found_on;
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::remote_cmd::{quote, RemoteCommand};
use crate::server::session::Session;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub state: String,
    pub sub_state: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    fn verb(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

/// Unit names as systemd accepts them, e.g. `nginx`, `getty@tty1.service`.
fn validate_unit(name: &str) -> GatewayResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 256
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | ':'));
    if valid {
        Ok(())
    } else {
        Err(GatewayError::ValidationFailed(format!(
            "Invalid service name: {:?}",
            name
        )))
    }
}

pub struct ListServicesCmd;

impl RemoteCommand for ListServicesCmd {
    type Output = Vec<ServiceInfo>;

    fn to_shell_string(&self) -> String {
        "systemctl list-units --type=service --all --no-pager --no-legend --plain".to_string()
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let mut services: Vec<ServiceInfo> = output
            .lines()
            .filter_map(|line| {
                // UNIT LOAD ACTIVE SUB DESCRIPTION...
                let line = line.trim().trim_start_matches('●').trim();
                let mut parts = line.split_whitespace();
                let unit = parts.next()?;
                let _load = parts.next()?;
                let state = parts.next()?;
                let sub_state = parts.next()?;
                let description = parts.collect::<Vec<_>>().join(" ");
                Some(ServiceInfo {
                    name: unit.trim_end_matches(".service").to_string(),
                    state: state.to_string(),
                    sub_state: sub_state.to_string(),
                    description,
                })
            })
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }
}

pub struct ServiceActionCmd {
    pub name: String,
    pub action: ServiceAction,
}

impl RemoteCommand for ServiceActionCmd {
    type Output = ();

    fn to_shell_string(&self) -> String {
        format!("systemctl {} {}", self.action.verb(), quote(&self.name))
    }

    fn parse_output(&self, _output: &str) -> GatewayResult<()> {
        Ok(())
    }
}

pub struct ServiceLogsCmd {
    pub name: String,
    pub lines: u32,
}

impl RemoteCommand for ServiceLogsCmd {
    type Output = String;

    fn to_shell_string(&self) -> String {
        format!(
            "journalctl -u {} -n {} --no-pager",
            quote(&self.name),
            self.lines
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<String> {
        Ok(output.to_string())
    }
}

pub async fn list_services(session: &Session) -> GatewayResult<Completed<Vec<ServiceInfo>>> {
    session.run_completed(&ListServicesCmd).await
}

pub async fn service_action(session: &Session, name: &str, action: ServiceAction) -> GatewayResult<()> {
    validate_unit(name)?;
    info!("systemctl {} {}", action.verb(), name);
    session
        .run(&ServiceActionCmd {
            name: name.to_string(),
            action,
        })
        .await
        .map_err(|e| not_found_on(e, &["not found", "not loaded"], &format!("Service {}", name)))
}

pub async fn service_logs(session: &Session, name: &str, lines: u32) -> GatewayResult<String> {
    validate_unit(name)?;
    session
        .run(&ServiceLogsCmd {
            name: name.to_string(),
            lines,
        })
        .await
}
