use crate::error::GatewayResult;
use crate::server::remote_cmd::RemoteCommand;
use crate::server::session::Session;
use serde::{Deserialize, Serialize};

const UFW_MARKER: &str = "@@ufw";
const WHO_MARKER: &str = "@@who";
const LAST_MARKER: &str = "@@last";
const LASTB_MARKER: &str = "@@lastb";

const RECENT_LOGINS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub timestamp: String,
    pub username: String,
    pub ip: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub open_ports: Vec<u16>,
    pub firewall_active: bool,
    pub ssh_sessions: Vec<String>,
    pub recent_logins: Vec<LoginAttempt>,
}

fn parse_logins(output: &str, success: bool) -> Vec<LoginAttempt> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 4 || matches!(tokens[0], "reboot" | "shutdown" | "wtmp" | "btmp") {
                return None;
            }
            let end = tokens.len().min(7);
            Some(LoginAttempt {
                username: tokens[0].to_string(),
                ip: tokens[2].to_string(),
                timestamp: tokens[3..end].join(" "),
                success,
            })
        })
        .collect()
}

pub struct SecurityInfoCmd;

impl RemoteCommand for SecurityInfoCmd {
    type Output = SecurityInfo;

    fn to_shell_string(&self) -> String {
        format!(
            "ss -tulnH 2>/dev/null; echo {u}; ufw status 2>/dev/null | head -1; echo {w}; who 2>/dev/null; \
             echo {l}; last -n {n} -w -i 2>/dev/null; echo {lb}; lastb -n {n} -w -i 2>/dev/null; true",
            u = UFW_MARKER,
            w = WHO_MARKER,
            l = LAST_MARKER,
            lb = LASTB_MARKER,
            n = RECENT_LOGINS
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let (ss, rest) = output.split_once(UFW_MARKER).unwrap_or((output, ""));
        let (ufw, rest) = rest.split_once(WHO_MARKER).unwrap_or((rest, ""));
        // lastb's marker starts with last's, so split it off first
        let (rest, lastb) = rest.split_once(LASTB_MARKER).unwrap_or((rest, ""));
        let (who, last) = rest.split_once(LAST_MARKER).unwrap_or((rest, ""));

        let mut open_ports: Vec<u16> = ss
            .lines()
            .filter_map(|line| {
                let local = line.split_whitespace().nth(4)?;
                local.rsplit_once(':')?.1.parse().ok()
            })
            .collect();
        open_ports.sort_unstable();
        open_ports.dedup();

        let mut recent_logins = parse_logins(last, true);
        recent_logins.extend(parse_logins(lastb, false));

        Ok(SecurityInfo {
            open_ports,
            firewall_active: ufw.trim() == "Status: active",
            ssh_sessions: who
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            recent_logins,
        })
    }
}

pub async fn security_info(session: &Session) -> GatewayResult<SecurityInfo> {
    session.run(&SecurityInfoCmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_parsed() {
        let output = "\
tcp LISTEN 0 128 0.0.0.0:22 0.0.0.0:*
tcp LISTEN 0 128 [::]:22 [::]:*
tcp LISTEN 0 511 0.0.0.0:80 0.0.0.0:*
@@ufw
Status: active
@@who
alice    pts/0        2024-03-05 10:00 (203.0.113.9)
@@last
alice    pts/0        203.0.113.9      Tue Mar  5 10:00   still logged in
reboot   system boot  6.1.0-18-amd64   Tue Mar  5 09:58   still running

wtmp begins Fri Mar  1 00:00:01 2024
@@lastb
admin    ssh:notty    198.51.100.7     Tue Mar  5 09:59 - 09:59  (00:00)
";
        let info = SecurityInfoCmd.parse_output(output).unwrap();
        assert_eq!(info.open_ports, vec![22, 80]);
        assert!(info.firewall_active);
        assert_eq!(info.ssh_sessions.len(), 1);
        assert_eq!(info.recent_logins.len(), 2);
        assert_eq!(info.recent_logins[0].ip, "203.0.113.9");
        assert_eq!(info.recent_logins[0].timestamp, "Tue Mar 5 10:00");
        assert!(info.recent_logins[0].success);
        assert_eq!(info.recent_logins[1].username, "admin");
        assert!(!info.recent_logins[1].success);
    }
}
