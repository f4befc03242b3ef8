use crate::error::GatewayResult;
use crate::server::remote_cmd::RemoteCommand;
use crate::server::session::Session;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

pub struct SystemLogsCmd {
    pub lines: u32,
}

impl RemoteCommand for SystemLogsCmd {
    type Output = Vec<LogEntry>;

    fn to_shell_string(&self) -> String {
        format!("journalctl -n {} --no-pager -o short-iso", self.lines)
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        Ok(output
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with("-- "))
            .map(|line| match line.split_once(' ') {
                Some((timestamp, message)) => LogEntry {
                    timestamp: timestamp.to_string(),
                    message: message.trim().to_string(),
                },
                None => LogEntry {
                    timestamp: String::new(),
                    message: line.to_string(),
                },
            })
            .collect())
    }
}

pub async fn system_logs(session: &Session, lines: u32) -> GatewayResult<Vec<LogEntry>> {
    session.run(&SystemLogsCmd { lines }).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_lines_split_at_timestamp() {
        let output = "\
-- Logs begin at Fri 2024-03-01 00:00:01 UTC. --
2024-03-05T10:00:00+0000 vps sshd[811]: Accepted publickey for alice
2024-03-05T10:00:01+0000 vps systemd[1]: Started Session 4 of user alice.
";
        let entries = SystemLogsCmd { lines: 2 }.parse_output(output).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, "2024-03-05T10:00:00+0000");
        assert_eq!(entries[0].message, "vps sshd[811]: Accepted publickey for alice");
    }
}
