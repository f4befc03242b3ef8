use crate::database::models::{AuthMethod, ServerProfile};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
pub struct SshConnectConfig {
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub auth: AuthMethod,
}

impl From<&ServerProfile> for SshConnectConfig {
    fn from(profile: &ServerProfile) -> Self {
        Self {
            ssh_host: profile.host.clone(),
            ssh_port: profile.port,
            ssh_user: profile.username.clone(),
            auth: profile.auth_method.clone(),
        }
    }
}

impl SshConnectConfig {
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.ssh_user, self.ssh_host, self.ssh_port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Snapshot of the connection as seen by the UI; holds no session ownership.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub host: Option<String>,
    pub last_error: Option<String>,
    pub connected_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
}

impl ConnectionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Connection failed".to_string()
        } else {
            message
        };
        Self {
            success: false,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr when present, stdout otherwise.
    pub fn error_text(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// A value read from the remote host, tagged with the completion sequence of
/// the last execution that produced it.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub seq: u64,
    pub value: T,
}

impl<T> Completed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completed<U> {
        Completed {
            seq: self.seq,
            value: f(self.value),
        }
    }
}
