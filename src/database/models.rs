use crate::database::entity::{app_settings, server_profile};
use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthMethod {
    Password {
        password: String,
    },
    PrivateKey {
        key_path: String,
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    /// Parses the tagged JSON form sent by the UI. An empty key path is
    /// accepted here and checked by `validate` after the default-key fallback.
    pub fn from_value(value: serde_json::Value) -> GatewayResult<Self> {
        serde_json::from_value(value).map_err(|e| GatewayError::InvalidAuthMethod(e.to_string()))
    }

    pub fn validate(&self) -> GatewayResult<()> {
        match self {
            AuthMethod::Password { .. } => Ok(()),
            AuthMethod::PrivateKey { key_path, .. } if key_path.trim().is_empty() => Err(
                GatewayError::InvalidAuthMethod("Key path must not be empty".to_string()),
            ),
            AuthMethod::PrivateKey { .. } => Ok(()),
        }
    }

    fn auth_type(&self) -> &'static str {
        match self {
            AuthMethod::Password { .. } => "password",
            AuthMethod::PrivateKey { .. } => "key",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedServerProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    pub created_at: i64,
    pub last_connected: Option<i64>,
    pub connect_on_startup: bool,
}

impl From<ServerProfile> for SavedServerProfile {
    fn from(profile: ServerProfile) -> Self {
        SavedServerProfile {
            id: profile.id,
            name: profile.name,
            host: profile.host,
            port: profile.port,
            username: profile.username,
            auth_method: profile.auth_method,
            created_at: chrono::Utc::now().timestamp_millis(),
            last_connected: None,
            connect_on_startup: false,
        }
    }
}

impl From<SavedServerProfile> for ServerProfile {
    fn from(profile: SavedServerProfile) -> Self {
        ServerProfile {
            id: profile.id,
            name: profile.name,
            host: profile.host,
            port: profile.port,
            username: profile.username,
            auth_method: profile.auth_method,
        }
    }
}

impl TryFrom<server_profile::Model> for SavedServerProfile {
    type Error = GatewayError;

    fn try_from(entity: server_profile::Model) -> GatewayResult<Self> {
        let auth_method = match entity.auth_type.as_str() {
            "password" => AuthMethod::Password {
                password: entity.ssh_password.unwrap_or_default(),
            },
            "key" => AuthMethod::PrivateKey {
                key_path: entity.ssh_key_path.ok_or_else(|| {
                    GatewayError::InvalidAuthMethod(
                        "Key path not provided for key authentication".to_string(),
                    )
                })?,
                passphrase: entity.ssh_passphrase,
            },
            other => {
                return Err(GatewayError::InvalidAuthMethod(format!(
                    "Invalid auth type: {}",
                    other
                )))
            }
        };

        let port = u16::try_from(entity.port)
            .map_err(|_| GatewayError::Storage(format!("Invalid stored port {}", entity.port)))?;

        Ok(SavedServerProfile {
            id: entity.id,
            name: entity.name,
            host: entity.host,
            port,
            username: entity.username,
            auth_method,
            created_at: entity.created_at,
            last_connected: entity.last_connected,
            connect_on_startup: entity.connect_on_startup,
        })
    }
}

impl From<&SavedServerProfile> for server_profile::Model {
    fn from(profile: &SavedServerProfile) -> Self {
        let (ssh_password, ssh_key_path, ssh_passphrase) = match &profile.auth_method {
            AuthMethod::Password { password } => (Some(password.clone()), None, None),
            AuthMethod::PrivateKey {
                key_path,
                passphrase,
            } => (None, Some(key_path.clone()), passphrase.clone()),
        };

        server_profile::Model {
            id: profile.id.clone(),
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: i32::from(profile.port),
            username: profile.username.clone(),
            auth_type: profile.auth_method.auth_type().to_string(),
            ssh_password,
            ssh_key_path,
            ssh_passphrase,
            created_at: profile.created_at,
            last_connected: profile.last_connected,
            connect_on_startup: profile.connect_on_startup,
        }
    }
}

/// Upper bound for `metrics_history_size`.
pub const MAX_METRICS_HISTORY: u32 = 10_000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    pub connection_timeout: u32,
    pub command_timeout: u32,
    pub keep_alive_interval: u32,
    pub metrics_interval: u32,
    pub container_poll_interval: u32,
    pub metrics_history_size: u32,
    pub log_tail_lines: u32,
    pub use_sudo: bool,
    pub strict_host_key_checking: bool,
    pub default_ssh_key: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            connection_timeout: 10,
            command_timeout: 30,
            keep_alive_interval: 30,
            metrics_interval: 10,
            container_poll_interval: 15,
            metrics_history_size: 60,
            log_tail_lines: 100,
            use_sudo: false,
            strict_host_key_checking: false,
            default_ssh_key: None,
        }
    }
}

impl GatewaySettings {
    pub fn validate(&self) -> GatewayResult<()> {
        let positive = [
            ("connection_timeout", self.connection_timeout),
            ("command_timeout", self.command_timeout),
            ("metrics_interval", self.metrics_interval),
            ("container_poll_interval", self.container_poll_interval),
            ("metrics_history_size", self.metrics_history_size),
            ("log_tail_lines", self.log_tail_lines),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(GatewayError::ValidationFailed(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.metrics_history_size > MAX_METRICS_HISTORY {
            return Err(GatewayError::ValidationFailed(format!(
                "metrics_history_size must be at most {}",
                MAX_METRICS_HISTORY
            )));
        }
        Ok(())
    }
}

impl From<app_settings::Model> for GatewaySettings {
    fn from(s: app_settings::Model) -> Self {
        let defaults = GatewaySettings::default();
        let non_negative = |v: i32, fallback: u32| u32::try_from(v).unwrap_or(fallback);
        Self {
            connection_timeout: non_negative(s.connection_timeout, defaults.connection_timeout),
            command_timeout: non_negative(s.command_timeout, defaults.command_timeout),
            keep_alive_interval: non_negative(s.keep_alive_interval, defaults.keep_alive_interval),
            metrics_interval: non_negative(s.metrics_interval, defaults.metrics_interval),
            container_poll_interval: non_negative(
                s.container_poll_interval,
                defaults.container_poll_interval,
            ),
            metrics_history_size: non_negative(
                s.metrics_history_size,
                defaults.metrics_history_size,
            ),
            log_tail_lines: non_negative(s.log_tail_lines, defaults.log_tail_lines),
            use_sudo: s.use_sudo,
            strict_host_key_checking: s.strict_host_key_checking,
            default_ssh_key: s.default_ssh_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_method_parses_tagged_variants() {
        let key = AuthMethod::from_value(json!({
            "type": "PrivateKey",
            "key_path": "~/.ssh/id_ed25519",
            "passphrase": null
        }))
        .unwrap();
        assert!(matches!(key, AuthMethod::PrivateKey { .. }));

        let password =
            AuthMethod::from_value(json!({"type": "Password", "password": "hunter2"})).unwrap();
        assert!(matches!(password, AuthMethod::Password { .. }));

        let empty_key =
            AuthMethod::from_value(json!({"type": "PrivateKey", "key_path": "", "passphrase": null}))
                .unwrap();
        assert!(empty_key.validate().is_err());
    }

    #[test]
    fn unknown_auth_variant_is_rejected() {
        let err = AuthMethod::from_value(json!({"type": "Kerberos", "ticket": "x"})).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAuthMethod(_)));
    }

    #[test]
    fn stored_auth_type_must_be_known() {
        let mut model = server_profile::Model::from(&SavedServerProfile::from(ServerProfile {
            id: "a".into(),
            name: "VPS1".into(),
            host: "10.0.0.5".into(),
            port: 22,
            username: "root".into(),
            auth_method: AuthMethod::Password {
                password: "pw".into(),
            },
        }));
        model.auth_type = "gssapi".into();
        let err = SavedServerProfile::try_from(model).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAuthMethod(_)));
    }

    #[test]
    fn zero_intervals_fail_validation() {
        let settings = GatewaySettings {
            metrics_interval: 0,
            ..GatewaySettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(GatewaySettings::default().validate().is_ok());
    }

    #[test]
    fn history_size_is_bounded() {
        let huge = GatewaySettings {
            metrics_history_size: 4_000_000_000,
            ..GatewaySettings::default()
        };
        assert!(matches!(huge.validate(), Err(GatewayError::ValidationFailed(_))));

        let largest = GatewaySettings {
            metrics_history_size: MAX_METRICS_HISTORY,
            ..GatewaySettings::default()
        };
        assert!(largest.validate().is_ok());
    }
}
