use crate::database::models::AuthMethod;
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::{ExecOutput, SshConnectConfig};
use crate::server::remote_cmd::{Connector, RemoteShell};
use crate::settings::SettingsManager;
use async_trait::async_trait;
use log::{debug, info, warn};
use russh::client::{self, Handle};
use russh::keys::{check_known_hosts, load_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct Ssh {
    session: Arc<Handle<ClientHandler>>,
    config: SshConnectConfig,
}

#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
    strict_host_key_checking: bool,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Server {}:{} presented key {}",
            self.host,
            self.port,
            server_public_key.fingerprint(Default::default())
        );

        if !self.strict_host_key_checking {
            return Ok(true);
        }

        match check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(known) => {
                if !known {
                    warn!("Host key for {}:{} is not in known_hosts", self.host, self.port);
                }
                Ok(known)
            }
            Err(e) => {
                warn!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                Ok(false)
            }
        }
    }
}

/// Expands a leading `~` to the local home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

impl Ssh {
    pub async fn init(
        config: SshConnectConfig,
        keep_alive: Duration,
        strict_host_key_checking: bool,
    ) -> GatewayResult<Ssh> {
        let ssh_config = client::Config {
            keepalive_interval: Some(keep_alive),
            ..Default::default()
        };
        let ssh_config = Arc::new(ssh_config);

        let handler = ClientHandler {
            host: config.ssh_host.clone(),
            port: config.ssh_port,
            strict_host_key_checking,
        };

        let target = format!("{}:{}", config.ssh_host, config.ssh_port);
        info!("Connecting to {}", target);
        let ssh_addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| {
                GatewayError::ConnectionFailed(format!("Failed to resolve {}: {}", target, e))
            })?
            .next()
            .ok_or_else(|| {
                GatewayError::ConnectionFailed(format!("{} resolved but no IP found", target))
            })?;

        let mut session = client::connect(ssh_config, ssh_addr, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => GatewayError::ConnectionFailed(format!(
                    "Host key verification failed for {}",
                    target
                )),
                other => GatewayError::ConnectionFailed(format!(
                    "Failed to connect to {}: {}",
                    target, other
                )),
            })?;

        let auth_res = match &config.auth {
            AuthMethod::Password { password } => session
                .authenticate_password(&config.ssh_user, password)
                .await
                .map_err(|e| GatewayError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::PrivateKey {
                key_path,
                passphrase,
            } => {
                let path = expand_home(key_path);
                let key_pair = load_secret_key(&path, passphrase.as_deref()).map_err(|e| {
                    GatewayError::AuthenticationFailed(format!(
                        "Failed to load private key {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| GatewayError::AuthenticationFailed(e.to_string()))?
                    .flatten();
                session
                    .authenticate_publickey(
                        &config.ssh_user,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await
                    .map_err(|e| GatewayError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !auth_res.success() {
            return Err(GatewayError::AuthenticationFailed(format!(
                "Server rejected credentials for {}",
                config.target()
            )));
        }

        info!("SSH authentication complete for {}", config.target());

        Ok(Self {
            session: Arc::new(session),
            config,
        })
    }
}

impl Ssh {
    async fn run_channel(&self, command: &str, input: Option<&str>) -> GatewayResult<ExecOutput> {
        if self.session.is_closed() {
            return Err(GatewayError::ConnectionFailed(format!(
                "SSH session to {} is closed",
                self.config.target()
            )));
        }

        let mut channel = self.session.channel_open_session().await.map_err(|e| {
            GatewayError::ConnectionFailed(format!("Failed to open SSH channel: {}", e))
        })?;
        channel.exec(true, command).await.map_err(|e| {
            GatewayError::ConnectionFailed(format!("Failed to start remote command: {}", e))
        })?;

        if let Some(input) = input {
            channel.data(input.as_bytes()).await.map_err(|e| {
                GatewayError::ConnectionFailed(format!("Failed to write command input: {}", e))
            })?;
            channel.eof().await.map_err(|e| {
                GatewayError::ConnectionFailed(format!("Failed to close command input: {}", e))
            })?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        // ExitStatus may arrive before the last data packets, so drain until close.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        let exit_code = match exit_code {
            Some(code) => code,
            None => {
                return Err(GatewayError::RemoteCommandFailed {
                    code: 255,
                    stderr: format!("Remote command terminated without exit status. {}", stderr),
                })
            }
        };

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
            exit_code,
        })
    }
}

#[async_trait]
impl RemoteShell for Ssh {
    async fn exec(&self, command: &str) -> GatewayResult<ExecOutput> {
        self.run_channel(command, None).await
    }

    async fn exec_with_input(&self, command: &str, input: &str) -> GatewayResult<ExecOutput> {
        self.run_channel(command, Some(input)).await
    }

    async fn close(&self) {
        debug!("Closing SSH session to {}", self.config.target());
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect returned an error: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

/// Opens real SSH sessions using the current gateway settings.
pub struct SshConnector {
    settings: Arc<SettingsManager>,
}

impl SshConnector {
    pub fn new(settings: Arc<SettingsManager>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &SshConnectConfig) -> GatewayResult<Arc<dyn RemoteShell>> {
        let settings = self.settings.get_settings();
        let ssh = Ssh::init(
            config.clone(),
            Duration::from_secs(u64::from(settings.keep_alive_interval.max(1))),
            settings.strict_host_key_checking,
        )
        .await?;
        let shell: Arc<dyn RemoteShell> = Arc::new(ssh);
        Ok(shell)
    }
}
