use crate::cache::ResourceCache;
use crate::database::models::ServerProfile;
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::{ConnectionResult, ConnectionState, ConnectionStatus, SshConnectConfig};
use crate::server::remote_cmd::Connector;
use crate::server::session::{Session, SessionOptions};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::timeout;

/// Owns the single active session. Everyone else borrows `Arc<Session>` for
/// the duration of one call or reads the published status.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    cache: Arc<ResourceCache>,
    active: RwLock<Option<Arc<Session>>>,
    lifecycle: Mutex<()>,
    epoch: AtomicU64,
    completion_seq: Arc<AtomicU64>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, cache: Arc<ResourceCache>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            connector,
            cache,
            active: RwLock::new(None),
            lifecycle: Mutex::new(()),
            epoch: AtomicU64::new(0),
            completion_seq: Arc::new(AtomicU64::new(0)),
            status_tx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// The active session, or `NotConnected`.
    ///
    /// A session whose transport dropped underneath us is torn down here so
    /// that nothing keeps reading through a dead connection.
    pub async fn session(&self) -> GatewayResult<Arc<Session>> {
        let session = self.active.read().await.clone();
        match session {
            Some(session) if session.is_active() => Ok(session),
            Some(session) => {
                let _lifecycle = self.lifecycle.lock().await;
                let still_active = self
                    .active
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &session));
                if still_active {
                    warn!(
                        "Session to {} was lost, invalidating",
                        session.profile().name
                    );
                    self.teardown(Some("Connection lost".to_string())).await;
                }
                Err(GatewayError::NotConnected)
            }
            None => Err(GatewayError::NotConnected),
        }
    }

    pub async fn connect(
        &self,
        profile: &ServerProfile,
        connect_timeout: Duration,
        options: SessionOptions,
    ) -> ConnectionResult {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown(None).await;

        let config = SshConnectConfig::from(profile);
        info!("Connecting to {} ({})", profile.name, config.target());
        self.status_tx.send_replace(ConnectionStatus {
            state: ConnectionState::Connecting,
            profile_id: Some(profile.id.clone()),
            profile_name: Some(profile.name.clone()),
            host: Some(profile.host.clone()),
            ..Default::default()
        });

        let shell = match timeout(connect_timeout, self.connector.connect(&config)).await {
            Ok(Ok(shell)) => shell,
            Ok(Err(e)) => return self.report_failure(profile, e.to_string()),
            Err(_) => {
                return self.report_failure(
                    profile,
                    format!(
                        "Connection to {} timed out after {}s",
                        config.target(),
                        connect_timeout.as_secs()
                    ),
                )
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.cache.reset(epoch);
        let session = Arc::new(Session::new(
            epoch,
            profile.clone(),
            shell,
            self.completion_seq.clone(),
            options,
        ));
        *self.active.write().await = Some(session);

        self.status_tx.send_replace(ConnectionStatus {
            state: ConnectionState::Connected,
            profile_id: Some(profile.id.clone()),
            profile_name: Some(profile.name.clone()),
            host: Some(profile.host.clone()),
            last_error: None,
            connected_at: Some(chrono::Utc::now().timestamp_millis()),
        });
        info!("Connected to {} (epoch {})", profile.name, epoch);

        ConnectionResult::ok(format!("Connected to {}", config.target()))
    }

    /// Opens a throwaway session and proves it can run a command. Leaves the
    /// active connection and all caches untouched.
    pub async fn test(&self, config: &SshConnectConfig, connect_timeout: Duration) -> ConnectionResult {
        debug!("Testing connection to {}", config.target());
        let shell = match timeout(connect_timeout, self.connector.connect(config)).await {
            Ok(Ok(shell)) => shell,
            Ok(Err(e)) => return ConnectionResult::failed(e.to_string()),
            Err(_) => {
                return ConnectionResult::failed(format!(
                    "Connection to {} timed out after {}s",
                    config.target(),
                    connect_timeout.as_secs()
                ))
            }
        };

        let probe = timeout(connect_timeout, shell.exec("echo ok")).await;
        shell.close().await;

        match probe {
            Ok(Ok(output)) if output.success() => {
                ConnectionResult::ok(format!("Successfully connected to {}", config.target()))
            }
            Ok(Ok(output)) => ConnectionResult::failed(format!(
                "Connected but command execution failed: {}",
                output.error_text()
            )),
            Ok(Err(e)) => ConnectionResult::failed(e.to_string()),
            Err(_) => ConnectionResult::failed("Connected but command execution timed out"),
        }
    }

    /// Always succeeds; calling it with nothing connected is a no-op apart
    /// from cache invalidation.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown(None).await;
    }

    async fn teardown(&self, reason: Option<String>) {
        let previous = self.active.write().await.take();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.cache.reset(epoch);

        if let Some(session) = previous {
            info!("Disconnecting from {}", session.profile().name);
            session.shutdown().await;
        }

        self.status_tx.send_replace(ConnectionStatus {
            last_error: reason,
            ..Default::default()
        });
    }

    fn report_failure(&self, profile: &ServerProfile, message: String) -> ConnectionResult {
        let result = ConnectionResult::failed(message);
        error!("Failed to connect to {}: {}", profile.name, result.message);

        self.status_tx.send_replace(ConnectionStatus {
            state: ConnectionState::Failed,
            profile_id: Some(profile.id.clone()),
            profile_name: Some(profile.name.clone()),
            host: Some(profile.host.clone()),
            last_error: Some(result.message.clone()),
            connected_at: None,
        });
        self.status_tx.send_replace(ConnectionStatus {
            state: ConnectionState::Disconnected,
            last_error: Some(result.message.clone()),
            ..Default::default()
        });

        result
    }
}
