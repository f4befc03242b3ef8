use crate::database::models::{AuthMethod, SavedServerProfile, ServerProfile};
use crate::database::DB;
use crate::error::{GatewayError, GatewayResult};
use crate::poller::metrics::MetricsMonitor;
use crate::server::model::{ConnectionResult, SshConnectConfig};
use crate::server::{ConnectionManager, SessionOptions};
use crate::settings::SettingsManager;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Saved profiles plus the connection lifecycle that uses them.
pub struct ProfileService {
    db: DB,
    settings: Arc<SettingsManager>,
    connections: Arc<ConnectionManager>,
    metrics: Arc<MetricsMonitor>,
}

impl ProfileService {
    pub fn new(
        db: DB,
        settings: Arc<SettingsManager>,
        connections: Arc<ConnectionManager>,
        metrics: Arc<MetricsMonitor>,
    ) -> Self {
        Self {
            db,
            settings,
            connections,
            metrics,
        }
    }

    pub async fn list(&self) -> GatewayResult<Vec<SavedServerProfile>> {
        debug!("Fetching all server profiles from database");
        let profiles = self.db.load_profiles().await?;
        debug!("Fetched {} server profiles", profiles.len());
        Ok(profiles)
    }

    /// Inserts a new profile (an empty id gets a fresh uuid) or updates an
    /// existing one, keeping its creation time and connection history.
    pub async fn save(&self, profile: ServerProfile) -> GatewayResult<SavedServerProfile> {
        validate_profile(&profile)?;

        let mut saved = SavedServerProfile::from(profile);
        if saved.id.trim().is_empty() {
            saved.id = uuid::Uuid::new_v4().to_string();
        } else if let Some(existing) = self.db.get_profile_by_id(&saved.id).await? {
            saved.created_at = existing.created_at;
            saved.last_connected = existing.last_connected;
            saved.connect_on_startup = existing.connect_on_startup;
        }

        self.db.save_profile(&saved).await?;
        info!("Server profile {} ({}) saved", saved.name, saved.id);
        Ok(saved)
    }

    /// Removes the profile. An active connection made with it stays up.
    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        self.db.delete_profile(id).await?;
        info!("Server profile {} deleted", id);
        Ok(())
    }

    pub async fn set_connect_on_startup(&self, id: &str, enabled: bool) -> GatewayResult<()> {
        let mut profile = self.get(id).await?;
        profile.connect_on_startup = enabled;
        self.db.save_profile(&profile).await
    }

    async fn get(&self, id: &str) -> GatewayResult<SavedServerProfile> {
        self.db
            .get_profile_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("Server profile {}", id)))
    }

    /// Connects with a stored profile and stamps `last_connected` on success.
    pub async fn connect_saved(&self, id: &str) -> GatewayResult<ConnectionResult> {
        let saved = self.get(id).await?;
        let result = self.connect(ServerProfile::from(saved)).await?;

        if result.success {
            let now = chrono::Utc::now().timestamp_millis();
            if let Err(e) = self.db.touch_last_connected(id, now).await {
                warn!("Failed to record last connection of {}: {}", id, e);
            }
        }
        Ok(result)
    }

    /// Connects with an unsaved profile.
    pub async fn connect(&self, mut profile: ServerProfile) -> GatewayResult<ConnectionResult> {
        profile.auth_method = self.resolve_auth(profile.auth_method)?;
        validate_profile(&profile)?;

        let settings = self.settings.get_settings();
        self.metrics
            .set_history_size(settings.metrics_history_size as usize);
        let options = SessionOptions {
            command_timeout: self.settings.command_timeout(),
            use_sudo: settings.use_sudo,
        };
        Ok(self
            .connections
            .connect(&profile, self.settings.connection_timeout(), options)
            .await)
    }

    pub async fn test(&self, mut config: SshConnectConfig) -> GatewayResult<ConnectionResult> {
        config.auth = self.resolve_auth(config.auth)?;
        config.auth.validate()?;
        Ok(self
            .connections
            .test(&config, self.settings.connection_timeout())
            .await)
    }

    pub async fn disconnect(&self) {
        self.connections.disconnect().await;
    }

    /// Connects the oldest profile flagged for startup, if any. Failures are
    /// logged and otherwise ignored.
    pub async fn auto_connect(&self) -> Option<ConnectionResult> {
        let profiles = match self.db.load_profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                error!("Failed to load profiles for auto-connect: {}", e);
                return None;
            }
        };
        let profile = profiles.into_iter().find(|p| p.connect_on_startup)?;

        info!("Auto-connecting to {}", profile.name);
        match self.connect_saved(&profile.id).await {
            Ok(result) => {
                if !result.success {
                    warn!("Auto-connect to {} failed: {}", profile.name, result.message);
                }
                Some(result)
            }
            Err(e) => {
                warn!("Auto-connect to {} failed: {}", profile.name, e);
                None
            }
        }
    }

    /// A key profile with an empty path falls back to the configured default key.
    fn resolve_auth(&self, auth: AuthMethod) -> GatewayResult<AuthMethod> {
        match auth {
            AuthMethod::PrivateKey {
                key_path,
                passphrase,
            } if key_path.trim().is_empty() => {
                let key_path = self.settings.get_settings().default_ssh_key.ok_or_else(|| {
                    GatewayError::InvalidAuthMethod(
                        "No key path given and no default SSH key configured".to_string(),
                    )
                })?;
                Ok(AuthMethod::PrivateKey {
                    key_path,
                    passphrase,
                })
            }
            other => Ok(other),
        }
    }
}

fn validate_profile(profile: &ServerProfile) -> GatewayResult<()> {
    if profile.name.trim().is_empty() {
        return Err(GatewayError::ValidationFailed("Profile name is required".into()));
    }
    if profile.host.trim().is_empty() {
        return Err(GatewayError::ValidationFailed("Host is required".into()));
    }
    if profile.username.trim().is_empty() {
        return Err(GatewayError::ValidationFailed("Username is required".into()));
    }
    if profile.port == 0 {
        return Err(GatewayError::ValidationFailed("Port must be between 1 and 65535".into()));
    }
    profile.auth_method.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::database::models::GatewaySettings;
    use crate::server::model::ConnectionState;
    use crate::server::testing::{test_profile, ScriptedConnector, ScriptedShell};

    struct Fixture {
        service: ProfileService,
        connections: Arc<ConnectionManager>,
        connector: Arc<ScriptedConnector>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(settings: GatewaySettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path()).await.unwrap();
        let connector = Arc::new(ScriptedConnector::new(Arc::new(ScriptedShell::new())));
        let connections = Arc::new(ConnectionManager::new(
            connector.clone(),
            Arc::new(ResourceCache::new()),
        ));
        let service = ProfileService::new(
            db,
            Arc::new(SettingsManager::new(settings)),
            connections.clone(),
            Arc::new(MetricsMonitor::new(60)),
        );
        Fixture {
            service,
            connections,
            connector,
            _dir: dir,
        }
    }

    fn unsaved() -> ServerProfile {
        ServerProfile {
            id: String::new(),
            ..test_profile()
        }
    }

    #[tokio::test]
    async fn new_profiles_get_a_uuid_and_keep_it() {
        let f = fixture(GatewaySettings::default()).await;
        let saved = f.service.save(unsaved()).await.unwrap();
        assert!(uuid::Uuid::parse_str(&saved.id).is_ok());

        let mut renamed = ServerProfile::from(saved.clone());
        renamed.name = "VPS1-prod".into();
        let updated = f.service.save(renamed).await.unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.created_at, saved.created_at);

        let all = f.service.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "VPS1-prod");
    }

    #[tokio::test]
    async fn blank_host_is_rejected() {
        let f = fixture(GatewaySettings::default()).await;
        let profile = ServerProfile {
            host: " ".into(),
            ..unsaved()
        };
        assert!(matches!(
            f.service.save(profile).await,
            Err(GatewayError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn connecting_saved_profile_stamps_last_connected() {
        let f = fixture(GatewaySettings::default()).await;
        let saved = f.service.save(unsaved()).await.unwrap();
        assert!(saved.last_connected.is_none());

        let result = f.service.connect_saved(&saved.id).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(f.connections.status().state, ConnectionState::Connected);

        let stored = f.service.list().await.unwrap().remove(0);
        assert!(stored.last_connected.is_some());
    }

    #[tokio::test]
    async fn deleting_active_profile_keeps_connection() {
        let f = fixture(GatewaySettings::default()).await;
        let saved = f.service.save(unsaved()).await.unwrap();
        f.service.connect_saved(&saved.id).await.unwrap();

        f.service.delete(&saved.id).await.unwrap();
        assert!(f.connections.session().await.is_ok());
        assert!(matches!(
            f.service.connect_saved(&saved.id).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn auto_connect_uses_first_flagged_profile() {
        let f = fixture(GatewaySettings::default()).await;
        assert!(f.service.auto_connect().await.is_none());

        let first = f.service.save(unsaved()).await.unwrap();
        let second = f
            .service
            .save(ServerProfile {
                name: "VPS2".into(),
                ..unsaved()
            })
            .await
            .unwrap();
        f.service.set_connect_on_startup(&second.id, true).await.unwrap();

        let result = f.service.auto_connect().await.unwrap();
        assert!(result.success);
        assert_eq!(
            f.connections.status().profile_id.as_deref(),
            Some(second.id.as_str())
        );
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn failed_auto_connect_is_not_fatal() {
        let f = fixture(GatewaySettings::default()).await;
        let saved = f.service.save(unsaved()).await.unwrap();
        f.service.set_connect_on_startup(&saved.id, true).await.unwrap();
        f.connector.fail_with("bad key");

        let result = f.service.auto_connect().await.unwrap();
        assert!(!result.success);
        assert_eq!(f.connections.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn empty_key_path_falls_back_to_default_key() {
        let f = fixture(GatewaySettings {
            default_ssh_key: Some("~/.ssh/id_rsa".into()),
            ..GatewaySettings::default()
        })
        .await;
        let resolved = f
            .service
            .resolve_auth(AuthMethod::PrivateKey {
                key_path: String::new(),
                passphrase: None,
            })
            .unwrap();
        assert_eq!(
            resolved,
            AuthMethod::PrivateKey {
                key_path: "~/.ssh/id_rsa".into(),
                passphrase: None
            }
        );

        let f = fixture(GatewaySettings::default()).await;
        assert!(f
            .service
            .resolve_auth(AuthMethod::PrivateKey {
                key_path: " ".into(),
                passphrase: None,
            })
            .is_err());
    }
}
