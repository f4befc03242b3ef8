use crate::cache::ResourceCache;
use crate::database::DB;
use crate::error::GatewayResult;
use crate::poller::metrics::MetricsMonitor;
use crate::poller::PollerRegistry;
use crate::server::remote_cmd::Connector;
use crate::server::ssh::SshConnector;
use crate::server::ConnectionManager;
use crate::service::ProfileService;
use crate::settings::SettingsManager;
use std::path::Path;
use std::sync::Arc;

pub struct AppState {
    pub db: DB,
    pub settings: Arc<SettingsManager>,
    pub connections: Arc<ConnectionManager>,
    pub cache: Arc<ResourceCache>,
    pub metrics: Arc<MetricsMonitor>,
    pub pollers: PollerRegistry,
    pub profiles: ProfileService,
}

impl AppState {
    /// Opens the store under `data_dir` and wires real SSH transport.
    pub async fn open(data_dir: &Path) -> GatewayResult<Self> {
        let db = DB::open(data_dir).await?;
        let settings = Arc::new(SettingsManager::load(&db).await?);
        let connector = Arc::new(SshConnector::new(settings.clone()));
        Ok(Self::assemble(db, settings, connector))
    }

    /// Same as [`AppState::open`] but with a caller-supplied transport.
    pub async fn with_connector(data_dir: &Path, connector: Arc<dyn Connector>) -> GatewayResult<Self> {
        let db = DB::open(data_dir).await?;
        let settings = Arc::new(SettingsManager::load(&db).await?);
        Ok(Self::assemble(db, settings, connector))
    }

    fn assemble(db: DB, settings: Arc<SettingsManager>, connector: Arc<dyn Connector>) -> Self {
        let cache = Arc::new(ResourceCache::new());
        let metrics = Arc::new(MetricsMonitor::new(
            settings.get_settings().metrics_history_size as usize,
        ));
        let connections = Arc::new(ConnectionManager::new(connector, cache.clone()));
        let pollers = PollerRegistry::new(metrics.clone(), cache.clone());
        let profiles = ProfileService::new(
            db.clone(),
            settings.clone(),
            connections.clone(),
            metrics.clone(),
        );
        Self {
            db,
            settings,
            connections,
            cache,
            metrics,
            pollers,
            profiles,
        }
    }
}
