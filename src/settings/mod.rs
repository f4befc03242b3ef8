pub use crate::database::models::GatewaySettings;
use crate::database::DB;
use crate::error::GatewayResult;
use log::{debug, info};
use std::sync::Mutex;
use std::time::Duration;

pub struct SettingsManager {
    settings: Mutex<GatewaySettings>,
}

impl SettingsManager {
    pub fn new(initial: GatewaySettings) -> Self {
        Self {
            settings: Mutex::new(initial),
        }
    }

    /// Loads persisted settings, writing defaults on first run.
    pub async fn load(db: &DB) -> GatewayResult<Self> {
        let settings = match db.load_settings().await? {
            Some(settings) => settings,
            None => {
                info!("No stored settings, writing defaults");
                let defaults = GatewaySettings::default();
                db.save_settings(&defaults).await?;
                defaults
            }
        };
        Ok(Self::new(settings))
    }

    pub fn get_settings(&self) -> GatewaySettings {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn save_settings(&self, db: &DB, new_settings: GatewaySettings) -> GatewayResult<()> {
        new_settings.validate()?;
        db.save_settings(&new_settings).await?;
        debug!("Settings saved to database successfully");
        *self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = new_settings;

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.get_settings().connection_timeout))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.get_settings().command_timeout))
    }
}
