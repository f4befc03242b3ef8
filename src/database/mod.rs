pub mod entity;
pub mod models;

use crate::error::{GatewayError, GatewayResult};
use anyhow::Context;
use entity::prelude::*;
use entity::{app_settings, server_profile};
use log::{debug, info, warn};
use models::{GatewaySettings, SavedServerProfile};
use sea_orm::{
    sea_query::OnConflict, ActiveValue::Set, ColumnTrait, ConnectOptions, Database,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use std::path::Path;
use std::time::Duration;

const DB_FILE: &str = "gateway.db";

/// Handle to the local SQLite store holding server profiles and settings.
#[derive(Clone)]
pub struct DB {
    connection: DatabaseConnection,
}

impl DB {
    pub async fn open(data_dir: &Path) -> GatewayResult<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let db_path = data_dir.join(DB_FILE);
        if !db_path.exists() {
            info!("Creating database file at: {}", db_path.display());
            std::fs::File::create(&db_path).context("Failed to create database file")?;
        }

        run_migrations(&db_path).await?;

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        info!("Opening SQLite database at: {}", db_url);

        let mut opt = ConnectOptions::new(&db_url);
        opt.max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let connection = Database::connect(opt)
            .await
            .map_err(|e| GatewayError::Storage(format!("Failed to connect to database: {e}")))?;

        Ok(Self { connection })
    }

    pub async fn load_settings(&self) -> GatewayResult<Option<GatewaySettings>> {
        debug!("Loading gateway settings");

        let settings = AppSettings::find_by_id(1).one(&self.connection).await?;
        Ok(settings.map(GatewaySettings::from))
    }

    pub async fn save_settings(&self, settings: &GatewaySettings) -> GatewayResult<()> {
        debug!("Saving gateway settings (Upsert)");

        let to_i32 = |v: u32| i32::try_from(v).unwrap_or(i32::MAX);
        let active_model = app_settings::ActiveModel {
            id: Set(1),
            connection_timeout: Set(to_i32(settings.connection_timeout)),
            command_timeout: Set(to_i32(settings.command_timeout)),
            keep_alive_interval: Set(to_i32(settings.keep_alive_interval)),
            metrics_interval: Set(to_i32(settings.metrics_interval)),
            container_poll_interval: Set(to_i32(settings.container_poll_interval)),
            metrics_history_size: Set(to_i32(settings.metrics_history_size)),
            log_tail_lines: Set(to_i32(settings.log_tail_lines)),
            use_sudo: Set(settings.use_sudo),
            strict_host_key_checking: Set(settings.strict_host_key_checking),
            default_ssh_key: Set(settings.default_ssh_key.clone()),
        };

        AppSettings::insert(active_model)
            .on_conflict(
                OnConflict::column(app_settings::Column::Id)
                    .update_columns([
                        app_settings::Column::ConnectionTimeout,
                        app_settings::Column::CommandTimeout,
                        app_settings::Column::KeepAliveInterval,
                        app_settings::Column::MetricsInterval,
                        app_settings::Column::ContainerPollInterval,
                        app_settings::Column::MetricsHistorySize,
                        app_settings::Column::LogTailLines,
                        app_settings::Column::UseSudo,
                        app_settings::Column::StrictHostKeyChecking,
                        app_settings::Column::DefaultSshKey,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.connection)
            .await
            .map_err(|e| GatewayError::Storage(format!("Failed to upsert settings: {e}")))?;

        Ok(())
    }

    pub async fn load_profiles(&self) -> GatewayResult<Vec<SavedServerProfile>> {
        debug!("Loading server profiles");

        let entities = ServerProfiles::find()
            .order_by_asc(server_profile::Column::CreatedAt)
            .all(&self.connection)
            .await?;

        entities
            .into_iter()
            .map(SavedServerProfile::try_from)
            .collect()
    }

    pub async fn get_profile_by_id(&self, id: &str) -> GatewayResult<Option<SavedServerProfile>> {
        debug!("Getting server profile by id: {}", id);

        ServerProfiles::find_by_id(id.to_string())
            .one(&self.connection)
            .await?
            .map(SavedServerProfile::try_from)
            .transpose()
    }

    pub async fn save_profile(&self, profile: &SavedServerProfile) -> GatewayResult<()> {
        debug!("Saving server profile {} (Upsert)", profile.id);

        let model = server_profile::Model::from(profile);
        let active_model = server_profile::ActiveModel {
            id: Set(model.id),
            name: Set(model.name),
            host: Set(model.host),
            port: Set(model.port),
            username: Set(model.username),
            auth_type: Set(model.auth_type),
            ssh_password: Set(model.ssh_password),
            ssh_key_path: Set(model.ssh_key_path),
            ssh_passphrase: Set(model.ssh_passphrase),
            created_at: Set(model.created_at),
            last_connected: Set(model.last_connected),
            connect_on_startup: Set(model.connect_on_startup),
        };

        // created_at is left untouched on update
        ServerProfiles::insert(active_model)
            .on_conflict(
                OnConflict::column(server_profile::Column::Id)
                    .update_columns([
                        server_profile::Column::Name,
                        server_profile::Column::Host,
                        server_profile::Column::Port,
                        server_profile::Column::Username,
                        server_profile::Column::AuthType,
                        server_profile::Column::SshPassword,
                        server_profile::Column::SshKeyPath,
                        server_profile::Column::SshPassphrase,
                        server_profile::Column::LastConnected,
                        server_profile::Column::ConnectOnStartup,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.connection)
            .await
            .map_err(|e| {
                GatewayError::Storage(format!("Failed to save profile {}: {e}", profile.id))
            })?;

        Ok(())
    }

    pub async fn delete_profile(&self, id: &str) -> GatewayResult<()> {
        debug!("Deleting server profile: {}", id);

        let res = ServerProfiles::delete_by_id(id.to_string())
            .exec(&self.connection)
            .await?;

        if res.rows_affected == 0 {
            warn!("Server profile {} not found", id);
            return Err(GatewayError::NotFound(format!("Server profile {}", id)));
        }

        Ok(())
    }

    pub async fn touch_last_connected(&self, id: &str, at: i64) -> GatewayResult<()> {
        ServerProfiles::update_many()
            .col_expr(
                server_profile::Column::LastConnected,
                sea_orm::sea_query::Expr::value(at),
            )
            .filter(server_profile::Column::Id.eq(id))
            .exec(&self.connection)
            .await?;
        Ok(())
    }
}

async fn run_migrations(db_path: &Path) -> GatewayResult<()> {
    info!("Running database migrations");

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .map_err(|e| GatewayError::Storage(format!("Failed to connect for migrations: {e}")))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|e| GatewayError::Storage(format!("Migration failed: {e}")))?;

    pool.close().await;
    info!("Database migrations complete");
    Ok(())
}
