pub mod cache;
pub mod commands;
pub mod controllers;
pub mod database;
pub mod error;
pub mod poller;
pub mod server;
pub mod service;
pub mod settings;
pub mod state;

use crate::commands::Dispatcher;
use crate::error::GatewayResult;
use crate::state::AppState;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DATA_DIR_ENV: &str = "VPS_GATEWAY_DATA_DIR";
const APP_DIR: &str = "vps-gateway";

/// `$VPS_GATEWAY_DATA_DIR`, else the platform data directory.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Opens the store, builds the gateway and runs the startup auto-connect.
pub async fn init(data_dir: &Path) -> GatewayResult<Dispatcher> {
    info!("Using data directory {}", data_dir.display());
    let state = Arc::new(AppState::open(data_dir).await?);

    if let Some(result) = state.profiles.auto_connect().await {
        info!("Auto-connect: {}", result.message);
    }

    Ok(Dispatcher::new(state))
}
