use super::{reply, Params};
use crate::error::GatewayResult;
use crate::settings::GatewaySettings;
use crate::state::AppState;
use log::{debug, info};
use serde_json::Value;

pub fn get_settings(state: &AppState) -> GatewayResult<Value> {
    debug!("Fetching gateway settings");
    reply(state.settings.get_settings())
}

/// Accepts `{"settings": {..}}` or the settings object itself; missing
/// fields take their defaults.
pub async fn save_settings(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let settings: GatewaySettings = match params.optional("settings")? {
        Some(settings) => settings,
        None => params.parse()?,
    };
    let history_size = settings.metrics_history_size as usize;

    state.settings.save_settings(&state.db, settings).await?;
    state.metrics.set_history_size(history_size);
    info!("Gateway settings saved");
    reply(())
}
