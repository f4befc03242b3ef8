use super::{reply, Params};
use crate::database::models::{AuthMethod, ServerProfile};
use crate::error::GatewayResult;
use crate::server::model::SshConnectConfig;
use crate::state::AppState;
use log::info;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct ProfileParams {
    #[serde(default)]
    id: String,
    name: String,
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    username: String,
    auth_method: Value,
}

fn default_port() -> u16 {
    22
}

/// Profiles arrive either flat or wrapped as `{"profile": {..}}`.
fn profile_param(params: &Params) -> GatewayResult<ServerProfile> {
    let raw: ProfileParams = match params.optional("profile")? {
        Some(raw) => raw,
        None => params.parse()?,
    };
    Ok(ServerProfile {
        id: raw.id,
        name: raw.name,
        host: raw.host,
        port: raw.port,
        username: raw.username,
        auth_method: AuthMethod::from_value(raw.auth_method)?,
    })
}

pub async fn get_server_profiles(state: &AppState) -> GatewayResult<Value> {
    reply(state.profiles.list().await?)
}

pub async fn save_server_profile(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let profile = profile_param(params)?;
    reply(state.profiles.save(profile).await?)
}

pub async fn delete_server_profile(state: &AppState, params: &Params) -> GatewayResult<Value> {
    params.require_confirm("delete_server_profile")?;
    let id: String = params.required("id")?;
    state.profiles.delete(&id).await?;
    reply(())
}

pub async fn set_connect_on_startup(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let id: String = params.required("id")?;
    let enabled: bool = params.required("enabled")?;
    state.profiles.set_connect_on_startup(&id, enabled).await?;
    reply(())
}

pub async fn connect_to_server(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let profile = profile_param(params)?;
    reply(state.profiles.connect(profile).await?)
}

pub async fn connect_saved_server(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let id: String = params.required("id")?;
    reply(state.profiles.connect_saved(&id).await?)
}

pub async fn test_connection(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let auth = AuthMethod::from_value(params.required("auth_method")?)?;
    let config = SshConnectConfig {
        ssh_host: params.required("host")?,
        ssh_port: params.optional("port")?.unwrap_or(22),
        ssh_user: params.required("username")?,
        auth,
    };
    reply(state.profiles.test(config).await?)
}

pub async fn disconnect_server(state: &AppState) -> GatewayResult<Value> {
    state.pollers.stop_all();
    state.profiles.disconnect().await;
    info!("Disconnected on request");
    reply(())
}

pub fn get_connection_status(state: &AppState) -> GatewayResult<Value> {
    reply(state.connections.status())
}
