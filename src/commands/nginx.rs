use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::nginx::{self, CreateVhostRequest};
use crate::error::GatewayResult;
use crate::server::Session;
use crate::state::AppState;
use serde_json::Value;

async fn refreshed_vhosts(state: &AppState, session: &Session) -> GatewayResult<Value> {
    let vhosts = state
        .cache
        .track(session, ResourceKind::Vhosts, nginx::list_vhosts(session))
        .await?;
    reply(vhosts)
}

pub async fn get_nginx_status(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(nginx::status(&session).await?)
}

pub async fn get_nginx_vhosts(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    refreshed_vhosts(state, &session).await
}

pub async fn get_vhost_config(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let name: String = params.required("name")?;
    reply(nginx::vhost_config(&session, &name).await?)
}

/// Returns the passing config test; a failing one comes back as
/// `ValidationFailed` with the backup already restored.
pub async fn save_vhost_config(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let name: String = params.required("name")?;
    let content: String = params.required("content")?;
    reply(nginx::save_vhost_config(&session, &name, &content).await?)
}

pub async fn create_vhost(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let request: CreateVhostRequest = params.parse()?;
    nginx::create_vhost(&session, &request).await?;
    refreshed_vhosts(state, &session).await
}

pub async fn delete_vhost(state: &AppState, params: &Params) -> GatewayResult<Value> {
    params.require_confirm("delete_vhost")?;
    let session = session(state).await?;
    let name: String = params.required("name")?;
    nginx::delete_vhost(&session, &name).await?;
    refreshed_vhosts(state, &session).await
}

pub async fn toggle_vhost(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let name: String = params.required("name")?;
    let enabled: bool = params.required("enabled")?;
    nginx::toggle_vhost(&session, &name, enabled).await?;
    refreshed_vhosts(state, &session).await
}

pub async fn nginx_test_config(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    let test = state
        .cache
        .track(&session, ResourceKind::NginxConfigTest, nginx::run_config_test(&session))
        .await?;
    reply(test)
}

pub async fn nginx_reload(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(nginx::reload(&session).await?)
}
