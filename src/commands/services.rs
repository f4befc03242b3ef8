use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::clamp_lines;
use crate::controllers::services::{self, ServiceAction};
use crate::error::GatewayResult;
use crate::state::AppState;
use serde_json::Value;

pub async fn get_services(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    let list = state
        .cache
        .track(&session, ResourceKind::Services, services::list_services(&session))
        .await?;
    reply(list)
}

pub async fn service_action(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let name: String = params.required("name")?;
    let action: ServiceAction = params.required("action")?;

    services::service_action(&session, &name, action).await?;
    let list = state
        .cache
        .track(&session, ResourceKind::Services, services::list_services(&session))
        .await?;
    reply(list)
}

pub async fn get_service_logs(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let name: String = params.required("name")?;
    let lines = clamp_lines(
        params.optional("lines")?,
        state.settings.get_settings().log_tail_lines,
    );
    reply(services::service_logs(&session, &name, lines).await?)
}
