use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::cron;
use crate::error::GatewayResult;
use crate::server::Session;
use crate::state::AppState;
use serde_json::Value;

async fn refreshed_overview(state: &AppState, session: &Session) -> GatewayResult<Value> {
    let overview = state
        .cache
        .track(session, ResourceKind::Cron, cron::overview(session))
        .await?;
    reply(overview)
}

pub async fn get_cron_overview(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    refreshed_overview(state, &session).await
}

pub async fn save_user_crontab(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let content: String = params.required("content")?;
    cron::save_user_crontab(&session, &content).await?;
    refreshed_overview(state, &session).await
}

/// `line` is the 1-based crontab line and `expected` its text as shown.
pub async fn toggle_cron_line(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let line: usize = params.required("line")?;
    let expected: String = params.required("expected")?;
    let enabled: bool = params.required("enabled")?;

    cron::toggle_cron_line(&session, line, &expected, enabled).await?;
    refreshed_overview(state, &session).await
}

pub async fn delete_cron_line(state: &AppState, params: &Params) -> GatewayResult<Value> {
    params.require_confirm("delete_cron_line")?;
    let session = session(state).await?;
    let line: usize = params.required("line")?;
    let expected: String = params.required("expected")?;

    cron::delete_cron_line(&session, line, &expected).await?;
    refreshed_overview(state, &session).await
}
