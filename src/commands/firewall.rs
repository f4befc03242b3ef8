use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::firewall::{self, UfwRuleRequest};
use crate::error::{GatewayError, GatewayResult};
use crate::server::Session;
use crate::state::AppState;
use serde_json::Value;

async fn refreshed_overview(state: &AppState, session: &Session) -> GatewayResult<Value> {
    let overview = state
        .cache
        .track(session, ResourceKind::Firewall, firewall::overview(session))
        .await?;
    reply(overview)
}

pub async fn get_ufw_overview(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    refreshed_overview(state, &session).await
}

pub async fn ufw_add_rule(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    // ports come as `22`, `"22"` or `"6000:6007"`
    let port = match params.required::<Value>("port")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s,
        other => {
            return Err(GatewayError::InvalidParams(format!("port: unexpected {}", other)))
        }
    };
    let request = UfwRuleRequest {
        action: params.required("action")?,
        port,
        protocol: params.optional("protocol")?,
        from: params.optional("from")?,
        comment: params.optional("comment")?,
    };

    firewall::add_rule(&session, &request).await?;
    refreshed_overview(state, &session).await
}

/// `position` is the 1-based rule number and `rule` the text the UI showed
/// for it.
pub async fn ufw_delete_rule(state: &AppState, params: &Params) -> GatewayResult<Value> {
    params.require_confirm("ufw_delete_rule")?;
    let session = session(state).await?;
    let position: u32 = params.required("position")?;
    let expected: String = params.required("rule")?;

    firewall::delete_rule(&session, position, &expected).await?;
    refreshed_overview(state, &session).await
}

pub async fn ufw_allow_listening_port(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let port: u16 = params.required("port")?;
    let protocol: Option<String> = params.optional("protocol")?;

    firewall::allow_listening_port(&session, port, protocol.as_deref()).await?;
    refreshed_overview(state, &session).await
}

pub async fn ufw_set_enabled(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let enabled: bool = params.required("enabled")?;

    firewall::set_enabled(&session, enabled).await?;
    refreshed_overview(state, &session).await
}
