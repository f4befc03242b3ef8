use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::users::{self, CreateUserRequest, ModifyUserRequest};
use crate::error::GatewayResult;
use crate::server::Session;
use crate::state::AppState;
use serde_json::Value;

async fn refreshed_users(state: &AppState, session: &Session) -> GatewayResult<Value> {
    let list = state
        .cache
        .track(session, ResourceKind::Users, users::list_users(session))
        .await?;
    reply(list)
}

pub async fn get_system_users(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    refreshed_users(state, &session).await
}

pub async fn get_system_groups(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(users::list_groups(&session).await?)
}

pub async fn get_user_detail(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let username: String = params.required("username")?;
    reply(users::user_detail(&session, &username).await?)
}

pub async fn create_user(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let request: CreateUserRequest = params.parse()?;
    users::create_user(&session, &request).await?;
    refreshed_users(state, &session).await
}

pub async fn modify_user(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let request: ModifyUserRequest = params.parse()?;
    users::modify_user(&session, &request).await?;
    refreshed_users(state, &session).await
}

pub async fn delete_user(state: &AppState, params: &Params) -> GatewayResult<Value> {
    params.require_confirm("delete_user")?;
    let session = session(state).await?;
    let username: String = params.required("username")?;
    let remove_home = params.flag("remove_home")?;
    users::delete_user(&session, &username, remove_home).await?;
    refreshed_users(state, &session).await
}

pub async fn set_user_locked(state: &AppState, params: &Params, locked: bool) -> GatewayResult<Value> {
    let session = session(state).await?;
    let username: String = params.required("username")?;
    users::set_locked(&session, &username, locked).await?;
    refreshed_users(state, &session).await
}
