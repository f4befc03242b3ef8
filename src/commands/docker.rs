use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::docker::{self, ComposeProject, ContainerAction};
use crate::controllers::clamp_lines;
use crate::error::GatewayResult;
use crate::server::Session;
use crate::state::AppState;
use serde_json::Value;

pub async fn get_docker_containers(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    let containers = state
        .cache
        .track(&session, ResourceKind::Containers, docker::list_containers(&session))
        .await?;
    reply(containers)
}

pub async fn get_container_details(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let container: String = params.required("container")?;
    reply(docker::container_details(&session, &container).await?)
}

/// Runs the action, then returns the refreshed container list.
pub async fn docker_container_action(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let container: String = params.required("container")?;
    let action: ContainerAction = params.required("action")?;

    docker::container_action(&session, &container, action).await?;
    let containers = state
        .cache
        .track(&session, ResourceKind::Containers, docker::list_containers(&session))
        .await?;
    reply(containers)
}

pub async fn get_container_logs(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let container: String = params.required("container")?;
    let lines = clamp_lines(
        params.optional("lines")?,
        state.settings.get_settings().log_tail_lines,
    );
    reply(docker::container_logs(&session, &container, lines).await?)
}

pub async fn get_docker_images(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(docker::list_images(&session).await?)
}

pub async fn get_docker_volumes(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(docker::list_volumes(&session).await?)
}

pub async fn get_docker_networks(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(docker::list_networks(&session).await?)
}

/// The last discovery of this connection; scans once if there is none.
pub async fn get_compose_projects(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    if let Some(projects) = state
        .cache
        .get::<Vec<ComposeProject>>(session.epoch(), ResourceKind::ComposeProjects)
    {
        return reply(projects);
    }
    rescan(state, &session).await
}

pub async fn rescan_compose_projects(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    rescan(state, &session).await
}

async fn rescan(state: &AppState, session: &Session) -> GatewayResult<Value> {
    let projects = state
        .cache
        .track(
            session,
            ResourceKind::ComposeProjects,
            docker::discover_compose_projects(session),
        )
        .await?;
    reply(projects)
}
