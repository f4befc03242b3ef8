use super::{reply, session, Params};
use crate::cache::ResourceKind;
use crate::controllers::{clamp_lines, infra, logs, security};
use crate::error::{GatewayError, GatewayResult};
use crate::poller::metrics::cpu_cores;
use crate::poller::PollView;
use crate::state::AppState;
use log::info;
use serde_json::Value;
use std::time::Duration;

/// Samples the host now. With `cached: true` the last polled sample is
/// returned when there is one.
pub async fn get_system_metrics(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    if params.flag("cached")? {
        if let Some(latest) = state.metrics.latest(session.epoch()) {
            return reply(latest);
        }
    }
    reply(state.metrics.sample(&session).await?)
}

pub async fn get_cpu_cores(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(cpu_cores(&session).await?)
}

/// Starts polling a view; `interval_secs` defaults to the configured interval
/// of that view. Returns the views now being polled.
pub async fn start_view_polling(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let view: PollView = params.required("view")?;
    let settings = state.settings.get_settings();
    let default_secs = match view {
        PollView::Metrics => settings.metrics_interval,
        PollView::Containers => settings.container_poll_interval,
    };
    let secs: u32 = params.optional("interval_secs")?.unwrap_or(default_secs);
    if secs == 0 {
        return Err(GatewayError::ValidationFailed(
            "interval_secs must be greater than zero".into(),
        ));
    }

    state
        .pollers
        .start(view, session, Duration::from_secs(u64::from(secs)));
    reply(state.pollers.running())
}

pub fn stop_view_polling(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let view: PollView = params.required("view")?;
    if state.pollers.stop(view) {
        info!("Polling of {:?} stopped on request", view);
    }
    reply(state.pollers.running())
}

/// The cached projection of one resource with its load state.
pub async fn get_cached_resource(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let kind: ResourceKind = params.required("kind")?;
    reply(state.cache.view(session.epoch(), kind)?)
}

pub async fn get_security_info(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(security::security_info(&session).await?)
}

pub async fn get_system_logs(state: &AppState, params: &Params) -> GatewayResult<Value> {
    let session = session(state).await?;
    let lines = clamp_lines(
        params.optional("lines")?,
        state.settings.get_settings().log_tail_lines,
    );
    reply(logs::system_logs(&session, lines).await?)
}

pub async fn get_infrastructure_graph(state: &AppState) -> GatewayResult<Value> {
    let session = session(state).await?;
    reply(infra::collect(&session).await?)
}
