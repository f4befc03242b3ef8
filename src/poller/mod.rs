//! Background polling for the views the UI is currently showing.

pub mod history;
pub mod metrics;
pub mod sampler;

use crate::cache::{ResourceCache, ResourceKind};
use crate::controllers::docker;
use crate::error::GatewayError;
use crate::server::session::Session;
use log::{debug, info, warn};
use metrics::MetricsMonitor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollView {
    Metrics,
    Containers,
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One polling task per view. Each task's token is a child of the session
/// token, so a disconnect stops every poller.
pub struct PollerRegistry {
    monitor: Arc<MetricsMonitor>,
    cache: Arc<ResourceCache>,
    tasks: Mutex<HashMap<PollView, PollTask>>,
}

impl PollerRegistry {
    pub fn new(monitor: Arc<MetricsMonitor>, cache: Arc<ResourceCache>) -> Self {
        Self {
            monitor,
            cache,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PollView, PollTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts (or restarts) polling `view` on `session` every `interval`.
    /// The first poll runs immediately.
    pub fn start(&self, view: PollView, session: Arc<Session>, interval: Duration) {
        let token = session.cancel_token().child_token();
        let monitor = self.monitor.clone();
        let cache = self.cache.clone();
        let task_token = token.clone();

        info!("Polling {:?} every {:?}", view, interval);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let polled = tokio::select! {
                    _ = task_token.cancelled() => break,
                    res = poll_once(view, &session, &monitor, &cache) => res,
                };
                match polled {
                    Ok(()) => {}
                    Err(GatewayError::NotConnected) => break,
                    Err(e) => {
                        if view == PollView::Metrics {
                            monitor.record_failure(session.epoch(), e.to_string());
                        } else {
                            warn!("Polling {:?} failed: {}", view, e);
                        }
                    }
                }
            }
            debug!("Poller for {:?} stopped", view);
        });

        if let Some(previous) = self.lock().insert(view, PollTask { token, handle }) {
            previous.token.cancel();
        }
    }

    /// Returns false when the view was not being polled.
    pub fn stop(&self, view: PollView) -> bool {
        match self.lock().remove(&view) {
            Some(task) => {
                info!("Stopped polling {:?}", view);
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (_, task) in self.lock().drain() {
            task.token.cancel();
        }
    }

    /// Views with a live polling task.
    pub fn running(&self) -> Vec<PollView> {
        let mut tasks = self.lock();
        tasks.retain(|_, task| !task.handle.is_finished());
        tasks.keys().copied().collect()
    }
}

async fn poll_once(
    view: PollView,
    session: &Session,
    monitor: &MetricsMonitor,
    cache: &ResourceCache,
) -> Result<(), GatewayError> {
    match view {
        PollView::Metrics => monitor.sample(session).await.map(|_| ()),
        PollView::Containers => cache
            .track(session, ResourceKind::Containers, docker::list_containers(session))
            .await
            .map(|_| ()),
    }
}
