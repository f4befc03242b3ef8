use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::session::Session;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Containers,
    ComposeProjects,
    Services,
    Vhosts,
    NginxConfigTest,
    Firewall,
    Cron,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
    pub kind: ResourceKind,
    pub state: LoadState,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Default)]
struct Entry {
    state: LoadState,
    data: Option<Value>,
    error: Option<String>,
    seq: u64,
    updated_at: Option<i64>,
}

#[derive(Debug, Default)]
struct CacheInner {
    epoch: u64,
    entries: HashMap<ResourceKind, Entry>,
}

/// Local projections of remote state, scoped to one connection epoch.
///
/// Writes from an older epoch are dropped, and within an epoch a result only
/// replaces the stored one if it completed later.
#[derive(Debug, Default)]
pub struct ResourceCache {
    inner: Mutex<CacheInner>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops every entry and moves to `epoch`.
    pub fn reset(&self, epoch: u64) {
        let mut inner = self.lock();
        debug!(
            "Invalidating {} cached resources (epoch {} -> {})",
            inner.entries.len(),
            inner.epoch,
            epoch
        );
        inner.epoch = epoch;
        inner.entries.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn begin(&self, epoch: u64, kind: ResourceKind) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        let entry = inner.entries.entry(kind).or_default();
        entry.state = LoadState::Loading;
        true
    }

    /// Stores a result; returns false when it was discarded as stale.
    pub fn store<T: Serialize>(&self, epoch: u64, kind: ResourceKind, seq: u64, value: &T) -> bool {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize {:?} for cache: {}", kind, e);
                return false;
            }
        };

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("Discarding {:?} from epoch {} (now {})", kind, epoch, inner.epoch);
            return false;
        }
        let entry = inner.entries.entry(kind).or_default();
        if seq <= entry.seq {
            debug!(
                "Discarding {:?} completed at {} (have {})",
                kind, seq, entry.seq
            );
            return false;
        }
        entry.state = LoadState::Loaded;
        entry.data = Some(data);
        entry.error = None;
        entry.seq = seq;
        entry.updated_at = Some(chrono::Utc::now().timestamp_millis());
        true
    }

    /// Marks a failed load. The last good data stays visible.
    pub fn fail(&self, epoch: u64, kind: ResourceKind, message: String) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        let entry = inner.entries.entry(kind).or_default();
        entry.state = LoadState::Error;
        entry.error = Some(message);
    }

    pub fn view(&self, epoch: u64, kind: ResourceKind) -> GatewayResult<ResourceView> {
        let inner = self.lock();
        if inner.epoch != epoch {
            return Err(GatewayError::NotConnected);
        }
        let view = match inner.entries.get(&kind) {
            Some(entry) => ResourceView {
                kind,
                state: entry.state,
                data: entry.data.clone(),
                error: entry.error.clone(),
                updated_at: entry.updated_at,
            },
            None => ResourceView {
                kind,
                state: LoadState::Idle,
                data: None,
                error: None,
                updated_at: None,
            },
        };
        Ok(view)
    }

    pub fn get<T: DeserializeOwned>(&self, epoch: u64, kind: ResourceKind) -> Option<T> {
        let inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }
        let data = inner.entries.get(&kind)?.data.clone()?;
        serde_json::from_value(data).ok()
    }

    /// Runs a fetch through the Idle -> Loading -> Loaded | Error cycle.
    pub async fn track<T, F>(&self, session: &Session, kind: ResourceKind, fetch: F) -> GatewayResult<T>
    where
        T: Serialize,
        F: Future<Output = GatewayResult<Completed<T>>>,
    {
        let epoch = session.epoch();
        self.begin(epoch, kind);
        match fetch.await {
            Ok(completed) => {
                self.store(epoch, kind, completed.seq, &completed.value);
                Ok(completed.value)
            }
            Err(e) => {
                self.fail(epoch, kind, e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_completion_wins_even_if_published_first() {
        let cache = ResourceCache::new();
        cache.reset(1);

        assert!(cache.store(1, ResourceKind::Containers, 7, &vec!["new"]));
        // issued earlier, completed earlier, published late
        assert!(!cache.store(1, ResourceKind::Containers, 5, &vec!["old"]));

        let data: Vec<String> = cache.get(1, ResourceKind::Containers).unwrap();
        assert_eq!(data, vec!["new"]);
    }

    #[test]
    fn writes_from_previous_epoch_are_dropped() {
        let cache = ResourceCache::new();
        cache.reset(1);
        cache.store(1, ResourceKind::Services, 1, &vec!["nginx"]);
        cache.reset(2);

        assert!(!cache.store(1, ResourceKind::Services, 2, &vec!["stale"]));
        let view = cache.view(2, ResourceKind::Services).unwrap();
        assert_eq!(view.state, LoadState::Idle);
        assert!(view.data.is_none());
        assert!(matches!(
            cache.view(1, ResourceKind::Services),
            Err(GatewayError::NotConnected)
        ));
    }

    #[test]
    fn failure_keeps_last_good_data() {
        let cache = ResourceCache::new();
        cache.reset(3);
        cache.begin(3, ResourceKind::Users);
        cache.store(3, ResourceKind::Users, 1, &vec!["alice"]);
        cache.begin(3, ResourceKind::Users);
        cache.fail(3, ResourceKind::Users, "timeout".into());

        let view = cache.view(3, ResourceKind::Users).unwrap();
        assert_eq!(view.state, LoadState::Error);
        assert_eq!(view.error.as_deref(), Some("timeout"));
        assert!(view.data.is_some());
    }
}
