use crate::error::GatewayResult;
use crate::poller::history::{MetricsHistory, NetworkHistoryPoint};
use crate::poller::sampler::{DiskUsage, NetCounters, RawSample, SampleCmd};
use crate::server::session::Session;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    /// Bytes since the previous sample, divided by the elapsed seconds.
    pub sent_per_sec: u64,
    pub recv_per_sec: u64,
}

/// One immutable sample of the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_percent: f64,
    pub load_avg: [f64; 3],
    pub disk_usage: Vec<DiskUsage>,
    pub network: NetworkStats,
    pub uptime: u64,
    pub process_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub cpu_history: Vec<f64>,
    pub memory_history: Vec<f64>,
    pub network_history: Vec<NetworkHistoryPoint>,
}

struct MonitorState {
    epoch: u64,
    last_seq: u64,
    history: MetricsHistory,
    latest: Option<MetricsSnapshot>,
    previous_net: Option<(i64, NetCounters)>,
    last_error: Option<String>,
}

impl MonitorState {
    fn reset(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.last_seq = 0;
        self.history.clear();
        self.latest = None;
        self.previous_net = None;
        self.last_error = None;
    }

    fn view(&self) -> Option<SystemMetrics> {
        let snapshot = self.latest.clone()?;
        Some(SystemMetrics {
            snapshot,
            cpu_history: self.history.cpu.to_vec(),
            memory_history: self.history.memory.to_vec(),
            network_history: self.history.network.to_vec(),
        })
    }
}

/// Keeps the latest snapshot and bounded histories for the active session.
pub struct MetricsMonitor {
    state: Mutex<MonitorState>,
}

impl MetricsMonitor {
    pub fn new(history_size: usize) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                epoch: 0,
                last_seq: 0,
                history: MetricsHistory::new(history_size),
                latest: None,
                previous_net: None,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_history_size(&self, size: usize) {
        self.lock().history.set_capacity(size);
    }

    /// Takes a fresh sample and appends it to the histories.
    pub async fn sample(&self, session: &Session) -> GatewayResult<SystemMetrics> {
        match session.run_completed(&SampleCmd).await {
            Ok(completed) => Ok(self.record(
                session.epoch(),
                completed.seq,
                chrono::Utc::now().timestamp_millis(),
                completed.value,
            )),
            Err(e) => {
                let mut state = self.lock();
                if state.epoch == session.epoch() {
                    state.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Appends a sample unless a later one has already been recorded; a new
    /// epoch starts from empty histories.
    pub fn record(&self, epoch: u64, seq: u64, timestamp: i64, raw: RawSample) -> SystemMetrics {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!("Metrics history reset for epoch {}", epoch);
            state.reset(epoch);
        }
        if seq <= state.last_seq {
            debug!("Discarding metrics sample {} (have {})", seq, state.last_seq);
            if let Some(view) = state.view() {
                return view;
            }
        }

        let (sent_per_sec, recv_per_sec) = match state.previous_net {
            Some((at, prev)) if timestamp > at => {
                let secs = (timestamp - at) as f64 / 1000.0;
                (
                    (raw.net.bytes_sent.saturating_sub(prev.bytes_sent) as f64 / secs) as u64,
                    (raw.net.bytes_recv.saturating_sub(prev.bytes_recv) as f64 / secs) as u64,
                )
            }
            _ => (0, 0),
        };

        let memory_percent = if raw.memory_total == 0 {
            0.0
        } else {
            (raw.memory_used as f64 / raw.memory_total as f64 * 1000.0).round() / 10.0
        };
        let snapshot = MetricsSnapshot {
            timestamp,
            cpu_percent: raw.cpu_percent,
            memory_used: raw.memory_used,
            memory_total: raw.memory_total,
            memory_percent,
            load_avg: raw.load_avg,
            disk_usage: raw.disks,
            network: NetworkStats {
                interface: raw.interface,
                bytes_sent: raw.net.bytes_sent,
                bytes_recv: raw.net.bytes_recv,
                packets_sent: raw.net.packets_sent,
                packets_recv: raw.net.packets_recv,
                sent_per_sec,
                recv_per_sec,
            },
            uptime: raw.uptime,
            process_count: raw.process_count,
        };

        state.history.cpu.push(snapshot.cpu_percent);
        state.history.memory.push(memory_percent);
        state.history.network.push(NetworkHistoryPoint {
            timestamp,
            bytes_sent: sent_per_sec,
            bytes_recv: recv_per_sec,
        });
        state.previous_net = Some((timestamp, raw.net));
        state.last_seq = seq;
        state.last_error = None;

        let view = SystemMetrics {
            snapshot: snapshot.clone(),
            cpu_history: state.history.cpu.to_vec(),
            memory_history: state.history.memory.to_vec(),
            network_history: state.history.network.to_vec(),
        };
        state.latest = Some(snapshot);
        view
    }

    /// Notes a failed background poll; the last good sample stays visible.
    pub fn record_failure(&self, epoch: u64, message: String) {
        warn!("Metrics poll failed: {}", message);
        let mut state = self.lock();
        if state.epoch == epoch {
            state.last_error = Some(message);
        }
    }

    /// The last good sample of `epoch`, if any.
    pub fn latest(&self, epoch: u64) -> Option<SystemMetrics> {
        let state = self.lock();
        if state.epoch != epoch {
            return None;
        }
        state.view()
    }

    pub fn last_error(&self, epoch: u64) -> Option<String> {
        let state = self.lock();
        (state.epoch == epoch).then(|| state.last_error.clone()).flatten()
    }
}

pub async fn cpu_cores(session: &Session) -> GatewayResult<u32> {
    let output = session
        .exec_checked("nproc 2>/dev/null || grep -c ^processor /proc/cpuinfo")
        .await?
        .value;
    Ok(output.trim().parse().unwrap_or(1).max(1))
}
