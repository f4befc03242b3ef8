use crate::error::{GatewayError, GatewayResult};
use crate::server::remote_cmd::RemoteCommand;
use serde::{Deserialize, Serialize};

const MEM_MARKER: &str = "@@mem";
const LOAD_MARKER: &str = "@@load";
const DISK_MARKER: &str = "@@disk";
const NET_MARKER: &str = "@@net";
const IFACE_MARKER: &str = "@@iface";
const UPTIME_MARKER: &str = "@@uptime";
const PROCS_MARKER: &str = "@@procs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub used: u64,
    pub total: u64,
    pub percent: f64,
}

/// Cumulative interface counters as read from `/proc/net/dev`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetCounters {
    pub bytes_recv: u64,
    pub packets_recv: u64,
    pub bytes_sent: u64,
    pub packets_sent: u64,
}

/// One raw reading of the host, before deltas against the previous sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub load_avg: [f64; 3],
    pub disks: Vec<DiskUsage>,
    pub interface: String,
    pub net: NetCounters,
    pub uptime: u64,
    pub process_count: u32,
}

/// Reads everything the dashboard needs in a single round trip. CPU usage
/// comes from two `/proc/stat` readings 200ms apart.
pub struct SampleCmd;

impl RemoteCommand for SampleCmd {
    type Output = RawSample;

    fn to_shell_string(&self) -> String {
        format!(
            "head -1 /proc/stat; sleep 0.2; head -1 /proc/stat; \
             echo {mem}; cat /proc/meminfo; \
             echo {load}; cat /proc/loadavg; \
             echo {disk}; df -B1 -x tmpfs -x devtmpfs -x squashfs -x overlay --output=target,used,size 2>/dev/null; \
             echo {net}; cat /proc/net/dev; \
             echo {iface}; ip route show default 2>/dev/null | awk '{{print $5; exit}}'; \
             echo {uptime}; cat /proc/uptime; \
             echo {procs}; ls -d /proc/[0-9]* | wc -l",
            mem = MEM_MARKER,
            load = LOAD_MARKER,
            disk = DISK_MARKER,
            net = NET_MARKER,
            iface = IFACE_MARKER,
            uptime = UPTIME_MARKER,
            procs = PROCS_MARKER
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let mut sections = Sections::new(output);
        let stat = sections.until(MEM_MARKER)?;
        let meminfo = sections.until(LOAD_MARKER)?;
        let loadavg = sections.until(DISK_MARKER)?;
        let df = sections.until(NET_MARKER)?;
        let net_dev = sections.until(IFACE_MARKER)?;
        let iface = sections.until(UPTIME_MARKER)?;
        let uptime = sections.until(PROCS_MARKER)?;
        let procs = sections.rest();

        let (memory_total, memory_used) = parse_meminfo(meminfo);
        let interface = iface.trim().to_string();
        Ok(RawSample {
            cpu_percent: parse_cpu(stat)?,
            memory_used,
            memory_total,
            load_avg: parse_loadavg(loadavg),
            disks: parse_df(df),
            net: parse_net_dev(net_dev, &interface),
            interface,
            uptime: uptime
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<f64>().ok())
                .map(|s| s as u64)
                .unwrap_or(0),
            process_count: procs.trim().parse().unwrap_or(0),
        })
    }
}

struct Sections<'a> {
    rest: &'a str,
}

impl<'a> Sections<'a> {
    fn new(output: &'a str) -> Self {
        Self { rest: output }
    }

    fn until(&mut self, marker: &str) -> GatewayResult<&'a str> {
        let (head, tail) = self.rest.split_once(marker).ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!("Metrics output is missing {}", marker))
        })?;
        self.rest = tail;
        Ok(head)
    }

    fn rest(&self) -> &'a str {
        self.rest
    }
}

/// `(total, idle)` jiffies of a `cpu ...` line.
fn cpu_times(line: &str) -> Option<(u64, u64)> {
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some((fields.iter().sum(), idle))
}

pub fn parse_cpu(stat: &str) -> GatewayResult<f64> {
    let readings: Vec<(u64, u64)> = stat
        .lines()
        .filter(|l| l.starts_with("cpu "))
        .filter_map(cpu_times)
        .collect();
    let [(total1, idle1), (total2, idle2)] = readings[..] else {
        return Err(GatewayError::Internal(anyhow::anyhow!(
            "Expected two /proc/stat readings, got {}",
            readings.len()
        )));
    };
    let total = total2.saturating_sub(total1);
    if total == 0 {
        return Ok(0.0);
    }
    let idle = idle2.saturating_sub(idle1).min(total);
    Ok(((total - idle) as f64 / total as f64 * 100.0 * 10.0).round() / 10.0)
}

/// `(total, used)` in bytes.
pub fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let value = |key: &str| {
        meminfo.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };
    let total = value("MemTotal").unwrap_or(0);
    let available = value("MemAvailable")
        .or_else(|| Some(value("MemFree")? + value("Buffers")? + value("Cached")?))
        .unwrap_or(0);
    (total * 1024, total.saturating_sub(available) * 1024)
}

fn parse_loadavg(loadavg: &str) -> [f64; 3] {
    let mut values = loadavg
        .split_whitespace()
        .map(|v| v.parse::<f64>().unwrap_or(0.0));
    [
        values.next().unwrap_or(0.0),
        values.next().unwrap_or(0.0),
        values.next().unwrap_or(0.0),
    ]
}

pub fn parse_df(df: &str) -> Vec<DiskUsage> {
    df.lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return None;
            }
            let total: u64 = tokens[tokens.len() - 1].parse().ok()?;
            let used: u64 = tokens[tokens.len() - 2].parse().ok()?;
            let mount_point = tokens[..tokens.len() - 2].join(" ");
            let percent = if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64 * 1000.0).round() / 10.0
            };
            Some(DiskUsage {
                mount_point,
                used,
                total,
                percent,
            })
        })
        .collect()
}

/// Counters of `interface`, or the sum of all non-loopback interfaces when
/// the default route is unknown.
pub fn parse_net_dev(net_dev: &str, interface: &str) -> NetCounters {
    let mut total = NetCounters::default();
    for line in net_dev.lines() {
        let Some((name, data)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name == "lo" || (!interface.is_empty() && name != interface) {
            continue;
        }
        let fields: Vec<u64> = data
            .split_whitespace()
            .map(|f| f.parse().unwrap_or(0))
            .collect();
        if fields.len() < 10 {
            continue;
        }
        total.bytes_recv += fields[0];
        total.packets_recv += fields[1];
        total.bytes_sent += fields[8];
        total.packets_sent += fields[9];
    }
    total
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Output of `SampleCmd` with the given second cpu reading and
    /// cumulative received/sent bytes on eth0.
    pub fn sample_output(cpu_busy: u64, recv: u64, sent: u64) -> String {
        format!(
            "cpu  100 0 100 800 0 0 0 0 0 0\n\
             cpu  {busy} 0 100 {idle} 0 0 0 0 0 0\n\
             {mem}\nMemTotal:        2048000 kB\nMemFree:          100000 kB\nMemAvailable:    1024000 kB\n\
             {load}\n0.50 0.40 0.30 1/123 4567\n\
             {disk}\nMounted on         Used   1B-blocks\n/          5000000000 20000000000\n/boot        100000000   500000000\n\
             {net}\nInter-|   Receive\n face |bytes    packets\n    lo: 999 9 0 0 0 0 0 0 999 9 0 0 0 0 0 0\n  eth0: {recv} 10 0 0 0 0 0 0 {sent} 20 0 0 0 0 0 0\n\
             {iface}\neth0\n\
             {uptime}\n86400.55 170000.00\n\
             {procs}\n142\n",
            busy = 100 + cpu_busy,
            idle = 800 + (100 - cpu_busy),
            recv = recv,
            sent = sent,
            mem = MEM_MARKER,
            load = LOAD_MARKER,
            disk = DISK_MARKER,
            net = NET_MARKER,
            iface = IFACE_MARKER,
            uptime = UPTIME_MARKER,
            procs = PROCS_MARKER
        )
    }
}
