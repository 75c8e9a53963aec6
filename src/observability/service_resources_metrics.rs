use crate::observability::metrics::get_metrics;
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::sleep;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Samples CPU, memory and descriptors of this process until the runtime stops.
pub async fn collect_process_metrics(is_metrics_enabled: bool) -> Result<()> {
    if !is_metrics_enabled {
        return Ok(());
    }
    let metrics = get_metrics().await;
    let mut sys = System::new();
    let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("cannot resolve own pid: {}", e))?;

    let started_at = Utc::now().timestamp();
    metrics.process_start_time.set(started_at);

    loop {
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        if let Some(proc) = sys.process(pid) {
            // percentage over the last interval
            metrics.process_cpu_usage.set(proc.cpu_usage().into());
            metrics.process_memory_usage.set(proc.memory() as i64);

            #[cfg(target_family = "unix")]
            if let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", pid.as_u32())) {
                metrics.process_open_fds.set(entries.count() as i64);
            }

            metrics.process_uptime.set(Utc::now().timestamp() - started_at);
        }

        sleep(SAMPLE_INTERVAL).await;
    }
}
