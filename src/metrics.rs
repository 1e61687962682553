use crate::monitor::{RunSummary, SystemOutcome};
use crate::remote::ensure_parent_dir;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to write metrics file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub fleet_systems_total: Gauge,
    pub fleet_systems_unreachable: Gauge,
    pub fleet_system_up: GaugeVec,
    pub fleet_disk_free_bytes: GaugeVec,
    pub fleet_disk_low_space: GaugeVec,
    pub fleet_clock_drift_seconds: GaugeVec,
    pub fleet_clock_nudged: GaugeVec,
    pub fleet_uptime_seconds: GaugeVec,
    pub fleet_health_check_up: GaugeVec,
    pub fleet_health_check_latency_ms: GaugeVec,
    pub fleet_files_collected: GaugeVec,
    pub fleet_last_run_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let fleet_systems_total = Gauge::with_opts(opts!(
            "fleetwatch_systems_total",
            "Systems checked in the last run"
        ))?;
        let fleet_systems_unreachable = Gauge::with_opts(opts!(
            "fleetwatch_systems_unreachable",
            "Systems that could not be reached in the last run"
        ))?;
        let fleet_system_up = GaugeVec::new(
            opts!(
                "fleetwatch_system_up",
                "1 if the system was reached and probed, 0 if unreachable"
            ),
            &["host"],
        )?;
        let fleet_disk_free_bytes = GaugeVec::new(
            opts!(
                "fleetwatch_disk_free_bytes",
                "Available free bytes on the checked drive"
            ),
            &["host", "drive"],
        )?;
        let fleet_disk_low_space = GaugeVec::new(
            opts!(
                "fleetwatch_disk_low_space",
                "1 if free space is below the configured threshold"
            ),
            &["host", "drive"],
        )?;
        let fleet_clock_drift_seconds = GaugeVec::new(
            opts!(
                "fleetwatch_clock_drift_seconds",
                "Local minus remote clock in seconds"
            ),
            &["host"],
        )?;
        let fleet_clock_nudged = GaugeVec::new(
            opts!(
                "fleetwatch_clock_nudged",
                "Signed nudge applied to the remote clock (+1, -1 or 0)"
            ),
            &["host"],
        )?;
        let fleet_uptime_seconds = GaugeVec::new(
            opts!("fleetwatch_uptime_seconds", "Remote system uptime in seconds"),
            &["host"],
        )?;
        let fleet_health_check_up = GaugeVec::new(
            opts!(
                "fleetwatch_health_check_up",
                "1 if the health check returned the expected status"
            ),
            &["host", "url"],
        )?;
        let fleet_health_check_latency_ms = GaugeVec::new(
            opts!(
                "fleetwatch_health_check_latency_ms",
                "Health check latency in milliseconds"
            ),
            &["host", "url"],
        )?;
        let fleet_files_collected = GaugeVec::new(
            opts!(
                "fleetwatch_files_collected",
                "Files copied from the system in the last run"
            ),
            &["host"],
        )?;
        let fleet_last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "fleetwatch_last_run_timestamp_seconds",
            "Unix timestamp of the last finished run"
        ))?;

        register(&registry, &fleet_systems_total)?;
        register(&registry, &fleet_systems_unreachable)?;
        register(&registry, &fleet_system_up)?;
        register(&registry, &fleet_disk_free_bytes)?;
        register(&registry, &fleet_disk_low_space)?;
        register(&registry, &fleet_clock_drift_seconds)?;
        register(&registry, &fleet_clock_nudged)?;
        register(&registry, &fleet_uptime_seconds)?;
        register(&registry, &fleet_health_check_up)?;
        register(&registry, &fleet_health_check_latency_ms)?;
        register(&registry, &fleet_files_collected)?;
        register(&registry, &fleet_last_run_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            fleet_systems_total,
            fleet_systems_unreachable,
            fleet_system_up,
            fleet_disk_free_bytes,
            fleet_disk_low_space,
            fleet_clock_drift_seconds,
            fleet_clock_nudged,
            fleet_uptime_seconds,
            fleet_health_check_up,
            fleet_health_check_latency_ms,
            fleet_files_collected,
            fleet_last_run_timestamp_seconds,
        }))
    }

    pub fn record(&self, summary: &RunSummary) {
        self.fleet_system_up.reset();
        self.fleet_disk_free_bytes.reset();
        self.fleet_disk_low_space.reset();
        self.fleet_clock_drift_seconds.reset();
        self.fleet_clock_nudged.reset();
        self.fleet_uptime_seconds.reset();
        self.fleet_health_check_up.reset();
        self.fleet_health_check_latency_ms.reset();
        self.fleet_files_collected.reset();

        self.fleet_systems_total.set(summary.reports.len() as f64);
        self.fleet_systems_unreachable
            .set(summary.unreachable() as f64);

        for report in &summary.reports {
            let up = matches!(report.outcome, SystemOutcome::Success(_));
            self.fleet_system_up
                .with_label_values(&[report.hostname.as_str()])
                .set(if up { 1.0 } else { 0.0 });
        }

        for (report, probe) in summary.successes() {
            let host = report.hostname.as_str();
            self.fleet_disk_free_bytes
                .with_label_values(&[host, &probe.drive])
                .set(probe.free_bytes as f64);
            self.fleet_disk_low_space
                .with_label_values(&[host, &probe.drive])
                .set(if probe.low_space { 1.0 } else { 0.0 });
            self.fleet_clock_drift_seconds
                .with_label_values(&[host])
                .set(probe.drift_secs);
            let nudge = match probe.nudged.map(|d| d.sign()) {
                Some('+') => 1.0,
                Some(_) => -1.0,
                None => 0.0,
            };
            self.fleet_clock_nudged.with_label_values(&[host]).set(nudge);
            if let Some(uptime) = probe.uptime {
                self.fleet_uptime_seconds
                    .with_label_values(&[host])
                    .set(uptime.as_secs() as f64);
            }
            for check in &probe.health {
                self.fleet_health_check_up
                    .with_label_values(&[host, &check.url])
                    .set(if check.outcome.is_up() { 1.0 } else { 0.0 });
                self.fleet_health_check_latency_ms
                    .with_label_values(&[host, &check.url])
                    .set(check.latency_ms as f64);
            }
            self.fleet_files_collected
                .with_label_values(&[host])
                .set(probe.files_collected as f64);
        }

        self.fleet_last_run_timestamp_seconds
            .set(now_unix() as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    // Renamed into place so node-exporter never reads a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let encoded = self.encode_metrics()?;
        ensure_parent_dir(path)?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::checks::{HealthCheckResult, HealthOutcome};
    use crate::collectors::clock::ClockDirection;
    use crate::monitor::{ProbeReport, SystemReport};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn summary() -> RunSummary {
        let remote_time = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        RunSummary {
            reports: vec![
                SystemReport {
                    system_id: 1,
                    hostname: "line1-hmi".to_string(),
                    address: "10.0.0.21".to_string(),
                    outcome: SystemOutcome::Success(ProbeReport {
                        drive: "C".to_string(),
                        free_bytes: 12345678,
                        low_space: false,
                        remote_time,
                        drift_secs: -30.0,
                        nudged: Some(ClockDirection::Negative),
                        boot_time: None,
                        uptime: Some(Duration::from_secs(7200)),
                        health: vec![HealthCheckResult {
                            check_id: 1,
                            url: "http://10.0.0.21:5000/status".to_string(),
                            outcome: HealthOutcome::Match { status: 200 },
                            latency_ms: 12,
                        }],
                        files_collected: 0,
                    }),
                },
                SystemReport {
                    system_id: 2,
                    hostname: "qa-station".to_string(),
                    address: "qa-station".to_string(),
                    outcome: SystemOutcome::Unreachable {
                        error: "timed out connecting to qa-station".to_string(),
                    },
                },
            ],
        }
    }

    #[test]
    fn records_last_run() {
        let metrics = Metrics::new().expect("metrics init");
        metrics.record(&summary());
        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();

        assert!(text.contains("fleetwatch_systems_total 2"));
        assert!(text.contains("fleetwatch_systems_unreachable 1"));
        assert!(text.contains("drive=\"C\""));
        assert!(text.contains("host=\"line1-hmi\"} 12345678"));
        assert!(text.contains("fleetwatch_clock_nudged{host=\"line1-hmi\"} -1"));
        assert!(text.contains("fleetwatch_system_up{host=\"qa-station\"} 0"));
        assert!(text.contains("fleetwatch_system_up{host=\"line1-hmi\"} 1"));
        assert!(text.contains("fleetwatch_uptime_seconds{host=\"line1-hmi\"} 7200"));
    }

    #[test]
    fn textfile_is_written_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textfile").join("fleetwatch.prom");
        let metrics = Metrics::new().expect("metrics init");
        metrics.record(&summary());
        metrics.write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("fleetwatch_health_check_up"));
        assert!(!path.with_extension("prom.tmp").exists());
    }
}
