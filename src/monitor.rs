use crate::collectors::checks::{run_health_checks, HealthCheckResult, HttpCheckSettings};
use crate::collectors::clock::{plan_correction, ClockDirection};
use crate::collectors::disk::format_bytes;
use crate::collectors::{ProbeError, RemoteSystem};
use crate::config::{Config, DriveCheckPolicy};
use crate::registry::{HealthCheckDefinition, RegisteredSystem, RegistryError, RegistryStore};
use crate::remote::{plan_transfers, ConnectionTarget, Connector, RemoteShell};
use chrono::{Local, NaiveDateTime};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("probing {host} failed: {source}")]
    Probe {
        host: String,
        #[source]
        source: ProbeError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub ssh_port: u16,
    pub correct_drift: bool,
    pub drift_threshold_secs: f64,
    pub nudge_ms: u32,
    pub http: HttpCheckSettings,
    pub collect_dir: Option<PathBuf>,
}

impl MonitorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ssh_port: cfg.ssh.port,
            correct_drift: cfg.clock.correct_drift,
            drift_threshold_secs: cfg.clock.drift_threshold_secs,
            nudge_ms: cfg.clock.nudge_ms,
            http: HttpCheckSettings {
                scheme: cfg.http_checks.scheme.clone(),
                timeout: Duration::from_millis(cfg.http_checks.timeout_ms),
            },
            collect_dir: cfg.collect_dir.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemJob {
    pub system: RegisteredSystem,
    pub checks: Vec<HealthCheckDefinition>,
    pub policy: DriveCheckPolicy,
    pub collect_files: Vec<String>,
}

pub async fn jobs_from_registry(
    store: &RegistryStore,
    cfg: &Config,
) -> Result<Vec<SystemJob>, RegistryError> {
    let mut jobs = Vec::new();
    for system in store.active_systems().await? {
        let checks = store.health_checks(system.id).await?;
        let policy = cfg.drive_policy(&system.hostname);
        let collect_files = cfg
            .system(&system.hostname)
            .map(|s| s.collect_files.clone())
            .unwrap_or_default();
        jobs.push(SystemJob {
            system,
            checks,
            policy,
            collect_files,
        });
    }
    Ok(jobs)
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub drive: String,
    pub free_bytes: u64,
    pub low_space: bool,
    pub remote_time: NaiveDateTime,
    pub drift_secs: f64,
    pub nudged: Option<ClockDirection>,
    pub boot_time: Option<NaiveDateTime>,
    pub uptime: Option<Duration>,
    pub health: Vec<HealthCheckResult>,
    pub files_collected: usize,
}

#[derive(Debug)]
pub enum SystemOutcome {
    Unreachable { error: String },
    ProbeFailure(ProbeError),
    Success(ProbeReport),
}

#[derive(Debug)]
pub struct SystemReport {
    pub system_id: i32,
    pub hostname: String,
    pub address: String,
    pub outcome: SystemOutcome,
}

// Never contains a probe failure; the run aborts on the first one.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<SystemReport>,
}

impl RunSummary {
    pub fn unreachable(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SystemOutcome::Unreachable { .. }))
            .count()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&SystemReport, &ProbeReport)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            SystemOutcome::Success(probe) => Some((r, probe)),
            _ => None,
        })
    }
}

type LocalClock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct Monitor<C> {
    connector: C,
    client: Client,
    settings: MonitorSettings,
    local_clock: LocalClock,
}

impl<C: Connector> Monitor<C> {
    pub fn new(connector: C, client: Client, settings: MonitorSettings) -> Self {
        Self {
            connector,
            client,
            settings,
            local_clock: Box::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_local_clock(
        mut self,
        clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static,
    ) -> Self {
        self.local_clock = Box::new(clock);
        self
    }

    pub async fn run(&self, jobs: &[SystemJob]) -> Result<RunSummary, MonitorError> {
        let mut summary = RunSummary::default();
        for job in jobs {
            let report = self.check_system(job).await;
            match report.outcome {
                SystemOutcome::ProbeFailure(source) => {
                    return Err(MonitorError::Probe {
                        host: report.hostname,
                        source,
                    });
                }
                _ => summary.reports.push(report),
            }
        }
        info!(
            systems = summary.reports.len(),
            unreachable = summary.unreachable(),
            "monitoring pass finished"
        );
        for report in &summary.reports {
            match &report.outcome {
                SystemOutcome::Success(probe) => info!(
                    id = report.system_id,
                    host = %report.hostname,
                    address = %report.address,
                    remote_time = %probe.remote_time,
                    boot_time = ?probe.boot_time,
                    free = %format_bytes(probe.free_bytes),
                    "system ok"
                ),
                SystemOutcome::Unreachable { error } => warn!(
                    id = report.system_id,
                    host = %report.hostname,
                    address = %report.address,
                    error = %error,
                    "system unreachable"
                ),
                SystemOutcome::ProbeFailure(_) => {}
            }
        }
        Ok(summary)
    }

    pub async fn check_system(&self, job: &SystemJob) -> SystemReport {
        let system = &job.system;
        let address = system.address().to_string();
        let report = |outcome| SystemReport {
            system_id: system.id,
            hostname: system.hostname.clone(),
            address: address.clone(),
            outcome,
        };

        let target = ConnectionTarget {
            host: address.clone(),
            port: self.settings.ssh_port,
            username: system.username.clone(),
            password: system.password.clone(),
        };
        info!(host = %system.display_name(), address = %address, "checking system");

        let shell = match self.connector.connect(&target).await {
            Ok(shell) => shell,
            Err(err) if err.is_unreachable() => {
                warn!(host = %address, error = %err, "could not connect to remote host, skipping");
                return report(SystemOutcome::Unreachable {
                    error: err.to_string(),
                });
            }
            Err(err) => return report(SystemOutcome::ProbeFailure(err.into())),
        };

        let mut remote = RemoteSystem::new(shell);
        let probed = self.probe(&mut remote, job).await;
        if let Err(err) = remote.close().await {
            warn!(host = %address, error = %err, "failed to close connection");
        }

        match probed {
            Ok(probe) => report(SystemOutcome::Success(probe)),
            Err(err) => report(SystemOutcome::ProbeFailure(err)),
        }
    }

    async fn probe<S: RemoteShell>(
        &self,
        remote: &mut RemoteSystem<S>,
        job: &SystemJob,
    ) -> Result<ProbeReport, ProbeError> {
        let host = remote.host().to_string();

        let free_bytes = remote.free_space(&job.policy.drive_letter).await?;
        let low_space = job
            .policy
            .alert_threshold_bytes
            .is_some_and(|threshold| free_bytes < threshold);
        if low_space {
            warn!(
                host = %host,
                drive = %job.policy.drive_letter,
                free = %format_bytes(free_bytes),
                "low free disk space"
            );
        } else {
            info!(host = %host, drive = %job.policy.drive_letter, free = %format_bytes(free_bytes), "free disk space");
        }

        let remote_time = remote.system_time().await?;
        let local_time = (self.local_clock)();
        let plan = plan_correction(local_time, remote_time, self.settings.drift_threshold_secs);
        info!(host = %host, remote_time = %remote_time, drift_secs = plan.drift_secs, "remote clock");

        let mut nudged = None;
        if let Some(direction) = plan.direction {
            if self.settings.correct_drift {
                info!(
                    host = %host,
                    drift_secs = plan.drift_secs,
                    direction = %direction.sign(),
                    "clock drift exceeds threshold, applying correction"
                );
                remote.nudge_clock(direction, self.settings.nudge_ms).await?;
                nudged = Some(direction);
            } else {
                warn!(host = %host, drift_secs = plan.drift_secs, "clock drift exceeds threshold, correction disabled");
            }
        }

        let boot_time = remote.boot_time().await?;
        let uptime = boot_time.and_then(|boot| (remote_time - boot).to_std().ok());
        match (boot_time, uptime) {
            (Some(boot), Some(up)) => info!(
                host = %host,
                boot_time = %boot,
                uptime = %humantime::format_duration(Duration::from_secs(up.as_secs())),
                "uptime"
            ),
            _ => debug!(host = %host, "boot time not reported"),
        }

        let health = run_health_checks(
            &self.client,
            &self.settings.http,
            job.system.address(),
            &job.checks,
        )
        .await;

        let files_collected = self.collect_files(remote, job).await?;

        Ok(ProbeReport {
            drive: job.policy.drive_letter.to_ascii_uppercase(),
            free_bytes,
            low_space,
            remote_time,
            drift_secs: plan.drift_secs,
            nudged,
            boot_time,
            uptime,
            health,
            files_collected,
        })
    }

    async fn collect_files<S: RemoteShell>(
        &self,
        remote: &mut RemoteSystem<S>,
        job: &SystemJob,
    ) -> Result<usize, ProbeError> {
        if job.collect_files.is_empty() {
            return Ok(0);
        }
        let Some(dir) = &self.settings.collect_dir else {
            debug!(host = %remote.host(), "no collect_dir configured, skipping file collection");
            return Ok(0);
        };

        let transfers = plan_transfers(&job.collect_files, &dir.join(&job.system.hostname));
        let copied = remote.fetch_files(&transfers).await?;
        info!(host = %remote.host(), requested = transfers.len(), copied, "files collected");
        Ok(copied)
    }
}
