use super::shell::ShellFlavor;
use super::ProbeError;
use crate::remote::RemoteShell;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use tracing::{debug, warn};

pub const COMMAND: &str = "wmic os get LocalDateTime /value";

static LOCAL_DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*LocalDateTime=(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})\.(\d{6})([+-]\d{3})",
    )
    .expect("valid regex")
});

pub fn parse_local_date_time(output: &str) -> Result<NaiveDateTime, ProbeError> {
    let invalid = || ProbeError::Parse {
        probe: "clock",
        detail: format!("unexpected output {output:?}"),
    };
    let caps = LOCAL_DATE_TIME.captures(output).ok_or_else(invalid)?;
    let field = |i: usize| caps[i].parse::<u32>().map_err(|_| invalid());

    let year = caps[1].parse::<i32>().map_err(|_| invalid())?;
    let (month, day) = (field(2)?, field(3)?);
    let (hour, minute, second, micro) = (field(4)?, field(5)?, field(6)?, field(7)?);
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micro))
        .ok_or_else(invalid)
}

pub async fn system_time<S>(shell: &mut S) -> Result<NaiveDateTime, ProbeError>
where
    S: RemoteShell + ?Sized,
{
    let output = shell.exec(COMMAND).await?;
    parse_local_date_time(&output.stdout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDirection {
    Positive,
    Negative,
}

impl ClockDirection {
    pub fn sign(self) -> char {
        match self {
            ClockDirection::Positive => '+',
            ClockDirection::Negative => '-',
        }
    }
}

impl FromStr for ClockDirection {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "+" | "positive" => Ok(ClockDirection::Positive),
            "-" | "negative" => Ok(ClockDirection::Negative),
            _ => Err(ProbeError::InvalidArgument(format!(
                "clock direction must be +, -, positive or negative, got {s:?}"
            ))),
        }
    }
}

pub fn nudge_command(flavor: ShellFlavor, direction: ClockDirection, millis: u32) -> String {
    let set_date = format!(
        "Set-Date (Get-Date).AddMilliseconds({}{millis})",
        direction.sign()
    );
    match flavor {
        ShellFlavor::Cmd => format!("Powershell {set_date}"),
        ShellFlavor::PowerShell => set_date,
    }
}

pub async fn nudge<S>(
    shell: &mut S,
    flavor: ShellFlavor,
    direction: ClockDirection,
    millis: u32,
) -> Result<(), ProbeError>
where
    S: RemoteShell + ?Sized,
{
    let output = shell.exec(&nudge_command(flavor, direction, millis)).await?;
    match output.exit_status {
        Some(0) | None => {}
        Some(code) => warn!(host = %shell.host(), code, stderr = %output.stderr.trim(), "set-date exited with an error"),
    }
    if !output.stderr.trim().is_empty() {
        debug!(host = %shell.host(), stderr = %output.stderr.trim(), "set-date wrote to stderr");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftPlan {
    // local - remote
    pub drift_secs: f64,
    pub direction: Option<ClockDirection>,
}

pub fn plan_correction(
    local: NaiveDateTime,
    remote: NaiveDateTime,
    threshold_secs: f64,
) -> DriftPlan {
    let delta = local - remote;
    let drift_secs = delta
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| delta.num_seconds() as f64);

    let direction = if drift_secs.abs() <= threshold_secs {
        None
    } else if drift_secs > 0.0 {
        Some(ClockDirection::Positive)
    } else {
        Some(ClockDirection::Negative)
    };

    DriftPlan {
        drift_secs,
        direction,
    }
}
