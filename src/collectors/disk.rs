use super::ProbeError;
use crate::remote::RemoteShell;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static FIRST_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveLetter(char);

impl DriveLetter {
    pub fn parse(input: &str) -> Result<Self, ProbeError> {
        let mut chars = input.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Ok(Self(c)),
            _ => Err(ProbeError::InvalidArgument(format!(
                "drive letter must be a single letter, got {input:?}"
            ))),
        }
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl std::fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskFree {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub fn diskfree_command(drive: DriveLetter) -> String {
    format!("fsutil volume diskfree {}:", drive.as_char())
}

// Expects exactly the three classic report lines. Only the first run of digits
// on each line counts, so labels may be localised.
pub fn parse_diskfree(output: &str) -> Result<DiskFree, ProbeError> {
    let mut values = Vec::with_capacity(3);
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let digits = FIRST_DIGITS.find(line).ok_or_else(|| ProbeError::Parse {
            probe: "diskfree",
            detail: format!("no number in line {line:?}"),
        })?;
        let value = digits.as_str().parse::<u64>().map_err(|err| ProbeError::Parse {
            probe: "diskfree",
            detail: format!("{err} in line {line:?}"),
        })?;
        values.push(value);
    }

    match values[..] {
        [free_bytes, total_bytes, available_bytes] => Ok(DiskFree {
            free_bytes,
            total_bytes,
            available_bytes,
        }),
        _ => Err(ProbeError::Parse {
            probe: "diskfree",
            detail: format!("expected 3 report lines, found {}", values.len()),
        }),
    }
}

pub async fn free_space<S>(shell: &mut S, drive: &str) -> Result<u64, ProbeError>
where
    S: RemoteShell + ?Sized,
{
    let drive = DriveLetter::parse(drive)?;
    let output = shell.exec(&diskfree_command(drive)).await?;
    let disk = parse_diskfree(&output.stdout)?;
    debug!(
        host = %shell.host(),
        drive = %drive,
        free = disk.free_bytes,
        total = disk.total_bytes,
        available = disk.available_bytes,
        "diskfree"
    );
    Ok(disk.available_bytes)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
