use super::ProbeError;
use crate::remote::RemoteShell;
use serde::Serialize;

pub const DETECT_COMMAND: &str = "(dir 2>&1 *`|echo CMD);&<# rem #>echo PowerShell";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShellFlavor {
    Cmd,
    PowerShell,
}

pub fn parse_flavor(output: &str) -> Result<ShellFlavor, ProbeError> {
    let mut saw_cmd = false;
    for line in output.lines().map(str::trim) {
        match line {
            "PowerShell" => return Ok(ShellFlavor::PowerShell),
            "CMD" => saw_cmd = true,
            _ => {}
        }
    }
    if saw_cmd {
        Ok(ShellFlavor::Cmd)
    } else {
        Err(ProbeError::Parse {
            probe: "shell flavor",
            detail: format!("no marker in {output:?}"),
        })
    }
}

pub async fn detect<S>(shell: &mut S) -> Result<ShellFlavor, ProbeError>
where
    S: RemoteShell + ?Sized,
{
    let output = shell.exec(DETECT_COMMAND).await?;
    parse_flavor(&output.stdout)
}
