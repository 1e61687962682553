use super::ProbeError;
use crate::remote::RemoteShell;
use chrono::NaiveDateTime;

pub const COMMAND: &str = "net statistics workstation";

const SINCE_MARKER: &str = "since ";
const SINCE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

pub fn parse_boot_time(output: &str) -> Option<NaiveDateTime> {
    output.lines().map(str::trim).find_map(|line| {
        let idx = line.find(SINCE_MARKER)?;
        let rest = line[idx + SINCE_MARKER.len()..].trim();
        NaiveDateTime::parse_from_str(rest, SINCE_FORMAT).ok()
    })
}

pub async fn boot_time<S>(shell: &mut S) -> Result<Option<NaiveDateTime>, ProbeError>
where
    S: RemoteShell + ?Sized,
{
    let output = shell.exec(COMMAND).await?;
    Ok(parse_boot_time(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const NET_STATISTICS: &str = "Workstation Statistics for \\\\LINE1-HMI\r\n\
                                  \r\n\
                                  \r\n\
                                  Statistics since 1/15/2024 8:02:11 AM\r\n\
                                  \r\n\
                                  \r\n\
                                  Bytes received                               190312\r\n";

    #[test]
    fn reads_statistics_since_line() {
        assert_eq!(
            parse_boot_time(NET_STATISTICS),
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(8, 2, 11)
        );
    }

    #[test]
    fn pm_times_are_converted() {
        let parsed = parse_boot_time("Statistics since 12/31/2023 11:59:59 PM").unwrap();
        assert_eq!(parsed.to_string(), "2023-12-31 23:59:59");
    }

    #[test]
    fn first_parseable_line_wins() {
        let output = "Statistics since yesterday\r\n\
                      Statistics since 2/1/2024 1:00:00 PM\r\n\
                      Statistics since 3/1/2024 1:00:00 PM\r\n";
        assert_eq!(
            parse_boot_time(output).unwrap().to_string(),
            "2024-02-01 13:00:00"
        );
    }

    #[test]
    fn no_match_yields_nothing() {
        assert_eq!(parse_boot_time(""), None);
        assert_eq!(parse_boot_time("Statistics since 15.01.2024 08:02:11"), None);
    }
}
