use crate::registry::{HealthCheckDefinition, HealthCondition};
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HttpCheckSettings {
    pub scheme: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealthOutcome {
    Match { status: u16 },
    Mismatch { expected: u16, actual: u16 },
    Timeout,
    Unreachable { error: String },
}

impl HealthOutcome {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthOutcome::Match { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub check_id: i32,
    pub url: String,
    pub outcome: HealthOutcome,
    pub latency_ms: u64,
}

pub fn check_url(scheme: &str, address: &str, port: u16, suffix: &str) -> String {
    let suffix = suffix.strip_prefix('/').unwrap_or(suffix);
    format!("{scheme}://{address}:{port}/{suffix}")
}

pub async fn run_health_check(
    client: &Client,
    settings: &HttpCheckSettings,
    address: &str,
    check: &HealthCheckDefinition,
) -> Option<HealthCheckResult> {
    let expected = match &check.condition {
        HealthCondition::StatusCode(code) => *code,
        HealthCondition::Other { kind } => {
            warn!(check = check.id, kind = %kind, "unsupported health condition, skipping");
            return None;
        }
    };

    let url = check_url(&settings.scheme, address, check.port, &check.path_suffix);
    let start = Instant::now();
    let req = client.get(&url).timeout(settings.timeout);

    let outcome = match req.send().await {
        Ok(resp) => {
            let actual = resp.status().as_u16();
            if actual == expected {
                info!(url = %url, status = actual, "health check passed");
                HealthOutcome::Match { status: actual }
            } else {
                warn!(url = %url, expected, actual, "health check returned unexpected status");
                HealthOutcome::Mismatch { expected, actual }
            }
        }
        Err(err) if err.is_timeout() => {
            warn!(url = %url, timeout_ms = settings.timeout.as_millis() as u64, "health check timed out");
            HealthOutcome::Timeout
        }
        Err(err) => {
            warn!(url = %url, error = %err, "health check failed");
            HealthOutcome::Unreachable {
                error: err.to_string(),
            }
        }
    };

    Some(HealthCheckResult {
        check_id: check.id,
        url,
        outcome,
        latency_ms: start.elapsed().as_millis() as u64,
    })
}

pub async fn run_health_checks(
    client: &Client,
    settings: &HttpCheckSettings,
    address: &str,
    checks: &[HealthCheckDefinition],
) -> Vec<HealthCheckResult> {
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        if let Some(result) = run_health_check(client, settings, address, check).await {
            results.push(result);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(timeout: Duration) -> HttpCheckSettings {
        HttpCheckSettings {
            scheme: "http".to_string(),
            timeout,
        }
    }

    fn definition(id: i32, port: u16, suffix: &str, condition: HealthCondition) -> HealthCheckDefinition {
        HealthCheckDefinition {
            id,
            system_id: 1,
            port,
            path_suffix: suffix.to_string(),
            condition,
        }
    }

    #[test]
    fn suffix_slash_is_not_doubled() {
        assert_eq!(check_url("http", "10.0.0.5", 5000, "status"), "http://10.0.0.5:5000/status");
        assert_eq!(check_url("https", "hmi", 443, "/status"), "https://hmi:443/status");
        assert_eq!(check_url("http", "hmi", 80, ""), "http://hmi:80/");
    }

    #[tokio::test]
    async fn matching_status_is_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let addr = server.address();

        let check = definition(1, addr.port(), "/status", HealthCondition::StatusCode(200));
        let result = run_health_check(
            &Client::new(),
            &settings(Duration::from_secs(5)),
            &addr.ip().to_string(),
            &check,
        )
        .await
        .unwrap();

        assert_eq!(result.outcome, HealthOutcome::Match { status: 200 });
        assert!(result.outcome.is_up());
    }

    #[tokio::test]
    async fn other_status_is_a_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let addr = server.address();

        let check = definition(1, addr.port(), "missing", HealthCondition::StatusCode(200));
        let result = run_health_check(
            &Client::new(),
            &settings(Duration::from_secs(5)),
            &addr.ip().to_string(),
            &check,
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcome,
            HealthOutcome::Mismatch {
                expected: 200,
                actual: 404
            }
        );
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_and_later_checks_still_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let addr = server.address();

        let checks = vec![
            definition(1, addr.port(), "slow", HealthCondition::StatusCode(200)),
            definition(2, addr.port(), "fast", HealthCondition::StatusCode(200)),
        ];
        let results = run_health_checks(
            &Client::new(),
            &settings(Duration::from_millis(200)),
            &addr.ip().to_string(),
            &checks,
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, HealthOutcome::Timeout);
        assert_eq!(results[1].outcome, HealthOutcome::Match { status: 200 });
    }

    #[tokio::test]
    async fn refused_connection_is_reported_not_raised() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let check = definition(1, port, "status", HealthCondition::StatusCode(200));
        let result = run_health_check(
            &Client::new(),
            &settings(Duration::from_secs(2)),
            "127.0.0.1",
            &check,
        )
        .await
        .unwrap();

        assert!(matches!(result.outcome, HealthOutcome::Unreachable { .. }));
    }

    #[tokio::test]
    async fn unknown_conditions_are_skipped() {
        let check = definition(
            1,
            80,
            "status",
            HealthCondition::Other {
                kind: "body_contains".to_string(),
            },
        );
        let result = run_health_check(
            &Client::new(),
            &settings(Duration::from_secs(1)),
            "127.0.0.1",
            &check,
        )
        .await;
        assert!(result.is_none());
    }
}
