//! HTTP health verification for the workshop services.
//!
//! Checks are independent per service: a timeout or refused connection on one
//! endpoint never influences the classification of another.

use crate::WorkshopError;
use crate::retry::retry;
use crate::services::{HealthExpectation, ServiceDefinition};
use log::debug;
use std::fmt;
use std::time::Duration;

pub(crate) const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub(crate) const HEALTH_POLL_ATTEMPTS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthState {
    Healthy,
    /// Reached the endpoint but got a non-2xx status or a malformed body.
    Unhealthy(String),
    /// Timeout or connection failure.
    Unreachable(String),
    /// Not checked, e.g. the container is not running.
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy(reason) => write!(f, "unhealthy ({reason})"),
            HealthState::Unreachable(reason) => write!(f, "unreachable ({reason})"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Single bounded-timeout probe of one health endpoint.
pub(crate) async fn check_url(
    url: &str,
    expectation: &HealthExpectation,
    timeout: Duration,
) -> HealthState {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return HealthState::Unreachable(e.to_string()),
    };
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => return HealthState::Unreachable(e.to_string()),
    };

    let status = response.status();
    if !status.is_success() {
        return HealthState::Unhealthy(format!("status {status}"));
    }

    match expectation {
        HealthExpectation::Status2xx => HealthState::Healthy,
        HealthExpectation::JsonField(field) => {
            match response.json::<serde_json::Value>().await {
                Ok(body) if body.get(field).is_some() => HealthState::Healthy,
                Ok(_) => HealthState::Unhealthy(format!("response body missing `{field}`")),
                Err(e) => HealthState::Unhealthy(format!("malformed body: {e}")),
            }
        }
    }
}

pub(crate) async fn check(def: &ServiceDefinition) -> HealthState {
    check_url(&def.health_url(), &def.health.expectation, def.health.timeout).await
}

/// Polls until the service reports healthy, every 2s for up to 30 attempts.
pub(crate) async fn wait_healthy(def: &ServiceDefinition) -> Result<(), WorkshopError> {
    retry(HEALTH_POLL_ATTEMPTS, HEALTH_POLL_INTERVAL, || async {
        match check(def).await {
            HealthState::Healthy => Ok(()),
            state => {
                debug!("`{}` not ready yet: {state}", def.name);
                Err(WorkshopError::HealthCheckUnhealthy {
                    service: def.name.to_string(),
                    reason: state.to_string(),
                })
            }
        }
    })
    .await
    .map_err(|_| WorkshopError::HealthCheckTimeout {
        service: def.name.to_string(),
        attempts: HEALTH_POLL_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TEST_TIMEOUT: Duration = Duration::from_millis(500);

    /// Serves exactly one HTTP response on an ephemeral port.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn heartbeat_body_classifies_as_healthy() {
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"nanosecond heartbeat": 1706094876123456789}"#,
        )
        .await;
        let state = check_url(
            &url,
            &HealthExpectation::JsonField("nanosecond heartbeat"),
            TEST_TIMEOUT,
        )
        .await;
        assert_eq!(state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn missing_heartbeat_field_is_unhealthy() {
        let url = one_shot_server("HTTP/1.1 200 OK", r#"{"status": "ok"}"#).await;
        let state = check_url(
            &url,
            &HealthExpectation::JsonField("nanosecond heartbeat"),
            TEST_TIMEOUT,
        )
        .await;
        assert!(matches!(state, HealthState::Unhealthy(_)));
    }

    #[tokio::test]
    async fn server_error_is_unhealthy() {
        let url = one_shot_server("HTTP/1.1 500 Internal Server Error", "{}").await;
        let state = check_url(&url, &HealthExpectation::Status2xx, TEST_TIMEOUT).await;
        assert!(matches!(state, HealthState::Unhealthy(reason) if reason.contains("500")));
    }

    #[tokio::test]
    async fn plain_success_is_healthy() {
        let url = one_shot_server("HTTP/1.1 200 OK", r#"{"status":"ok"}"#).await;
        let state = check_url(&url, &HealthExpectation::Status2xx, TEST_TIMEOUT).await;
        assert_eq!(state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // bind to learn a free port, then drop the listener
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let state = check_url(
            &format!("http://{addr}"),
            &HealthExpectation::Status2xx,
            TEST_TIMEOUT,
        )
        .await;
        assert!(matches!(state, HealthState::Unreachable(_)));
    }

    #[tokio::test]
    async fn stalled_server_times_out_as_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // accept and hold the socket open without ever answering
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(socket);
            }
        });

        let state = check_url(
            &format!("http://{addr}"),
            &HealthExpectation::Status2xx,
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(state, HealthState::Unreachable(_)));
    }
}
