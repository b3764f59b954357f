//! Resilient HTTP request utilities using retry middleware.
//!
//! Wraps HTTP operations with a [`seatbelt`] retry layer so that transient network failures and
//! throttling responses are masked automatically. Backoff waits run on the caller's [`Clock`].

use core::time::Duration;
use layered::{Execute, Service, Stack};
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use seatbelt::retry::{Backoff, Retry};
use seatbelt::{RecoveryInfo, ResilienceContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tick::Clock;

const LOG_TARGET: &str = "      http";

/// Statuses that are always retried.
const RETRY_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Retry budgets for transport-level failures.
///
/// `total` bounds every kind of retry, `connect` and `read` additionally bound connection and
/// read failures. Backoff is exponential with `backoff_factor` seconds as the base delay.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub total: u32,
    pub connect: u32,
    pub read: u32,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 3,
            connect: 3,
            read: 3,
            backoff_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Base delay of the exponential backoff.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_factor).unwrap_or_default()
    }
}

/// One request, replayable for every attempt.
#[derive(Debug, Clone)]
pub enum HttpRequest {
    Get(String),
    PostJson(String, Value),
}

impl HttpRequest {
    fn url(&self) -> &str {
        match self {
            Self::Get(url) | Self::PostJson(url, _) => url,
        }
    }

    async fn send(self, http: &reqwest::Client) -> reqwest::Result<Response> {
        match self {
            Self::Get(url) => http.get(&url).send().await,
            Self::PostJson(url, body) => http.post(&url).json(&body).send().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Connect,
    Read,
    Status,
}

/// Remaining retries for one request.
#[derive(Debug)]
struct Budget {
    total: u32,
    connect: u32,
    read: u32,
}

impl Budget {
    const fn new(policy: &RetryPolicy) -> Self {
        Self {
            total: policy.total,
            connect: policy.connect,
            read: policy.read,
        }
    }

    /// Consume one retry of the given kind, returning `false` when the budget is exhausted.
    const fn consume(&mut self, failure: Failure) -> bool {
        if self.total == 0 {
            return false;
        }

        let specific = match failure {
            Failure::Connect => &mut self.connect,
            Failure::Read => &mut self.read,
            Failure::Status => {
                self.total -= 1;
                return true;
            }
        };

        if *specific == 0 {
            return false;
        }

        *specific -= 1;
        self.total -= 1;
        true
    }
}

/// The server-requested wait in a `Retry-After` header, in whole seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .map(Duration::from_secs)
}

/// Which budget a result draws from, and any delay the server asked for.
fn classify(result: &reqwest::Result<Response>) -> Option<(Failure, Option<Duration>)> {
    match result {
        // Malformed requests never get better.
        Err(e) if e.is_builder() => None,
        Err(e) if e.is_connect() => Some((Failure::Connect, None)),

        // Timeouts and broken bodies count against the read budget.
        Err(_) => Some((Failure::Read, None)),

        Ok(resp) if RETRY_STATUSES.contains(&resp.status()) => Some((Failure::Status, retry_after(resp.headers()))),

        // A 403 only signals the secondary rate limit when it says how long to back off.
        Ok(resp) if resp.status() == StatusCode::FORBIDDEN => {
            retry_after(resp.headers()).map(|delay| (Failure::Status, Some(delay)))
        }

        Ok(_) => None,
    }
}

/// Turn a classification into a recovery decision, drawing from `budget`.
fn recovery(result: &reqwest::Result<Response>, budget: &Mutex<Budget>) -> RecoveryInfo {
    let Some((failure, delay)) = classify(result) else {
        return RecoveryInfo::never();
    };

    let granted = budget.lock().is_ok_and(|mut b| b.consume(failure));
    if !granted {
        log::debug!(target: LOG_TARGET, "retry budget exhausted ({failure:?})");
        return RecoveryInfo::never();
    }

    delay.map_or_else(RecoveryInfo::retry, |delay| RecoveryInfo::retry().delay(delay))
}

/// Send an HTTP request with automatic retry.
///
/// Retries network errors, 429 and 5xx responses with exponential backoff, honoring
/// `Retry-After`. When the budget runs out, the last response is returned as-is so the caller can
/// surface its status, or the last transport error is returned.
pub async fn resilient_send(
    http: &reqwest::Client,
    request: HttpRequest,
    policy: &RetryPolicy,
    clock: &Clock,
) -> crate::Result<Response> {
    let context = ResilienceContext::new(clock).name("http");
    let budget = Arc::new(Mutex::new(Budget::new(policy)));
    let url = request.url().to_string();

    let http = http.clone();
    let service = (
        Retry::layer("retry", &context)
            .clone_input()
            .recovery_with(move |result: &reqwest::Result<Response>, _| recovery(result, &budget))
            .max_retry_attempts(policy.total)
            .base_delay(policy.base_delay())
            .backoff(Backoff::Exponential)
            .on_retry(move |_output, args| {
                log::debug!(
                    target: LOG_TARGET,
                    "retrying '{url}' (attempt {}, delay {}ms)",
                    args.attempt().index() + 1,
                    args.retry_delay().as_millis(),
                );
            }),
        Execute::new(move |request: HttpRequest| {
            let http = http.clone();
            async move { request.send(&http).await }
        }),
    )
        .into_service();

    service.execute(request).await.map_err(ohno::AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tick::ClockControl;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clock() -> Clock {
        ClockControl::new().auto_advance_timers(true).to_clock()
    }

    #[test]
    fn test_base_delay() {
        assert_eq!(RetryPolicy::default().base_delay(), Duration::from_millis(300));

        let negative = RetryPolicy {
            backoff_factor: -1.0,
            ..RetryPolicy::default()
        };
        assert_eq!(negative.base_delay(), Duration::ZERO);
    }

    #[test]
    fn test_budget_total_bounds_status_retries() {
        let mut budget = Budget::new(&RetryPolicy {
            total: 2,
            ..RetryPolicy::default()
        });
        assert!(budget.consume(Failure::Status));
        assert!(budget.consume(Failure::Status));
        assert!(!budget.consume(Failure::Status));
    }

    #[test]
    fn test_budget_connect_bounded_separately() {
        let mut budget = Budget::new(&RetryPolicy {
            total: 5,
            connect: 1,
            read: 3,
            backoff_factor: 0.0,
        });
        assert!(budget.consume(Failure::Connect));
        assert!(!budget.consume(Failure::Connect));
        assert!(budget.consume(Failure::Read));
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_retry_after_date_is_ignored() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_server_errors_retried_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            total: 2,
            ..RetryPolicy::default()
        };
        let resp = resilient_send(
            &reqwest::Client::new(),
            HttpRequest::Get(format!("{}/flaky", server.uri())),
            &policy,
            &clock(),
        )
        .await
        .unwrap();

        // The last response is handed back once the budget is spent.
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let resp = resilient_send(
            &reqwest::Client::new(),
            HttpRequest::PostJson(format!("{}/graphql", server.uri()), serde_json::json!({"query": "{}"})),
            &RetryPolicy::default(),
            &clock(),
        )
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forbidden_with_retry_after_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(403).insert_header("retry-after", "30"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let clock = clock();
        let start = clock.system_time();
        let resp = resilient_send(
            &reqwest::Client::new(),
            HttpRequest::Get(format!("{}/limited", server.uri())),
            &RetryPolicy::default(),
            &clock,
        )
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(clock.system_time().duration_since(start).unwrap() >= Duration::from_secs(30));
    }
}
