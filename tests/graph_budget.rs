//! Rate-limit handling of the graph client across pages.

use chrono::{DateTime, Utc};
use core::time::Duration;
use futures::TryStreamExt;
use repo_velocity::hosting::{GraphClient, GraphOptions, GraphQuery};
use serde_json::{Value, json};
use std::time::SystemTime;
use tick::{Clock, ClockControl};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RELEASES: &str = r"    releases(first: $pagination) {
      nodes { tagName }
      pageInfo { endCursor hasNextPage }
    }";

/// One page whose quota resets `reset_in` seconds after `start`, negative for the past.
fn page(start: SystemTime, remaining: i64, reset_in: i64, tag: &str, next: Option<&str>) -> Value {
    let reset_at = (DateTime::<Utc>::from(start) + chrono::Duration::seconds(reset_in)).to_rfc3339();
    json!({
        "data": {
            "rateLimit": {"cost": 1, "remaining": remaining, "resetAt": reset_at},
            "repository": {
                "releases": {
                    "nodes": [{"tagName": tag}],
                    "pageInfo": {"endCursor": next, "hasNextPage": next.is_some()}
                }
            }
        }
    })
}

async fn serve(server: &MockServer, first: Value, second: Value) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"page\":\"c1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(second))
        .with_priority(1)
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(first))
        .expect(1)
        .mount(server)
        .await;
}

fn clock() -> Clock {
    ClockControl::new().auto_advance_timers(true).to_clock()
}

fn elapsed(clock: &Clock, start: SystemTime) -> Duration {
    clock.system_time().duration_since(start).unwrap()
}

fn client(server: &MockServer, clock: &Clock, buffer: i64) -> GraphClient {
    let options = GraphOptions {
        rate_limit_buffer: buffer,
        ..GraphOptions::default()
    };

    GraphClient::new(
        "secret",
        format!("{}/graphql", server.uri()),
        "acme",
        "widget",
        options,
        clock.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_sleeps_until_reset_before_next_page() {
    let clock = clock();
    let start = clock.system_time();

    let server = MockServer::start().await;
    serve(&server, page(start, 4, 90, "v1.0", Some("c1")), page(start, 5000, 3600, "v2.0", None)).await;

    let client = client(&server, &clock, 10);
    let query = GraphQuery::new("releases", RELEASES, true).unwrap();

    let pages: Vec<Value> = client.query(&query).try_collect().await.unwrap();

    let tags: Vec<&str> = pages.iter().filter_map(|p| p["nodes"][0]["tagName"].as_str()).collect();
    assert_eq!(tags, vec!["v1.0", "v2.0"]);
    assert_eq!(elapsed(&clock, start), Duration::from_secs(90));
}

#[tokio::test]
async fn test_healthy_budget_never_sleeps() {
    let clock = clock();
    let start = clock.system_time();

    let server = MockServer::start().await;
    serve(&server, page(start, 4000, 90, "v1.0", Some("c1")), page(start, 3999, 90, "v2.0", None)).await;

    let client = client(&server, &clock, 10);
    let query = GraphQuery::new("releases", RELEASES, true).unwrap();

    let pages: Vec<Value> = client.query(&query).try_collect().await.unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(elapsed(&clock, start), Duration::ZERO);
}

#[tokio::test]
async fn test_reset_in_the_past_does_not_wait() {
    let clock = clock();
    let start = clock.system_time();

    let server = MockServer::start().await;
    serve(&server, page(start, 1, -60, "v1.0", Some("c1")), page(start, 5000, 3600, "v2.0", None)).await;

    let client = client(&server, &clock, 10);
    let query = GraphQuery::new("releases", RELEASES, true).unwrap();

    let pages: Vec<Value> = client.query(&query).try_collect().await.unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(elapsed(&clock, start), Duration::ZERO);
}
