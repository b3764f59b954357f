//! Rate-limited GitHub graph client.
//!
//! Every query is wrapped in a header that also asks for the caller's `rateLimit` budget. The client
//! checks that budget after each response and, when it is about to run out, sleeps until the quota
//! resets before issuing the next request.

use super::rate_budget::RateBudget;
use super::resilient_http::{HttpRequest, RetryPolicy, resilient_send};
use crate::Result;
use chrono::{DateTime, Utc};
use core::fmt::Write as _;
use core::time::Duration;
use futures::stream::{self, Stream};
use ohno::{IntoAppError, app_err, bail};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Map, Value, json};
use tick::Clock;

const LOG_TARGET: &str = "     graph";
const USER_AGENT: &str = concat!("repo-velocity/", env!("CARGO_PKG_VERSION"));

/// The argument-list terminator rewritten to inject the continuation cursor.
const ARGS_END: &str = ") {";
const ARGS_END_WITH_CURSOR: &str = ", after: $page) {";

/// A typed query variable.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphVariable {
    /// Graph type name without the non-null marker, e.g. `Int` or `String`.
    pub type_name: String,
    pub value: Value,
}

/// A repository-scoped graph query.
#[derive(Debug, Clone)]
pub struct GraphQuery {
    field: String,
    fragment: String,
    continuation: Option<String>,
    variables: Vec<(String, GraphVariable)>,
}

impl GraphQuery {
    /// Create a query selecting `field` under `repository` with the given `fragment`.
    ///
    /// A paginated fragment must take an argument list (`field(first: $pagination) {`), since the
    /// continuation cursor is spliced into it.
    pub fn new(field: impl Into<String>, fragment: impl Into<String>, paginate: bool) -> Result<Self> {
        let field = field.into();
        let fragment = fragment.into();

        let continuation = if paginate {
            if !fragment.contains(ARGS_END) {
                bail!("paginated graph query for '{field}' has no argument list to continue from");
            }
            Some(fragment.replacen(ARGS_END, ARGS_END_WITH_CURSOR, 1))
        } else {
            None
        };

        Ok(Self {
            field,
            fragment,
            continuation,
            variables: Vec::new(),
        })
    }

    /// Add a caller variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, type_name: impl Into<String>, value: Value) -> Self {
        self.variables.push((
            name.into(),
            GraphVariable {
                type_name: type_name.into(),
                value,
            },
        ));
        self
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub const fn is_paginated(&self) -> bool {
        self.continuation.is_some()
    }
}

/// Tunables for the graph client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphOptions {
    /// Items requested per page, bound to `$pagination`.
    pub page_size: u32,

    /// Quota floor below which the client waits for a reset.
    pub rate_limit_buffer: i64,

    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            page_size: 30,
            rate_limit_buffer: 10,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Graph client bound to one repository.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    endpoint: String,
    owner: String,
    repo: String,
    options: GraphOptions,
    clock: Clock,
}

#[derive(Debug)]
enum Cursor {
    First,
    After(String),
}

impl GraphClient {
    pub fn new(
        token: &str,
        endpoint: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        options: GraphOptions,
        clock: Clock,
    ) -> Result<Self> {
        let mut auth_val = HeaderValue::from_str(&format!("Bearer {token}"))?;
        auth_val.set_sensitive(true);

        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, auth_val);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(options.request_timeout)
            .build()
            .into_app_err("unable to create HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            owner: owner.into(),
            repo: repo.into(),
            options,
            clock,
        })
    }

    /// Render the full query text for `fragment` with the given `(name, type)` declarations.
    fn render(&self, fragment: &str, declarations: &[(&str, &str)]) -> String {
        let mut text = String::from("query ");
        if !declarations.is_empty() {
            let decls: Vec<String> = declarations.iter().map(|(name, ty)| format!("${name}:{ty}!")).collect();
            let _ = write!(text, "({}) ", decls.join(","));
        }

        // JSON string literals are valid graph string literals.
        let owner = Value::String(self.owner.clone());
        let repo = Value::String(self.repo.clone());
        let _ = write!(
            text,
            "{{\n  rateLimit {{\n    cost\n    remaining\n    resetAt\n  }}\n  repository(owner: {owner}, name: {repo}) {{\n{fragment}\n  }}\n}}"
        );
        text
    }

    /// Lazily run `query`, yielding the `field` object of each page.
    ///
    /// Paginated queries continue while `pageInfo.hasNextPage` holds, passing `pageInfo.endCursor`
    /// as `$page`.
    pub fn query<'a>(&'a self, query: &'a GraphQuery) -> impl Stream<Item = Result<Value>> + use<'a> {
        stream::try_unfold(Some(Cursor::First), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok(None);
            };

            let page = self.fetch_page(query, &cursor).await?;

            let next = if query.is_paginated() {
                next_cursor(&page)?.map(Cursor::After)
            } else {
                None
            };

            Ok::<_, ohno::AppError>(Some((page, next)))
        })
    }

    async fn fetch_page(&self, query: &GraphQuery, cursor: &Cursor) -> Result<Value> {
        let mut declarations: Vec<(&str, &str)> = Vec::with_capacity(query.variables.len() + 2);
        let mut values = Map::new();

        for (name, var) in &query.variables {
            declarations.push((name.as_str(), var.type_name.as_str()));
            let _ = values.insert(name.clone(), var.value.clone());
        }

        if query.is_paginated() {
            declarations.push(("pagination", "Int"));
            let _ = values.insert("pagination".into(), json!(self.options.page_size));
        }

        let fragment = match (cursor, &query.continuation) {
            (Cursor::After(after), Some(continuation)) => {
                declarations.push(("page", "String"));
                let _ = values.insert("page".into(), Value::String(after.clone()));
                continuation
            }
            _ => &query.fragment,
        };

        let text = self.render(fragment, &declarations);
        log::trace!(target: LOG_TARGET, "query: {text}");

        let mut data = self.execute(&text, values).await?;

        if let Some(rate_limit) = data.get("rateLimit") {
            let budget: RateBudget =
                serde_json::from_value(rate_limit.clone()).into_app_err("malformed rateLimit in graph response")?;
            self.check_budget(&budget).await;
        }

        data.get_mut("repository")
            .and_then(|repo| repo.get_mut(&query.field))
            .map(Value::take)
            .filter(|v| !v.is_null())
            .ok_or_else(|| app_err!("graph response is missing 'repository.{}'", query.field))
    }

    /// POST one query and return its `data` object.
    async fn execute(&self, text: &str, variables: Map<String, Value>) -> Result<Value> {
        let body = json!({ "query": text, "variables": variables });

        let resp = resilient_send(
            &self.http,
            HttpRequest::PostJson(self.endpoint.clone(), body),
            &self.options.retry,
            &self.clock,
        )
        .await?;

        let resp = resp.error_for_status().into_app_err("graph request failed")?;
        let mut doc: Value = resp.json().await.into_app_err("decoding graph response")?;

        if let Some(errors) = doc.get("errors").and_then(Value::as_array).filter(|e| !e.is_empty()) {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            bail!("graph query failed: {}", messages.join("; "));
        }

        match doc.get_mut("data").map(Value::take) {
            Some(data) if data.is_object() => Ok(data),
            _ => bail!("graph response has no data"),
        }
    }

    /// Wait for a quota reset when `budget` is under the configured floor.
    pub async fn check_budget(&self, budget: &RateBudget) {
        if !budget.is_low(self.options.rate_limit_buffer) {
            return;
        }

        let wait = budget.wait_time(DateTime::<Utc>::from(self.clock.system_time()));
        log::warn!(
            target: LOG_TARGET,
            "About to hit the graph rate limit ({} remaining, cost {}), waiting {}s for reset",
            budget.remaining,
            budget.cost,
            wait.as_secs()
        );
        self.clock.delay(wait).await;
    }
}

/// The cursor for the page after `page`, if the server reports one.
fn next_cursor(page: &Value) -> Result<Option<String>> {
    let Some(info) = page.get("pageInfo") else {
        return Ok(None);
    };

    if !info.get("hasNextPage").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(None);
    }

    info.get("endCursor")
        .and_then(Value::as_str)
        .map(|c| Some(c.to_string()))
        .into_app_err("graph page reports a next page without an end cursor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::time::SystemTime;
    use tick::ClockControl;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REFS: &str = r#"    refs(first: $pagination, refPrefix: "refs/heads/") {
      nodes { name }
      pageInfo { endCursor hasNextPage }
    }"#;

    fn clock() -> Clock {
        ClockControl::new().auto_advance_timers(true).to_clock()
    }

    fn client(server: &MockServer, clock: &Clock) -> GraphClient {
        GraphClient::new(
            "secret",
            format!("{}/graphql", server.uri()),
            "acme",
            "widget",
            GraphOptions::default(),
            clock.clone(),
        )
        .unwrap()
    }

    fn elapsed(clock: &Clock, start: SystemTime) -> Duration {
        clock.system_time().duration_since(start).unwrap()
    }

    fn response(remaining: i64, refs: &Value) -> Value {
        json!({
            "data": {
                "rateLimit": {"cost": 1, "remaining": remaining, "resetAt": "2023-11-14T22:15:20Z"},
                "repository": {"refs": refs}
            }
        })
    }

    #[test]
    fn test_new_rejects_fragment_without_arguments() {
        let _ = GraphQuery::new("refs", "refs { nodes { name } }", true).unwrap_err();
        let _ = GraphQuery::new("refs", "refs { nodes { name } }", false).unwrap();
    }

    #[test]
    fn test_continuation_rewrites_first_argument_list_only() {
        let q = GraphQuery::new("refs", "refs(first: $pagination) { nodes { target(x: 1) { id } } }", true).unwrap();
        assert_eq!(
            q.continuation.as_deref(),
            Some("refs(first: $pagination, after: $page) { nodes { target(x: 1) { id } } }")
        );
    }

    #[test]
    fn test_render_declarations() {
        let c = GraphClient::new("t", "http://localhost/graphql", "acme", "widget", GraphOptions::default(), clock()).unwrap();
        let text = c.render("refs(first: $pagination) { x }", &[("pagination", "Int"), ("page", "String")]);
        assert!(text.starts_with("query ($pagination:Int!,$page:String!) {"));
        assert!(text.contains(r#"repository(owner: "acme", name: "widget") {"#));
        assert!(text.contains("rateLimit"));
    }

    #[test]
    fn test_render_without_declarations() {
        let c = GraphClient::new("t", "http://localhost/graphql", "acme", "widget", GraphOptions::default(), clock()).unwrap();
        assert!(c.render("name", &[]).starts_with("query {"));
    }

    #[tokio::test]
    async fn test_query_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("after: $page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(
                4000,
                &json!({"nodes": [{"name": "b"}], "pageInfo": {"endCursor": "c2", "hasNextPage": false}}),
            )))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(
                4001,
                &json!({"nodes": [{"name": "a"}], "pageInfo": {"endCursor": "c1", "hasNextPage": true}}),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let clock = clock();
        let start = clock.system_time();
        let client = client(&server, &clock);
        let query = GraphQuery::new("refs", REFS, true).unwrap();
        let pages: Vec<Value> = client.query(&query).try_collect().await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0]["nodes"][0]["name"], "a");
        assert_eq!(pages[1]["nodes"][0]["name"], "b");
        assert_eq!(elapsed(&clock, start), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_low_budget_waits_for_reset() {
        let clock = clock();
        let start = clock.system_time();
        let reset_at = DateTime::<Utc>::from(start + Duration::from_secs(120)).to_rfc3339();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "rateLimit": {"cost": 3, "remaining": 5, "resetAt": reset_at},
                    "repository": {"refs": {"nodes": [], "pageInfo": {"endCursor": null, "hasNextPage": false}}}
                }
            })))
            .mount(&server)
            .await;

        let client = client(&server, &clock);
        let query = GraphQuery::new("refs", REFS, true).unwrap();
        let pages: Vec<Value> = client.query(&query).try_collect().await.unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(elapsed(&clock, start), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "Field 'refz' doesn't exist"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server, &clock());
        let query = GraphQuery::new("refs", REFS, true).unwrap();
        let err = client.query(&query).try_collect::<Vec<Value>>().await.unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[tokio::test]
    async fn test_missing_field_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "rateLimit": {"cost": 1, "remaining": 4000, "resetAt": "2023-11-14T22:15:20Z"},
                    "repository": {}
                }
            })))
            .mount(&server)
            .await;

        let client = client(&server, &clock());
        let query = GraphQuery::new("refs", REFS, true).unwrap();
        let _ = client.query(&query).try_collect::<Vec<Value>>().await.unwrap_err();
    }

    #[tokio::test]
    async fn test_unpaginated_query_yields_one_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("$branch:String!"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "rateLimit": {"cost": 1, "remaining": 4000, "resetAt": "2023-11-14T22:15:20Z"},
                    "repository": {"ref": {"name": "main", "pageInfo": {"hasNextPage": true, "endCursor": "x"}}}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, &clock());
        let query = GraphQuery::new("ref", "ref(qualifiedName: $branch) { name }", false)
            .unwrap()
            .variable("branch", "String", json!("main"));
        let pages: Vec<Value> = client.query(&query).try_collect().await.unwrap();
        assert_eq!(pages, vec![json!({"name": "main", "pageInfo": {"hasNextPage": true, "endCursor": "x"}})]);
    }
}
