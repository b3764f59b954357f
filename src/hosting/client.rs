//! Paginated REST client for the GitHub API.
//!
//! Listings are exposed as lazy streams of JSON items. Each page is fetched only when the consumer
//! pulls past the items of the previous one, continuing through the `Link` header until the server
//! reports no further page.

use super::page::{self, Page, Payload};
use super::resilient_http::{HttpRequest, RetryPolicy, resilient_send};
use crate::Result;
use core::time::Duration;
use futures::stream::{self, Stream, TryStreamExt};
use ohno::{EnrichableExt, IntoAppError};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tick::Clock;
use url::Url;

const LOG_TARGET: &str = "   hosting";
const USER_AGENT: &str = concat!("repo-velocity/", env!("CARGO_PKG_VERSION"));

/// Tunables for the REST client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientOptions {
    /// Items requested per page.
    pub per_page: u32,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Total attempts made when a successful response carries no data.
    pub empty_retries: u32,

    /// Delay between attempts on empty responses.
    pub empty_retry_delay: Duration,

    /// Transport retry budgets.
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            per_page: 100,
            request_timeout: Duration::from_secs(10),
            empty_retries: 3,
            empty_retry_delay: Duration::from_secs(3),
            retry: RetryPolicy::default(),
        }
    }
}

/// Authenticated REST client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    options: ClientOptions,
    clock: Clock,
}

impl Client {
    /// Create a client for `base_url`, authenticating with `token` when one is given.
    pub fn new(token: Option<&str>, base_url: &str, options: ClientOptions, clock: Clock) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("token {t}"))?;
            auth_val.set_sensitive(true);
            let _ = headers.insert(AUTHORIZATION, auth_val);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(options.request_timeout)
            .build()
            .into_app_err("unable to create HTTP client")?;

        // A trailing slash keeps `Url::join` from dropping the last path segment of the base.
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).into_app_err_with(|| format!("invalid API base URL '{base_url}'"))?;

        Ok(Self {
            http,
            base_url,
            options,
            clock,
        })
    }

    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Build the URL of the first page for `path` with `per_page` and `params` appended.
    pub fn build_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_matches('/'))
            .into_app_err_with(|| format!("invalid API path '{path}'"))?;

        {
            let mut pairs = url.query_pairs_mut();
            let _ = pairs.append_pair("per_page", &self.options.per_page.to_string());
            for (key, value) in params {
                let _ = pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Lazily iterate every item of the listing at `path`.
    ///
    /// Each page body is classified with [`Payload::decode`] using `extract_key`. Subsequent pages
    /// are fetched from the `Link: rel="next"` URL verbatim. An error ends the stream after being
    /// yielded once.
    pub fn query<'a>(
        &'a self,
        path: &str,
        extract_key: Option<&'a str>,
        params: &[(&str, &str)],
    ) -> impl Stream<Item = Result<Value>> + use<'a> {
        let start = self.build_url(path, params).map(|url| Some(url.to_string()));

        stream::try_unfold(start, move |state| async move {
            let Some(url) = state? else {
                return Ok(None);
            };

            let Page { payload, next } = self.retry_empty(&url, extract_key).await?;
            Ok::<_, ohno::AppError>(Some((payload.into_items(), Ok(next))))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
        .try_flatten()
    }

    /// Like [`Client::query`], deserializing every item into `T`.
    pub fn query_as<'a, T: DeserializeOwned>(
        &'a self,
        path: &str,
        extract_key: Option<&'a str>,
        params: &[(&str, &str)],
    ) -> impl Stream<Item = Result<T>> + use<'a, T> {
        self.query(path, extract_key, params).and_then(|item| async move {
            serde_json::from_value(item).into_app_err("unexpected item shape in API listing")
        })
    }

    /// Fetch `url`, retrying while the server answers successfully with an empty body.
    ///
    /// After `empty_retries` attempts that all came back empty the page is treated as carrying no
    /// data: an empty collection without a next link.
    pub async fn retry_empty(&self, url: &str, extract_key: Option<&str>) -> Result<Page> {
        let attempts = self.options.empty_retries.max(1);

        for attempt in 1..=attempts {
            let (body, next) = self.fetch(url).await?;

            if !page::is_empty(&body) {
                return Ok(Page {
                    payload: Payload::decode(body, extract_key),
                    next,
                });
            }

            if attempt < attempts {
                log::debug!(
                    target: LOG_TARGET,
                    "Empty response from '{url}' (attempt {attempt}/{attempts}), retrying in {}ms",
                    self.options.empty_retry_delay.as_millis()
                );
                self.clock.delay(self.options.empty_retry_delay).await;
            }
        }

        log::debug!(target: LOG_TARGET, "No data at '{url}' after {attempts} attempts");
        Ok(Page::empty())
    }

    /// Fetch a single resource and deserialize it.
    pub async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self
            .base_url
            .join(path.trim_matches('/'))
            .into_app_err_with(|| format!("invalid API path '{path}'"))?;

        let (body, _) = self.fetch(url.as_str()).await?;
        serde_json::from_value(body).into_app_err_with(|| format!("unexpected response shape from '{url}'"))
    }

    /// One request with transport retry; returns the decoded body and the next link.
    async fn fetch(&self, url: &str) -> Result<(Value, Option<String>)> {
        log::trace!(target: LOG_TARGET, "GET {url}");

        let resp = resilient_send(&self.http, HttpRequest::Get(url.to_string()), &self.options.retry, &self.clock)
            .await
            .map_err(|e| e.enrich_with(|| format!("requesting '{url}'")))?;

        let resp = resp.error_for_status().into_app_err_with(|| format!("requesting '{url}'"))?;
        let next = page::next_link(resp.headers());
        let bytes = resp.bytes().await.into_app_err_with(|| format!("reading response from '{url}'"))?;

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).into_app_err_with(|| format!("decoding response from '{url}'"))?
        };

        Ok((body, next))
    }
}
