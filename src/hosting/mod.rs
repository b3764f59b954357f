//! Access to the hosting platform's REST and graph APIs.

mod client;
mod graph;
pub mod models;
mod page;
mod rate_budget;
mod resilient_http;
mod users;

pub use client::{Client, ClientOptions};
pub use graph::{GraphClient, GraphOptions, GraphQuery, GraphVariable};
pub use page::{Page, Payload, is_empty as is_empty_payload};
pub use rate_budget::{MAX_RATE_LIMIT_WAIT_SECS, RateBudget};
pub use resilient_http::RetryPolicy;
pub use users::UserDirectory;
