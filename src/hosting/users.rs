//! Login and display-name identity cache.

use super::client::Client;
use super::models::{Contributor, UserProfile};
use crate::Result;
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashMap};

const LOG_TARGET: &str = "     users";

/// Maps platform logins to display names and back, for one repository run.
///
/// Commit authors only carry a display name while the API speaks in logins, so every user seen
/// through the API is recorded in both directions. `special_logins` maps display names that the
/// platform cannot resolve (bots, renamed accounts) to logins.
#[derive(Debug, Default)]
pub struct UserDirectory {
    names_by_login: HashMap<String, String>,
    logins_by_name: HashMap<String, String>,
    special_logins: HashMap<String, String>,
    special_names: HashMap<String, String>,
}

impl UserDirectory {
    #[must_use]
    pub fn new(special_logins: &BTreeMap<String, String>) -> Self {
        Self {
            special_logins: special_logins.iter().map(|(n, l)| (n.clone(), l.clone())).collect(),
            special_names: special_logins.iter().map(|(n, l)| (l.clone(), n.clone())).collect(),
            ..Self::default()
        }
    }

    /// Record that `login` is displayed as `name`.
    pub fn insert(&mut self, login: impl Into<String>, name: impl Into<String>) {
        let login = login.into();
        let name = name.into();
        let _ = self.logins_by_name.insert(name.clone(), login.clone());
        let _ = self.names_by_login.insert(login, name);
    }

    /// The display name of `login`, fetching the profile on first sight.
    ///
    /// Profiles without a name fall back to the configured special name for that login, then to the
    /// login itself. A failed lookup is logged and yields `None`.
    pub async fn resolve_login(&mut self, client: &Client, login: &str) -> Option<String> {
        if let Some(name) = self.names_by_login.get(login) {
            return Some(name.clone());
        }

        let profile: UserProfile = match client.get_one(&format!("users/{login}")).await {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "'{login}' doesn't match a known user: {e:#}");
                return None;
            }
        };

        let name = match profile.name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => self.special_names.get(login).cloned().unwrap_or_else(|| login.to_string()),
        };

        log::debug!(target: LOG_TARGET, "Caching '{name}' for '{login}'");
        self.insert(login, name.clone());
        Some(name)
    }

    /// Resolve a commit author display name to the canonical user name.
    #[must_use]
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        if let Some(login) = self.logins_by_name.get(name) {
            return self.names_by_login.get(login).cloned();
        }

        if let Some(known) = self.names_by_login.get(name) {
            return Some(known.clone());
        }

        self.special_logins
            .get(name)
            .and_then(|login| self.names_by_login.get(login))
            .cloned()
    }

    /// Pre-populate the directory with every contributor of `org/repo`.
    pub async fn load_contributors(&mut self, client: &Client, org: &str, repo: &str) -> Result<usize> {
        log::info!(target: LOG_TARGET, "Loading contributors of {org}/{repo}");

        let path = format!("repos/{org}/{repo}/contributors");
        let contributors: Vec<Contributor> = client.query_as(&path, None, &[]).try_collect().await?;

        let mut count = 0;
        for login in contributors.iter().filter_map(|c| c.login.as_deref()) {
            if self.resolve_login(client, login).await.is_some() {
                count += 1;
            }
        }

        log::debug!(target: LOG_TARGET, "Loaded {count} contributors");
        Ok(count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names_by_login.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names_by_login.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::ClientOptions;
    use serde_json::json;
    use tick::ClockControl;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Client {
        let clock = ClockControl::new().auto_advance_timers(true).to_clock();
        Client::new(None, &server.uri(), ClientOptions::default(), clock).unwrap()
    }

    #[test]
    fn test_resolve_name_directions() {
        let mut specials = BTreeMap::new();
        let _ = specials.insert("Build Bot".to_string(), "buildbot".to_string());

        let mut users = UserDirectory::new(&specials);
        users.insert("mona", "Mona Lisa");
        users.insert("buildbot", "buildbot");

        assert_eq!(users.resolve_name("Mona Lisa").as_deref(), Some("Mona Lisa"));
        assert_eq!(users.resolve_name("mona").as_deref(), Some("Mona Lisa"));
        assert_eq!(users.resolve_name("Build Bot").as_deref(), Some("buildbot"));
        assert_eq!(users.resolve_name("Nobody"), None);
    }

    #[tokio::test]
    async fn test_resolve_login_fetches_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/mona"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "mona", "name": "Mona Lisa"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let mut users = UserDirectory::default();

        assert_eq!(users.resolve_login(&client, "mona").await.as_deref(), Some("Mona Lisa"));
        assert_eq!(users.resolve_login(&client, "mona").await.as_deref(), Some("Mona Lisa"));
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_login_without_name_uses_special_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/buildbot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "buildbot", "name": null})))
            .mount(&server)
            .await;

        let mut specials = BTreeMap::new();
        let _ = specials.insert("Build Bot".to_string(), "buildbot".to_string());

        let client = client(&server);
        let mut users = UserDirectory::new(&specials);
        assert_eq!(users.resolve_login(&client, "buildbot").await.as_deref(), Some("Build Bot"));
    }

    #[tokio::test]
    async fn test_resolve_login_unknown_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server);
        let mut users = UserDirectory::default();
        assert_eq!(users.resolve_login(&client, "ghost").await, None);
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_load_contributors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contributors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"login": "mona"},
                {"type": "Anonymous", "name": "someone"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/mona"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "mona", "name": "Mona Lisa"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let mut users = UserDirectory::default();
        assert_eq!(users.load_contributors(&client, "acme", "widget").await.unwrap(), 1);
        assert_eq!(users.resolve_name("Mona Lisa").as_deref(), Some("Mona Lisa"));
    }
}
