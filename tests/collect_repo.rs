//! End-to-end collection of one repository against a local mirror and a mock API.

use camino::Utf8PathBuf;
use chrono::DateTime;
use core::time::Duration;
use git2::{Oid, Repository, Signature, Time};
use repo_velocity::collect::Collector;
use repo_velocity::config::Config;
use repo_velocity::hosting::{Client, ClientOptions, GraphClient, GraphOptions};
use repo_velocity::repo::{MirrorOptions, RepositoryMirror};
use repo_velocity::window::Window;
use serde_json::json;
use tempfile::TempDir;
use tick::ClockControl;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn at(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0).unwrap().to_rfc3339()
}

fn commit_at(repo: &Repository, message: &str, ts: i64, parent: Option<Oid>) -> Oid {
    let sig = Signature::new("Mona Lisa", "mona@example.com", &Time::new(ts, 0)).unwrap();
    let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let parent = parent.map(|p| repo.find_commit(p).unwrap());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("refs/heads/main"), &sig, &sig, message, &tree, &parents).unwrap()
}

/// main: a(-10d) b(-8d, v1.0) c(-5d) d(-2d, v2.0) e(-1d)
fn upstream(dir: &TempDir) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("upstream")).unwrap();
    let repo = Repository::init(&path).unwrap();

    let a = commit_at(&repo, "a", NOW - 10 * DAY, None);
    let b = commit_at(&repo, "b", NOW - 8 * DAY, Some(a));
    let c = commit_at(&repo, "c", NOW - 5 * DAY, Some(b));
    let d = commit_at(&repo, "d", NOW - 2 * DAY, Some(c));
    let _ = commit_at(&repo, "e", NOW - DAY, Some(d));
    repo.set_head("refs/heads/main").unwrap();

    let _ = repo.reference("refs/tags/v1.0", b, false, "release").unwrap();
    let _ = repo.reference("refs/tags/v2.0", d, false, "release").unwrap();
    path
}

async fn mock_api(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"login": "mona"}])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/mona"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "mona", "name": "Mona Lisa"})))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "title": "Fix crash on startup",
                "state": "closed",
                "created_at": at(NOW - 4 * DAY),
                "updated_at": at(NOW - 3 * DAY),
                "closed_at": at(NOW - 3 * DAY),
                "merged_at": at(NOW - 3 * DAY),
                "user": {"login": "mona"},
                "head": {"sha": "f00d"},
                "labels": []
            },
            {
                "title": "Add dark mode",
                "state": "open",
                "draft": true,
                "created_at": at(NOW - DAY),
                "updated_at": at(NOW - DAY),
                "user": {"login": "mona"},
                "head": {"sha": "beef"},
                "labels": [{"name": "enhancement"}]
            },
            {
                "title": "Fix from the future",
                "state": "open",
                "created_at": at(NOW + DAY),
                "updated_at": at(NOW + DAY),
                "user": {"login": "mona"},
                "head": {"sha": "cafe"},
                "labels": []
            }
        ])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_collect_with_partial_api() {
    let dir = TempDir::new().unwrap();
    let upstream = upstream(&dir);

    let server = MockServer::start().await;
    mock_api(&server).await;

    let config = Config::from_toml(
        r#"
[[repos]]
org = "acme"
name = "widget"
tagged_releases = true

[[repos.tag_patterns]]
name = "semver"
pattern = '^v\d+\.\d+$'

[repos.bug_matching]
patterns = ["Fix"]
"#,
    )
    .unwrap();
    let repo = &config.repos[0];

    let mirror = RepositoryMirror::ensure_mirror(&MirrorOptions {
        path: Utf8PathBuf::from_path_buf(dir.path().join("mirror")).unwrap(),
        clone_url: upstream.to_string(),
        token: None,
        main_branch: "main".to_string(),
        release_branch: "main".to_string(),
        fetch_timeout: Duration::from_secs(300),
    })
    .await
    .unwrap();

    let clock = ClockControl::new().auto_advance_timers(true).to_clock();
    let client = Client::new(Some("secret"), &server.uri(), ClientOptions::default(), clock.clone()).unwrap();
    let graph = GraphClient::new(
        "secret",
        format!("{}/graphql", server.uri()),
        "acme",
        "widget",
        GraphOptions::default(),
        clock,
    )
    .unwrap();

    let window = Window::new(DateTime::from_timestamp(NOW, 0).unwrap(), 3);
    let stats = Collector::new(repo, &client, &graph, &mirror, window)
        .unwrap()
        .collect()
        .await
        .unwrap();

    // Nothing serves the graph, stats or actions endpoints.
    assert_eq!(stats.failed_sections, vec!["branches", "insights", "workflows"]);

    assert_eq!(stats.pull_requests.total, 2);
    assert_eq!(stats.pull_requests.merged, 1);
    assert_eq!(stats.pull_requests.open, 1);
    assert_eq!(stats.pull_requests.draft, 1);

    assert_eq!(stats.releases.total, 2);
    assert_eq!(stats.releases.window, 1);
    assert_eq!(stats.tag_matches.get("semver"), Some(&2));

    assert_eq!(stats.commits.total, 5);
    assert_eq!(stats.commits.unreleased, 1);
    assert_eq!(stats.branches.total, 1);

    let mona = &stats.users["Mona Lisa"];
    assert_eq!(mona.pull_requests, 2);
    assert_eq!(mona.commits, 5);
    assert_eq!(mona.window_commits, 2);
    assert_eq!(mona.releases, 2);

    // The fix merged a day before v2.0 shipped.
    assert_eq!(stats.bug_matches.len(), 1);
    assert!((stats.mttr_secs - DAY as f64).abs() < 1e-9);
    assert!((stats.windowed_mttr_secs - DAY as f64).abs() < 1e-9);
}
