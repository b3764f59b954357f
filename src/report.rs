//! JSON report of a collection run.

use crate::Result;
use crate::collect::RepoStats;
use core::fmt::Write;
use serde::Serialize;

/// A repository whose collection failed after every attempt.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRepository {
    pub org: String,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    repositories: &'a [RepoStats],

    #[serde(skip_serializing_if = "no_failures")]
    failures: &'a [FailedRepository],
}

fn no_failures(failures: &&[FailedRepository]) -> bool {
    failures.is_empty()
}

/// Write `{ "repositories": [...] }` as pretty-printed JSON, plus a `failures` list when any
/// repository could not be collected.
pub fn generate<W: Write>(repositories: &[RepoStats], failures: &[FailedRepository], writer: &mut W) -> Result<()> {
    let report = Report { repositories, failures };
    writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::Value;

    fn stats() -> RepoStats {
        let mut stats = RepoStats::new("acme", "widget", DateTime::from_timestamp(1_700_000_000, 0).unwrap(), 7);
        stats.pull_requests.total = 12;
        stats.user("Mona").commits = 3;
        stats
    }

    #[test]
    fn test_generate() {
        let mut out = String::new();
        generate(&[stats()], &[], &mut out).unwrap();

        let doc: Value = serde_json::from_str(&out).unwrap();
        let repo = &doc["repositories"][0];
        assert_eq!(repo["org"], "acme");
        assert_eq!(repo["window_days"], 7);
        assert_eq!(repo["collection_date"], "2023-11-14T22:13:20Z");
        assert_eq!(repo["pull_requests"]["total"], 12);
        assert_eq!(repo["users"]["Mona"]["commits"], 3);
        assert!(doc.get("failures").is_none());
    }

    #[test]
    fn test_generate_with_failures() {
        let failures = vec![FailedRepository {
            org: "acme".to_string(),
            name: "gadget".to_string(),
            error: "clone failed".to_string(),
        }];

        let mut out = String::new();
        generate(&[], &failures, &mut out).unwrap();

        let doc: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(doc["repositories"].as_array().unwrap().len(), 0);
        assert_eq!(doc["failures"][0]["name"], "gadget");
    }
}
