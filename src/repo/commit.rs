use serde::Serialize;

/// A commit read from the mirror during a graph walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    /// Hex object id.
    pub id: String,

    /// Author identity as `Name <email>`.
    pub author: String,

    /// Commit time, seconds since the epoch.
    pub timestamp: i64,

    /// The branch whose walk produced this commit.
    pub branch: String,
}

impl Commit {
    /// The display-name part of the author identity.
    #[must_use]
    pub fn author_name(&self) -> &str {
        self.author.split(" <").next().unwrap_or_default().trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(author: &str) -> Commit {
        Commit {
            id: "0".repeat(40),
            author: author.to_string(),
            timestamp: 0,
            branch: "main".to_string(),
        }
    }

    #[test]
    fn test_author_name() {
        assert_eq!(commit("Mona Lisa <mona@example.com>").author_name(), "Mona Lisa");
        assert_eq!(commit("bot").author_name(), "bot");
        assert_eq!(commit(" <nobody@example.com>").author_name(), "");
    }
}
