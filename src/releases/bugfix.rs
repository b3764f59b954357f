use serde::Serialize;
use std::collections::BTreeSet;

/// A merged bug fix awaiting attribution to a release.
///
/// Ordered by timestamp first so a [`BugfixLog`] iterates in merge order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BugfixEvent {
    /// Merge time, seconds since the epoch.
    pub timestamp: i64,
    pub title: String,

    /// Head commit of the change.
    pub commit: String,
}

impl BugfixEvent {
    #[must_use]
    pub fn new(title: impl Into<String>, commit: impl Into<String>, timestamp: i64) -> Self {
        Self {
            timestamp,
            title: title.into(),
            commit: commit.into(),
        }
    }
}

/// Deduplicated bug-fix events in timestamp order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BugfixLog(BTreeSet<BugfixEvent>);

impl BugfixLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event, returning `false` if an identical one was already recorded.
    pub fn insert(&mut self, event: BugfixEvent) -> bool {
        self.0.insert(event)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BugfixEvent> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<BugfixEvent> for BugfixLog {
    fn from_iter<T: IntoIterator<Item = BugfixEvent>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a BugfixLog {
    type Item = &'a BugfixEvent;
    type IntoIter = std::collections::btree_set::Iter<'a, BugfixEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
