use super::stats::{ContributorInsight, ContributorWeekStats, InsightStats, LineChanges, PunchCardDay, WeekActivity};
use super::{Collector, LOG_TARGET};
use crate::Result;
use crate::hosting::is_empty_payload;
use crate::hosting::models::{CommitActivityWeek, ContributorActivity};
use chrono::{DateTime, Datelike, Days, NaiveTime, SecondsFormat, Utc};
use core::pin::pin;
use futures::TryStreamExt;
use serde_json::Value;
use std::time::Instant;

const DAY_NAMES: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];

/// The range of weeks reported by the insight endpoints.
///
/// Weeks start on Sunday. The range opens at midnight of the most recent Sunday, or of the Sunday
/// before it when the collection date is itself a Sunday or a Monday, and closes at the collection date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WeekRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl WeekRange {
    fn ending_at(base: DateTime<Utc>) -> Self {
        let mut days_back = base.weekday().number_from_monday();
        if days_back < 2 {
            days_back += 7;
        }

        let sunday = base.date_naive() - Days::new(u64::from(days_back));
        Self {
            start: sunday.and_time(NaiveTime::MIN).and_utc(),
            end: base,
        }
    }

    /// The week starting at `timestamp`, when it lies in range.
    fn week(&self, timestamp: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(timestamp, 0).filter(|t| self.start <= *t && *t <= self.end)
    }
}

fn key(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Collector<'_> {
    /// Code frequency, commit activity, contributor activity and punch card for recent weeks.
    pub(super) async fn load_insights(&mut self) -> Result<()> {
        let start = Instant::now();
        log::info!(target: LOG_TARGET, "Loading repository insights...");

        let range = WeekRange::ending_at(self.window.base());
        log::debug!(target: LOG_TARGET, "Insight weeks start {}", range.start);

        let client = self.client;
        let base = format!("repos/{}/stats", self.repo.full_name());

        let frequency: Vec<Value> = client.query(&format!("{base}/code_frequency"), None, &[]).try_collect().await?;
        add_code_frequency(&mut self.stats.insights, &frequency, &range);

        let activity: Vec<Value> = client.query(&format!("{base}/commit_activity"), None, &[]).try_collect().await?;
        let activity: Vec<CommitActivityWeek> = activity
            .into_iter()
            .filter_map(|week| non_empty(week, "commit_activity"))
            .collect();
        add_commit_activity(&mut self.stats.insights, &activity, &range);

        let path = format!("{base}/contributors");
        let mut contributors = pin!(client.query(&path, None, &[]));
        while let Some(item) = contributors.try_next().await? {
            let Some(contributor) = non_empty::<ContributorActivity>(item, "contributors") else {
                continue;
            };

            let Some(author) = contributor.author.as_ref() else {
                log::warn!(target: LOG_TARGET, "Contributor statistics without an author, skipping");
                continue;
            };

            let Some(user) = self.users.resolve_login(client, &author.login).await else {
                continue;
            };

            let insight = contributor_insight(&contributor, &range);
            if insight.weeks.is_empty() {
                log::debug!(target: LOG_TARGET, "'{user}' has no commits in range");
                continue;
            }
            let _ = self.stats.insights.contributors.insert(user, insight);
        }

        let punch: Vec<Value> = client.query(&format!("{base}/punch_card"), None, &[]).try_collect().await?;
        add_punch_card(&mut self.stats.insights, &punch);

        self.stats.insights.collection_time_secs = start.elapsed().as_secs_f64();
        log::info!(
            target: LOG_TARGET,
            "Loaded repository insights in {:.1}s",
            self.stats.insights.collection_time_secs
        );
        Ok(())
    }
}

/// Decode an insight entry, skipping empty or malformed ones with a warning.
fn non_empty<T: serde::de::DeserializeOwned>(item: Value, endpoint: &str) -> Option<T> {
    if is_empty_payload(&item) {
        log::warn!(target: LOG_TARGET, "Received an empty entry from {endpoint}, skipping");
        return None;
    }

    match serde_json::from_value(item) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!(target: LOG_TARGET, "Malformed entry from {endpoint}, skipping: {e}");
            None
        }
    }
}

/// `[week, additions, deletions]` triples.
fn add_code_frequency(insights: &mut InsightStats, weeks: &[Value], range: &WeekRange) {
    for week in weeks {
        let Some([ts, additions, deletions]) = week.as_array().and_then(|a| <&[Value; 3]>::try_from(a.as_slice()).ok()) else {
            log::warn!(target: LOG_TARGET, "Unexpected code frequency entry {week}, skipping");
            continue;
        };

        let Some(start) = ts.as_i64().and_then(|ts| range.week(ts)) else {
            continue;
        };

        let _ = insights.code_frequency.insert(
            key(start),
            LineChanges {
                additions: additions.as_i64().unwrap_or_default(),
                deletions: deletions.as_i64().unwrap_or_default(),
            },
        );
    }
}

fn add_commit_activity(insights: &mut InsightStats, weeks: &[CommitActivityWeek], range: &WeekRange) {
    for week in weeks {
        let Some(start) = range.week(week.week) else {
            continue;
        };

        let daily = week
            .days
            .iter()
            .zip(0u64..)
            .filter_map(|(commits, offset)| start.checked_add_days(Days::new(offset)).map(|day| (key(day), *commits)))
            .collect();

        let _ = insights.commit_activity.insert(
            key(start),
            WeekActivity {
                daily,
                total_commits: week.total,
            },
        );
    }
}

fn contributor_insight(contributor: &ContributorActivity, range: &WeekRange) -> ContributorInsight {
    let weeks = contributor
        .weeks
        .iter()
        .filter(|w| w.c > 0)
        .filter_map(|w| {
            range.week(w.w).map(|start| {
                (
                    key(start),
                    ContributorWeekStats {
                        commits: w.c,
                        additions: w.a,
                        deletions: w.d,
                    },
                )
            })
        })
        .collect();

    ContributorInsight {
        total_commits: contributor.total,
        weeks,
    }
}

/// `[day, hour, commits]` triples, day 0 being Sunday.
fn add_punch_card(insights: &mut InsightStats, hours: &[Value]) {
    let card = &mut insights.punch_card;

    for entry in hours {
        let parsed = entry.as_array().and_then(|a| match a.as_slice() {
            [day, hour, commits] => Some((day.as_u64()?, hour.as_u64()?, commits.as_u64()?)),
            _ => None,
        });

        let Some((day, hour, commits)) = parsed else {
            log::warn!(target: LOG_TARGET, "Unexpected punch card entry {entry}, skipping");
            continue;
        };

        let (Some(day_name), Ok(hour)) = (usize::try_from(day).ok().and_then(|d| DAY_NAMES.get(d)), u32::try_from(hour)) else {
            log::warn!(target: LOG_TARGET, "Punch card entry {entry} is out of range, skipping");
            continue;
        };

        card.total_commits += commits;

        let day = card.days.entry((*day_name).to_string()).or_insert_with(|| PunchCardDay {
            busiest_hour: hour,
            ..PunchCardDay::default()
        });

        let _ = day.hours.insert(hour, commits);
        day.total_commits += commits;
        if commits > day.hours.get(&day.busiest_hour).copied().unwrap_or_default() {
            day.busiest_hour = hour;
        }
    }

    let mut sorted: Vec<(String, u64)> = card.days.iter().map(|(name, day)| (name.clone(), day.total_commits)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    card.sorted_days = sorted;
}
