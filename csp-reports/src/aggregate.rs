//! Aggregation engine
//!
//! Pure functions from a report set to dashboard statistics. Fetching is a
//! separate step (see [`crate::lister`]), so everything here is synchronous
//! and takes any iterator of `&Report`.

use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate};
use csp_common::report::Report;
use csp_common::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Whole-set statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total: usize,
    /// Distinct `respondentInfo.email`
    pub unique_respondents: usize,
    /// Mean of each report's effective score; 0.0 for an empty set
    pub mean_score: f64,
    /// In first-seen category order
    pub per_category_means: Vec<CategoryMean>,
    /// Reports whose enrichment has been merged
    pub enriched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMean {
    pub category: String,
    pub mean_percentage: f64,
    /// Number of category scores folded into the mean
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStat {
    pub workspace_name: String,
    pub total: usize,
    pub unique_respondents: usize,
    pub mean_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub label: String,
    pub count: usize,
    pub unique_respondents: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Bucket label for a timestamp, in the timestamp's own offset
    pub fn label(&self, ts: &DateTime<FixedOffset>) -> String {
        match self {
            Granularity::Hour => ts.format("%Y-%m-%dT%H:00").to_string(),
            Granularity::Day => day_label(ts.date_naive()),
            Granularity::Week => {
                let week = ts.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => ts.format("%Y-%m").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(Error::Validation(format!(
                "granularity must be hour, day, week or month (got '{}')",
                other
            ))),
        }
    }
}

/// Longest accepted look-back, ten years of days
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// Look-back window of whole days, written `<N>d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    days: u32,
}

impl Window {
    pub fn days(days: u32) -> Result<Self> {
        if days == 0 {
            return Err(Error::Validation("window must be at least 1d".to_string()));
        }
        if days > MAX_WINDOW_DAYS {
            return Err(Error::Validation(format!(
                "window must be at most {}d (got {}d)",
                MAX_WINDOW_DAYS, days
            )));
        }
        Ok(Self { days })
    }

    pub fn num_days(&self) -> u32 {
        self.days
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days)
    }
}

impl FromStr for Window {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let days = trimmed
            .strip_suffix('d')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| {
                Error::Validation(format!("window must look like '7d' (got '{}')", trimmed))
            })?;
        Window::days(days)
    }
}

fn day_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn overview<'a, I>(reports: I) -> Overview
where
    I: IntoIterator<Item = &'a Report>,
{
    let mut total = 0usize;
    let mut score_sum = 0.0;
    let mut emails: HashSet<&str> = HashSet::new();
    let mut enriched = 0usize;
    let mut categories: Vec<(String, f64, usize)> = Vec::new();
    let mut category_index: HashMap<String, usize> = HashMap::new();

    for report in reports {
        total += 1;
        score_sum += report.effective_score();
        emails.insert(report.respondent_info.email.as_str());
        if report.is_enriched() {
            enriched += 1;
        }

        for score in &report.category_scores {
            let idx = *category_index
                .entry(score.category.clone())
                .or_insert_with(|| {
                    categories.push((score.category.clone(), 0.0, 0));
                    categories.len() - 1
                });
            categories[idx].1 += score.percentage;
            categories[idx].2 += 1;
        }
    }

    Overview {
        total,
        unique_respondents: emails.len(),
        mean_score: mean(score_sum, total),
        per_category_means: categories
            .into_iter()
            .map(|(category, sum, samples)| CategoryMean {
                category,
                mean_percentage: mean(sum, samples),
                samples,
            })
            .collect(),
        enriched,
    }
}

/// Per-workspace counts and mean score, sorted by workspace name
pub fn workspace_breakdown<'a, I>(reports: I) -> Vec<WorkspaceStat>
where
    I: IntoIterator<Item = &'a Report>,
{
    let mut groups: BTreeMap<&str, (usize, f64, HashSet<&str>)> = BTreeMap::new();
    for report in reports {
        let group = groups
            .entry(report.workspace_name.as_str())
            .or_insert_with(|| (0, 0.0, HashSet::new()));
        group.0 += 1;
        group.1 += report.effective_score();
        group.2.insert(report.respondent_info.email.as_str());
    }

    groups
        .into_iter()
        .map(|(name, (total, sum, emails))| WorkspaceStat {
            workspace_name: name.to_string(),
            total,
            unique_respondents: emails.len(),
            mean_score: mean(sum, total),
        })
        .collect()
}

/// Submission counts bucketed by `granularity` over the last `window`
///
/// Day granularity yields a dense series: exactly `window` calendar days
/// ending at `now`'s date, empty days included with count 0. Every other
/// granularity yields only buckets that hold at least one report. Reports
/// without a parsable `submittedAt` are not bucketed.
pub fn time_series<'a, I>(
    reports: I,
    granularity: Granularity,
    window: Window,
    now: DateTime<FixedOffset>,
) -> Vec<Bucket>
where
    I: IntoIterator<Item = &'a Report>,
{
    let mut buckets: BTreeMap<String, (usize, HashSet<&'a str>)> = BTreeMap::new();

    let stamped = reports
        .into_iter()
        .filter_map(|r| r.submitted_at_parsed().map(|ts| (r, ts)));

    if granularity == Granularity::Day {
        let end = now.date_naive();
        let Some(start) = end.checked_sub_days(Days::new(u64::from(window.num_days()) - 1)) else {
            return Vec::new();
        };

        let mut day = start;
        while day <= end {
            buckets.insert(day_label(day), (0, HashSet::new()));
            day += Duration::days(1);
        }

        for (report, ts) in stamped {
            let date = ts.date_naive();
            if date < start || date > end {
                continue;
            }
            if let Some(bucket) = buckets.get_mut(&day_label(date)) {
                bucket.0 += 1;
                bucket.1.insert(report.respondent_info.email.as_str());
            }
        }
    } else {
        // Falls back to no lower bound near the start of the calendar
        let lower = now.checked_sub_signed(Duration::days(i64::from(window.num_days())));
        for (report, ts) in stamped {
            if lower.is_some_and(|lower| ts < lower) {
                continue;
            }
            let bucket = buckets
                .entry(granularity.label(&ts))
                .or_insert_with(|| (0, HashSet::new()));
            bucket.0 += 1;
            bucket.1.insert(report.respondent_info.email.as_str());
        }
    }

    buckets
        .into_iter()
        .map(|(label, (count, emails))| Bucket {
            label,
            count,
            unique_respondents: emails.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_common::report::CategoryScore;
    use serde_json::json;
    use std::collections::BTreeMap as Map;

    fn report(email: &str, submitted_at: &str, overall: Option<f64>, answers: &[(&str, i64)]) -> Report {
        let mut value = json!({
            "workspaceName": "ws",
            "surveyFolderName": "f",
            "respondentInfo": {"name": email, "email": email},
            "submittedAt": submitted_at,
            "answers": answers.iter().map(|(k, v)| (k.to_string(), *v)).collect::<Map<_, _>>(),
        });
        if let Some(score) = overall {
            value["overallScore"] = json!(score);
        }
        serde_json::from_value(value).unwrap()
    }

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-05-10T12:00:00+00:00").unwrap()
    }

    #[test]
    fn test_overview_mean_uses_answer_fallback() {
        let reports = vec![
            report("a@x", "2026-05-01T00:00:00Z", Some(4.0), &[]),
            report("b@x", "2026-05-01T00:00:00Z", Some(3.0), &[]),
            report("c@x", "2026-05-01T00:00:00Z", None, &[("a", 2), ("b", 4)]),
        ];
        let stats = overview(&reports);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unique_respondents, 3);
        assert!((stats.mean_score - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_overview_empty_is_zero() {
        let stats = overview(&Vec::<Report>::new());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.mean_score, 0.0);
        assert!(stats.per_category_means.is_empty());
    }

    #[test]
    fn test_unique_respondents_by_email() {
        let reports = vec![
            report("same@x", "2026-05-01T00:00:00Z", Some(1.0), &[]),
            report("same@x", "2026-05-02T00:00:00Z", Some(2.0), &[]),
            report("other@x", "2026-05-02T00:00:00Z", Some(3.0), &[]),
        ];
        assert_eq!(overview(&reports).unique_respondents, 2);
    }

    #[test]
    fn test_category_means_keep_first_seen_order() {
        let mut a = report("a@x", "2026-05-01T00:00:00Z", Some(4.0), &[]);
        let mut b = report("b@x", "2026-05-01T00:00:00Z", Some(4.0), &[]);
        let cat = |name: &str, pct: f64| CategoryScore {
            category: name.to_string(),
            score: 0.0,
            max_score: 30.0,
            percentage: pct,
        };
        a.category_scores = vec![cat("Zeta", 80.0), cat("Alpha", 60.0)];
        b.category_scores = vec![cat("Alpha", 40.0), cat("Zeta", 100.0)];

        let means = overview(&[a, b]).per_category_means;
        assert_eq!(means[0].category, "Zeta");
        assert_eq!(means[0].mean_percentage, 90.0);
        assert_eq!(means[1].category, "Alpha");
        assert_eq!(means[1].mean_percentage, 50.0);
        assert_eq!(means[1].samples, 2);
    }

    #[test]
    fn test_day_series_is_dense() {
        let reports = vec![
            report("a@x", "2026-05-10T08:00:00Z", Some(1.0), &[]),
            report("b@x", "2026-05-10T09:00:00Z", Some(1.0), &[]),
            report("c@x", "2026-05-06T09:00:00Z", Some(1.0), &[]),
            report("d@x", "2026-04-01T09:00:00Z", Some(1.0), &[]),
        ];
        let series = time_series(&reports, Granularity::Day, "7d".parse().unwrap(), now());

        assert_eq!(series.len(), 7);
        assert_eq!(series[0].label, "2026-05-04");
        assert_eq!(series[6].label, "2026-05-10");
        assert_eq!(series[6].count, 2);
        assert_eq!(series[2].count, 1);
        assert_eq!(series.iter().filter(|b| b.count > 0).count(), 2);
        assert_eq!(series.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[test]
    fn test_day_series_dense_even_when_empty() {
        let series = time_series(&Vec::<Report>::new(), Granularity::Day, "1d".parse().unwrap(), now());
        assert_eq!(series, vec![Bucket { label: "2026-05-10".to_string(), count: 0, unique_respondents: 0 }]);
    }

    #[test]
    fn test_week_series_is_sparse() {
        let reports = vec![
            report("a@x", "2026-05-10T08:00:00Z", Some(1.0), &[]),
            report("b@x", "2026-04-20T08:00:00Z", Some(1.0), &[]),
            report("c@x", "2026-01-01T08:00:00Z", Some(1.0), &[]),
        ];
        let series = time_series(&reports, Granularity::Week, "30d".parse().unwrap(), now());

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "2026-W17");
        assert_eq!(series[1].label, "2026-W19");
        assert!(series.iter().all(|b| b.count > 0));
    }

    #[test]
    fn test_bucketing_uses_submission_offset() {
        // Still the 9th in UTC, but the 10th where it was submitted
        let reports = vec![report("a@x", "2026-05-10T00:30:00+09:00", Some(1.0), &[])];
        let series = time_series(&reports, Granularity::Day, "3d".parse().unwrap(), now());
        let hit: Vec<_> = series.iter().filter(|b| b.count > 0).collect();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].label, "2026-05-10");
    }

    #[test]
    fn test_unparsable_timestamp_excluded_from_series_only() {
        let reports = vec![
            report("a@x", "garbage", Some(2.0), &[]),
            report("b@x", "2026-05-10T08:00:00Z", Some(4.0), &[]),
        ];
        let series = time_series(&reports, Granularity::Month, "30d".parse().unwrap(), now());
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].label, "2026-05");
        assert_eq!(series[0].count, 1);
        assert_eq!(overview(&reports).total, 2);
    }

    #[test]
    fn test_hour_labels_and_unique_respondents() {
        let reports = vec![
            report("a@x", "2026-05-10T08:05:00Z", Some(1.0), &[]),
            report("a@x", "2026-05-10T08:55:00Z", Some(1.0), &[]),
            report("b@x", "2026-05-10T08:59:59Z", Some(1.0), &[]),
        ];
        let series = time_series(&reports, Granularity::Hour, "1d".parse().unwrap(), now());
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].label, "2026-05-10T08:00");
        assert_eq!(series[0].count, 3);
        assert_eq!(series[0].unique_respondents, 2);
    }

    #[test]
    fn test_parse_granularity_and_window() {
        assert_eq!("Week".parse::<Granularity>().unwrap(), Granularity::Week);
        assert!("fortnight".parse::<Granularity>().is_err());
        assert_eq!("30d".parse::<Window>().unwrap().num_days(), 30);
        assert!("0d".parse::<Window>().is_err());
        assert!("7".parse::<Window>().is_err());
        assert!("7w".parse::<Window>().is_err());
        assert_eq!(Window::days(7).unwrap().to_string(), "7d");
    }

    #[test]
    fn test_window_upper_bound() {
        assert_eq!("3660d".parse::<Window>().unwrap().num_days(), MAX_WINDOW_DAYS);
        assert!("3661d".parse::<Window>().is_err());
        assert!("200000000d".parse::<Window>().is_err());
        assert!(Window::days(u32::MAX).is_err());
    }

    #[test]
    fn test_widest_window_series() {
        let reports = vec![report("a@x", "2020-01-01T00:00:00Z", Some(4.0), &[])];
        let widest = Window::days(MAX_WINDOW_DAYS).unwrap();

        let days = time_series(&reports, Granularity::Day, widest, now());
        assert_eq!(days.len(), MAX_WINDOW_DAYS as usize);
        assert_eq!(days.iter().map(|b| b.count).sum::<usize>(), 1);

        let months = time_series(&reports, Granularity::Month, widest, now());
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].label, "2020-01");
    }

    #[test]
    fn test_workspace_breakdown_sorted() {
        let mut a = report("a@x", "2026-05-01T00:00:00Z", Some(4.0), &[]);
        a.workspace_name = "Zeta".to_string();
        let mut b = report("b@x", "2026-05-01T00:00:00Z", Some(2.0), &[]);
        b.workspace_name = "Alpha".to_string();
        let mut c = report("c@x", "2026-05-01T00:00:00Z", Some(4.0), &[]);
        c.workspace_name = "Alpha".to_string();

        let stats = workspace_breakdown(&[a, b, c]);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].workspace_name, "Alpha");
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].mean_score, 3.0);
        assert_eq!(stats[1].workspace_name, "Zeta");
    }
}
