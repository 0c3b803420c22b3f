use crate::model::{ExamConfig, StudentRecord, SubjectConfig, SubjectSchema, TOTAL_KEY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const DISTRIBUTION_BINS: usize = 10;

/// Half-up rounding to `places` decimals: `Int(x * 10^p + 0.5) / 10^p`.
pub fn round_to(x: f64, places: i32) -> f64 {
    let f = 10_f64.powi(places);
    ((x * f) + 0.5).floor() / f
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl std::fmt::Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

/// Which records an analysis runs over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GroupFilter {
    #[default]
    Cohort,
    Class {
        class: String,
    },
    Classes {
        classes: Vec<String>,
    },
}

impl GroupFilter {
    pub fn matches(&self, record: &StudentRecord) -> bool {
        match self {
            GroupFilter::Cohort => true,
            GroupFilter::Class { class } => record.class == *class,
            GroupFilter::Classes { classes } => classes.iter().any(|c| *c == record.class),
        }
    }
}

/// Accepts `null`/absent, `"ALL"`, a class name string, or
/// `{ "kind": "class" | "classes" | "cohort", ... }`.
pub fn parse_group_filter(raw: Option<&serde_json::Value>) -> Result<GroupFilter, CalcError> {
    let Some(raw) = raw else {
        return Ok(GroupFilter::Cohort);
    };
    if raw.is_null() {
        return Ok(GroupFilter::Cohort);
    }
    if let Some(s) = raw.as_str() {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("ALL") {
            return Ok(GroupFilter::Cohort);
        }
        return Ok(GroupFilter::Class {
            class: t.to_string(),
        });
    }
    if !raw.is_object() {
        return Err(CalcError::new(
            "bad_params",
            "filter must be a class name, 'ALL' or an object",
        ));
    }
    serde_json::from_value::<GroupFilter>(raw.clone())
        .map_err(|e| CalcError::new("bad_params", format!("invalid filter: {}", e)))
}

/// Explicit inputs every analysis needs; nothing is read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct CalcContext<'a> {
    pub schema: &'a SubjectSchema,
    pub config: &'a ExamConfig,
    /// The whole imported cohort, regardless of the active filter.
    pub cohort: &'a [StudentRecord],
}

impl<'a> CalcContext<'a> {
    pub fn new(schema: &'a SubjectSchema, config: &'a ExamConfig, cohort: &'a [StudentRecord]) -> Self {
        Self {
            schema,
            config,
            cohort,
        }
    }

    pub fn select(&self, filter: &GroupFilter) -> Vec<&'a StudentRecord> {
        self.cohort.iter().filter(|r| filter.matches(r)).collect()
    }

    /// Schema subjects followed by the total key.
    pub fn stat_keys(&self) -> Vec<&'a str> {
        let mut keys: Vec<&str> = self.schema.iter().collect();
        keys.push(TOTAL_KEY);
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatGroup {
    pub key: String,
    pub count: usize,
    pub average: f64,
    pub median: f64,
    pub std_dev: f64,
    pub max: f64,
    pub min: f64,
    pub q1: f64,
    pub q3: f64,
    pub full_score: f64,
    pub pass_rate: f64,
    pub good_rate: f64,
    pub excellent_rate: f64,
    pub fail_rate: f64,
    pub low_rate: f64,
    /// Valid scores, ascending.
    pub scores: Vec<f64>,
}

pub type StatisticsMap = BTreeMap<String, StatGroup>;

/// Positional quantile on an ascending slice: `sorted[floor((n - 1) * p)]`.
///
/// For the median this is the lower of the middle pair on even counts.
pub fn positional_quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (((sorted.len() - 1) as f64) * p).floor() as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

fn percent(count: usize, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        100.0 * (count as f64) / (n as f64)
    }
}

/// Descriptive statistics over valid scores; `None` when there are none.
pub fn compute_stat_group<I>(key: &str, values: I, config: &SubjectConfig) -> Option<StatGroup>
where
    I: IntoIterator<Item = f64>,
{
    let mut scores: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if scores.is_empty() {
        return None;
    }
    scores.sort_by(f64::total_cmp);
    let n = scores.len();

    let sum: f64 = scores.iter().sum();
    let average = sum / (n as f64);
    let variance = scores.iter().map(|v| (v - average).powi(2)).sum::<f64>() / (n as f64);

    let count_where = |pred: &dyn Fn(f64) -> bool| scores.iter().filter(|v| pred(**v)).count();
    let pass = count_where(&|v| v >= config.pass_line);
    let good = count_where(&|v| v >= config.good_line && v < config.excellent_line);
    let excellent = count_where(&|v| v >= config.excellent_line);
    let low = count_where(&|v| v < config.low_line);

    Some(StatGroup {
        key: key.to_string(),
        count: n,
        average,
        median: positional_quantile(&scores, 0.5).unwrap_or(0.0),
        std_dev: variance.sqrt(),
        max: scores[n - 1],
        min: scores[0],
        q1: positional_quantile(&scores, 0.25).unwrap_or(0.0),
        q3: positional_quantile(&scores, 0.75).unwrap_or(0.0),
        full_score: config.full_score,
        pass_rate: percent(pass, n),
        good_rate: percent(good, n),
        excellent_rate: percent(excellent, n),
        fail_rate: percent(n - pass, n),
        low_rate: percent(low, n),
        scores,
    })
}

/// One StatGroup per schema subject plus the total; keys without any valid
/// score are omitted.
pub fn compute_statistics(ctx: &CalcContext<'_>, records: &[&StudentRecord]) -> StatisticsMap {
    let mut out = StatisticsMap::new();
    for key in ctx.stat_keys() {
        let Some(config) = ctx.config.subject(key) else {
            continue;
        };
        if let Some(group) = compute_stat_group(key, records.iter().filter_map(|r| r.score(key)), &config) {
            out.insert(key.to_string(), group);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub key: String,
    pub bins: Vec<DistributionBin>,
}

/// Ten equal-width bins over `[0, fullScore]`; the last bin is closed and also
/// collects scores above the full score.
pub fn compute_distribution(key: &str, scores: &[f64], full_score: f64) -> Distribution {
    let width = if full_score > 0.0 {
        full_score / (DISTRIBUTION_BINS as f64)
    } else {
        1.0
    };
    let mut bins: Vec<DistributionBin> = (0..DISTRIBUTION_BINS)
        .map(|i| DistributionBin {
            lower: width * (i as f64),
            upper: width * ((i + 1) as f64),
            count: 0,
        })
        .collect();
    for v in scores {
        let idx = (v / width).floor();
        let idx = if idx < 0.0 {
            0
        } else {
            (idx as usize).min(DISTRIBUTION_BINS - 1)
        };
        bins[idx].count += 1;
    }
    Distribution {
        key: key.to_string(),
        bins,
    }
}

pub fn compute_distributions(stats: &StatisticsMap) -> Vec<Distribution> {
    stats
        .values()
        .map(|g| compute_distribution(&g.key, &g.scores, g.full_score))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatGroup {
    pub class: String,
    pub student_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatGroup>,
}

/// StatGroup of one key for each class, classes in first-seen order.
pub fn compute_class_breakdown(ctx: &CalcContext<'_>, key: &str) -> Result<Vec<ClassStatGroup>, CalcError> {
    let Some(config) = ctx.config.subject(key) else {
        return Err(CalcError::new("not_found", format!("unknown subject '{}'", key)));
    };
    let mut seen = HashSet::new();
    let mut classes: Vec<&str> = Vec::new();
    for r in ctx.cohort {
        if seen.insert(r.class.as_str()) {
            classes.push(r.class.as_str());
        }
    }
    Ok(classes
        .into_iter()
        .map(|class| {
            let members: Vec<&StudentRecord> = ctx.cohort.iter().filter(|r| r.class == class).collect();
            ClassStatGroup {
                class: class.to_string(),
                student_count: members.len(),
                stats: compute_stat_group(key, members.iter().filter_map(|r| r.score(key)), &config),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_a() -> SubjectConfig {
        SubjectConfig {
            full_score: 100.0,
            low_line: 40.0,
            pass_line: 60.0,
            good_line: 70.0,
            excellent_line: 85.0,
            uses_rank_based_rescoring: false,
        }
    }

    #[test]
    fn round_to_is_half_up() {
        assert_eq!(round_to(0.0, 2), 0.0);
        assert_eq!(round_to(0.456, 2), 0.46);
        assert_eq!(round_to(0.454, 2), 0.45);
        assert_eq!(round_to(35.6818, 1), 35.7);
    }

    #[test]
    fn three_student_example() {
        let g = compute_stat_group("A", [90.0, 60.0, 30.0], &config_a()).unwrap();
        assert_eq!(g.count, 3);
        assert!((g.average - 60.0).abs() < 1e-9);
        assert!((g.std_dev - 24.494897).abs() < 1e-5);
        assert!((g.pass_rate - 66.666_666).abs() < 1e-3);
        assert!((g.fail_rate - 33.333_333).abs() < 1e-3);
        assert_eq!(g.median, 60.0);
        assert_eq!(g.max, 90.0);
        assert_eq!(g.min, 30.0);
        assert_eq!(g.scores, vec![30.0, 60.0, 90.0]);
    }

    #[test]
    fn median_takes_lower_of_middle_pair() {
        let g = compute_stat_group("A", [40.0, 10.0, 30.0, 20.0], &config_a()).unwrap();
        assert_eq!(g.median, 20.0);
        assert_eq!(g.q1, 10.0);
        assert_eq!(g.q3, 30.0);
    }

    #[test]
    fn rate_bands_are_half_open() {
        let g = compute_stat_group("A", [85.0, 84.9, 70.0, 60.0, 39.0], &config_a()).unwrap();
        assert!((g.excellent_rate - 20.0).abs() < 1e-9);
        assert!((g.good_rate - 40.0).abs() < 1e-9);
        assert!((g.pass_rate - 80.0).abs() < 1e-9);
        assert!((g.fail_rate - 20.0).abs() < 1e-9);
        assert!((g.low_rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn empty_and_non_finite_values_are_excluded() {
        assert!(compute_stat_group("A", Vec::<f64>::new(), &config_a()).is_none());
        let g = compute_stat_group("A", [f64::NAN, 50.0], &config_a()).unwrap();
        assert_eq!(g.count, 1);
        assert_eq!(g.std_dev, 0.0);
    }

    #[test]
    fn distribution_closes_last_bin() {
        let d = compute_distribution("A", &[0.0, 9.99, 10.0, 100.0, 120.0], 100.0);
        assert_eq!(d.bins.len(), 10);
        assert_eq!(d.bins[0].count, 2);
        assert_eq!(d.bins[1].count, 1);
        assert_eq!(d.bins[9].count, 2);
    }

    #[test]
    fn parse_filter_variants() {
        assert_eq!(parse_group_filter(None).unwrap(), GroupFilter::Cohort);
        assert_eq!(parse_group_filter(Some(&json!("ALL"))).unwrap(), GroupFilter::Cohort);
        assert_eq!(
            parse_group_filter(Some(&json!("3"))).unwrap(),
            GroupFilter::Class { class: "3".into() }
        );
        assert_eq!(
            parse_group_filter(Some(&json!({ "kind": "classes", "classes": ["1", "2"] }))).unwrap(),
            GroupFilter::Classes {
                classes: vec!["1".into(), "2".into()]
            }
        );
        assert_eq!(
            parse_group_filter(Some(&json!(12))).unwrap_err().code,
            "bad_params"
        );
    }
}
