use crate::calc::CalcError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};

/// Key of the synthetic subject that carries the summed total score.
pub const TOTAL_KEY: &str = "totalScore";

const DEFAULT_FULL_SCORE: f64 = 100.0;
const WIDE_FULL_SCORE: f64 = 150.0;
const LOW_FRACTION: f64 = 0.4;
const PASS_FRACTION: f64 = 0.6;
const GOOD_FRACTION: f64 = 0.7;
const EXCELLENT_FRACTION: f64 = 0.85;

/// Ordered subject names discovered from a source header.
///
/// Order follows the source columns and is kept for display; computation never
/// depends on it. Built through [`SubjectSchema::push`], which drops duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectSchema {
    subjects: Vec<String>,
}

impl SubjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subject; returns false if it was already present.
    pub fn push(&mut self, subject: impl Into<String>) -> bool {
        let subject = subject.into();
        if self.contains(&subject) {
            return false;
        }
        self.subjects.push(subject);
        true
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| s == subject)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(String::as_str)
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[String] {
        &self.subjects
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    /// Run once when a dataset enters the system (import or load).
    pub fn validate(&self) -> Result<(), CalcError> {
        let mut seen = HashSet::new();
        for s in &self.subjects {
            if s.trim().is_empty() {
                return Err(CalcError::new("schema_error", "subject names must not be empty"));
            }
            if s == TOTAL_KEY {
                return Err(CalcError::new(
                    "schema_error",
                    format!("'{}' is reserved for the total score", TOTAL_KEY),
                ));
            }
            if !seen.insert(s.as_str()) {
                return Err(CalcError::new(
                    "schema_error",
                    format!("duplicate subject '{}'", s),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub scores: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_rank: Option<u32>,
    #[serde(default)]
    pub class_ranks: BTreeMap<String, u32>,
    #[serde(default)]
    pub grade_ranks: BTreeMap<String, u32>,
}

impl StudentRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class: class.into(),
            scores: BTreeMap::new(),
            total_score: None,
            class_rank: None,
            grade_rank: None,
            class_ranks: BTreeMap::new(),
            grade_ranks: BTreeMap::new(),
        }
    }

    /// Valid score for a subject, or the total for [`TOTAL_KEY`].
    pub fn score(&self, key: &str) -> Option<f64> {
        let v = if key == TOTAL_KEY {
            self.total_score
        } else {
            self.scores.get(key).copied().flatten()
        };
        v.filter(|x| x.is_finite())
    }

    /// Sum of valid subject scores, `None` when no subject score is valid.
    pub fn recompute_total(&mut self, schema: &SubjectSchema) {
        let mut sum = 0.0_f64;
        let mut any = false;
        for s in schema.iter() {
            if let Some(v) = self.score(s) {
                sum += v;
                any = true;
            }
        }
        self.total_score = if any { Some(sum) } else { None };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectConfig {
    pub full_score: f64,
    pub low_line: f64,
    pub pass_line: f64,
    pub good_line: f64,
    pub excellent_line: f64,
    #[serde(default)]
    pub uses_rank_based_rescoring: bool,
}

impl SubjectConfig {
    /// Thresholds at 40/60/70/85 % of the full score.
    pub fn with_full_score(full_score: f64) -> Self {
        Self {
            full_score,
            low_line: full_score * LOW_FRACTION,
            pass_line: full_score * PASS_FRACTION,
            good_line: full_score * GOOD_FRACTION,
            excellent_line: full_score * EXCELLENT_FRACTION,
            uses_rank_based_rescoring: false,
        }
    }

    pub fn validate(&self, subject: &str) -> Result<(), CalcError> {
        let finite = [
            self.full_score,
            self.low_line,
            self.pass_line,
            self.good_line,
            self.excellent_line,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite || self.full_score <= 0.0 {
            return Err(CalcError::with_details(
                "bad_params",
                format!("{}: fullScore must be a positive number", subject),
                json!({ "subject": subject }),
            ));
        }
        if !(self.low_line < self.pass_line
            && self.pass_line < self.good_line
            && self.good_line < self.excellent_line)
        {
            return Err(CalcError::with_details(
                "bad_params",
                format!(
                    "{}: thresholds must satisfy lowLine < passLine < goodLine < excellentLine",
                    subject
                ),
                json!({ "subject": subject }),
            ));
        }
        Ok(())
    }
}

/// Partial update for one subject's config; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectConfigPatch {
    pub full_score: Option<f64>,
    pub low_line: Option<f64>,
    pub pass_line: Option<f64>,
    pub good_line: Option<f64>,
    pub excellent_line: Option<f64>,
    pub uses_rank_based_rescoring: Option<bool>,
}

impl SubjectConfigPatch {
    fn apply(&self, base: &SubjectConfig) -> SubjectConfig {
        // A new full score with no explicit lines rescales the default thresholds.
        let mut out = match self.full_score {
            Some(full) if full != base.full_score => SubjectConfig {
                uses_rank_based_rescoring: base.uses_rank_based_rescoring,
                ..SubjectConfig::with_full_score(full)
            },
            _ => *base,
        };
        if let Some(v) = self.low_line {
            out.low_line = v;
        }
        if let Some(v) = self.pass_line {
            out.pass_line = v;
        }
        if let Some(v) = self.good_line {
            out.good_line = v;
        }
        if let Some(v) = self.excellent_line {
            out.excellent_line = v;
        }
        if let Some(v) = self.uses_rank_based_rescoring {
            out.uses_rank_based_rescoring = v;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedBand {
    /// Cumulative share of the cohort (from the top, in percent) covered up to this band.
    pub upper_percent: f64,
    pub score: f64,
}

/// Percentile-band score reassignment used to equate elective subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedScoreScheme {
    pub bands: Vec<AssignedBand>,
}

impl Default for AssignedScoreScheme {
    fn default() -> Self {
        let bands = [
            (5.0, 70.0),
            (15.0, 67.0),
            (25.0, 64.0),
            (35.0, 61.0),
            (45.0, 58.0),
            (55.0, 55.0),
            (65.0, 52.0),
            (75.0, 49.0),
            (85.0, 46.0),
            (95.0, 43.0),
            (100.0, 40.0),
        ]
        .into_iter()
        .map(|(upper_percent, score)| AssignedBand {
            upper_percent,
            score,
        })
        .collect();
        Self { bands }
    }
}

impl AssignedScoreScheme {
    pub fn validate(&self) -> Result<(), CalcError> {
        if self.bands.is_empty() {
            return Err(CalcError::new("bad_params", "assigned score scheme has no bands"));
        }
        let mut prev = 0.0_f64;
        for b in &self.bands {
            if !b.upper_percent.is_finite() || !b.score.is_finite() || b.upper_percent <= prev {
                return Err(CalcError::new(
                    "bad_params",
                    "assigned score bands must have strictly ascending upperPercent values",
                ));
            }
            prev = b.upper_percent;
        }
        if (prev - 100.0).abs() > 1e-9 {
            return Err(CalcError::new(
                "bad_params",
                "the last assigned score band must end at 100",
            ));
        }
        Ok(())
    }

    /// Band for a student whose score is beaten by `percent_above` % of the cohort.
    pub fn score_for_percentile(&self, percent_above: f64) -> Option<f64> {
        self.bands
            .iter()
            .find(|b| percent_above < b.upper_percent)
            .or_else(|| self.bands.last())
            .map(|b| b.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamConfig {
    pub subjects: BTreeMap<String, SubjectConfig>,
    #[serde(default)]
    pub assigned_scheme: AssignedScoreScheme,
}

impl ExamConfig {
    /// Defaults for every schema subject: full score 150 when any observed
    /// score exceeds 100, else 100.
    pub fn derive_defaults(schema: &SubjectSchema, records: &[StudentRecord]) -> Self {
        let mut subjects = BTreeMap::new();
        for s in schema.iter() {
            let max = records
                .iter()
                .filter_map(|r| r.score(s))
                .fold(f64::NEG_INFINITY, f64::max);
            let full = if max > DEFAULT_FULL_SCORE {
                WIDE_FULL_SCORE
            } else {
                DEFAULT_FULL_SCORE
            };
            subjects.insert(s.to_string(), SubjectConfig::with_full_score(full));
        }
        Self {
            subjects,
            assigned_scheme: AssignedScoreScheme::default(),
        }
    }

    /// Config for a subject, or the summed config for [`TOTAL_KEY`].
    pub fn subject(&self, key: &str) -> Option<SubjectConfig> {
        if key == TOTAL_KEY {
            return Some(self.total());
        }
        self.subjects.get(key).copied()
    }

    pub fn total(&self) -> SubjectConfig {
        let mut out = SubjectConfig {
            full_score: 0.0,
            low_line: 0.0,
            pass_line: 0.0,
            good_line: 0.0,
            excellent_line: 0.0,
            uses_rank_based_rescoring: false,
        };
        for c in self.subjects.values() {
            out.full_score += c.full_score;
            out.low_line += c.low_line;
            out.pass_line += c.pass_line;
            out.good_line += c.good_line;
            out.excellent_line += c.excellent_line;
        }
        out
    }

    /// Applies per-subject patches atomically: nothing changes if any patch is invalid.
    pub fn apply_patches(
        &mut self,
        schema: &SubjectSchema,
        patches: &BTreeMap<String, SubjectConfigPatch>,
    ) -> Result<(), CalcError> {
        let mut next = self.subjects.clone();
        for (subject, patch) in patches {
            if !schema.contains(subject) {
                return Err(CalcError::with_details(
                    "not_found",
                    format!("unknown subject '{}'", subject),
                    json!({ "subject": subject }),
                ));
            }
            let base = next
                .get(subject)
                .copied()
                .unwrap_or_else(|| SubjectConfig::with_full_score(DEFAULT_FULL_SCORE));
            let updated = patch.apply(&base);
            updated.validate(subject)?;
            next.insert(subject.clone(), updated);
        }
        self.subjects = next;
        Ok(())
    }

    pub fn validate(&self, schema: &SubjectSchema) -> Result<(), CalcError> {
        for s in schema.iter() {
            let Some(c) = self.subjects.get(s) else {
                return Err(CalcError::with_details(
                    "bad_params",
                    format!("missing config for subject '{}'", s),
                    json!({ "subject": s }),
                ));
            };
            c.validate(s)?;
        }
        self.assigned_scheme.validate()
    }
}

/// One imported exam: schema, config and ranked records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub imported_at: String,
    pub subject_schema: SubjectSchema,
    pub config: ExamConfig,
    pub records: Vec<StudentRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_push_keeps_first_occurrence_order() {
        let mut schema = SubjectSchema::new();
        assert!(schema.push("Math"));
        assert!(schema.push("English"));
        assert!(!schema.push("Math"));
        assert_eq!(schema.as_slice(), &["Math".to_string(), "English".to_string()]);
    }

    #[test]
    fn schema_validation_rejects_reserved_total_key() {
        let schema: SubjectSchema = serde_json::from_value(json!(["Math", "totalScore"])).unwrap();
        let e = schema.validate().unwrap_err();
        assert_eq!(e.code, "schema_error");

        let dup: SubjectSchema = serde_json::from_value(json!(["Math", "Math"])).unwrap();
        assert!(dup.validate().is_err());
    }

    #[test]
    fn total_ignores_null_scores() {
        let mut schema = SubjectSchema::new();
        schema.push("A");
        schema.push("B");
        let mut r = StudentRecord::new("1", "Ann", "1");
        r.scores.insert("A".into(), Some(40.0));
        r.scores.insert("B".into(), None);
        r.recompute_total(&schema);
        assert_eq!(r.total_score, Some(40.0));

        r.scores.insert("A".into(), None);
        r.recompute_total(&schema);
        assert_eq!(r.total_score, None);
    }

    #[test]
    fn default_full_score_widens_above_100() {
        let mut schema = SubjectSchema::new();
        schema.push("Chinese");
        schema.push("Physics");
        let mut a = StudentRecord::new("1", "Ann", "1");
        a.scores.insert("Chinese".into(), Some(128.0));
        a.scores.insert("Physics".into(), Some(88.0));
        let cfg = ExamConfig::derive_defaults(&schema, &[a]);
        assert_eq!(cfg.subjects["Chinese"].full_score, 150.0);
        assert_eq!(cfg.subjects["Chinese"].pass_line, 90.0);
        assert_eq!(cfg.subjects["Physics"].full_score, 100.0);
        assert_eq!(cfg.total().full_score, 250.0);
        assert!(cfg.validate(&schema).is_ok());
    }

    #[test]
    fn patch_rejects_non_ascending_thresholds_without_partial_apply() {
        let mut schema = SubjectSchema::new();
        schema.push("A");
        schema.push("B");
        let mut cfg = ExamConfig::derive_defaults(&schema, &[]);
        let before = cfg.clone();

        let mut patches = BTreeMap::new();
        patches.insert(
            "A".to_string(),
            SubjectConfigPatch {
                full_score: Some(120.0),
                ..Default::default()
            },
        );
        patches.insert(
            "B".to_string(),
            SubjectConfigPatch {
                pass_line: Some(95.0),
                ..Default::default()
            },
        );
        let e = cfg.apply_patches(&schema, &patches).unwrap_err();
        assert_eq!(e.code, "bad_params");
        assert_eq!(cfg, before);

        patches.remove("B");
        cfg.apply_patches(&schema, &patches).unwrap();
        assert_eq!(cfg.subjects["A"].full_score, 120.0);
        assert_eq!(cfg.subjects["A"].pass_line, 72.0);
    }

    #[test]
    fn default_assigned_scheme_is_valid_and_banded_from_top() {
        let scheme = AssignedScoreScheme::default();
        scheme.validate().unwrap();
        assert_eq!(scheme.score_for_percentile(0.0), Some(70.0));
        assert_eq!(scheme.score_for_percentile(5.0), Some(67.0));
        assert_eq!(scheme.score_for_percentile(99.9), Some(40.0));
        assert_eq!(scheme.score_for_percentile(100.0), Some(40.0));
    }
}
