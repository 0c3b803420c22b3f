use crate::calc::{CalcContext, StatGroup, StatisticsMap};
use crate::model::{AssignedScoreScheme, StudentRecord, TOTAL_KEY};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// T-score centre and scale: `T = 50 + 10·z`.
pub const T_CENTER: f64 = 50.0;
pub const T_SCALE: f64 = 10.0;

/// `None` when the population has no spread.
pub fn z_score(score: f64, stats: &StatGroup) -> Option<f64> {
    if stats.std_dev > 0.0 && score.is_finite() {
        Some((score - stats.average) / stats.std_dev)
    } else {
        None
    }
}

pub fn t_score(z: f64) -> f64 {
    T_CENTER + T_SCALE * z
}

/// Assigned score for `score` within a cohort population sorted descending.
///
/// The percentile is the share of the cohort scoring strictly higher, so tied
/// scores always fall in the same band.
pub fn assigned_score(score: f64, cohort_desc: &[f64], scheme: &AssignedScoreScheme) -> Option<f64> {
    if cohort_desc.is_empty() || !score.is_finite() {
        return None;
    }
    let above = cohort_desc.partition_point(|v| *v > score);
    let percent_above = 100.0 * (above as f64) / (cohort_desc.len() as f64);
    scheme.score_for_percentile(percent_above)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardScore {
    pub z: f64,
    pub t: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStandardized {
    pub subject: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStandardized {
    pub id: String,
    pub name: String,
    pub class: String,
    pub subjects: Vec<SubjectStandardized>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<StandardScore>,
}

fn cohort_scores_desc(cohort: &[StudentRecord], subject: &str) -> Vec<f64> {
    let mut v: Vec<f64> = cohort.iter().filter_map(|r| r.score(subject)).collect();
    v.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    v
}

/// z/T scores for `records` against `stats`, plus assigned scores for
/// subjects configured for rank-based rescoring (ranked against the whole
/// cohort in `ctx`, not the filtered records).
pub fn compute_standardized(
    ctx: &CalcContext<'_>,
    records: &[&StudentRecord],
    stats: &StatisticsMap,
) -> Vec<StudentStandardized> {
    let rescored: BTreeMap<&str, Vec<f64>> = ctx
        .schema
        .iter()
        .filter(|s| {
            ctx.config
                .subject(s)
                .map(|c| c.uses_rank_based_rescoring)
                .unwrap_or(false)
        })
        .map(|s| (s, cohort_scores_desc(ctx.cohort, s)))
        .collect();

    records
        .iter()
        .map(|r| {
            let subjects = ctx
                .schema
                .iter()
                .filter_map(|s| {
                    let score = r.score(s)?;
                    let z = stats.get(s).and_then(|g| z_score(score, g));
                    let assigned = rescored
                        .get(s)
                        .and_then(|pop| assigned_score(score, pop, &ctx.config.assigned_scheme));
                    if z.is_none() && assigned.is_none() {
                        return None;
                    }
                    Some(SubjectStandardized {
                        subject: s.to_string(),
                        score,
                        z,
                        t: z.map(t_score),
                        assigned_score: assigned,
                    })
                })
                .collect();
            let total = r.score(TOTAL_KEY).and_then(|v| {
                let z = stats.get(TOTAL_KEY).and_then(|g| z_score(v, g))?;
                Some(StandardScore { z, t: t_score(z) })
            });
            StudentStandardized {
                id: r.id.clone(),
                name: r.name.clone(),
                class: r.class.clone(),
                subjects,
                total,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{compute_statistics, GroupFilter};
    use crate::model::{ExamConfig, SubjectSchema};

    fn fixture() -> (SubjectSchema, ExamConfig, Vec<StudentRecord>) {
        let mut schema = SubjectSchema::new();
        schema.push("A");
        schema.push("Flat");
        let rows = [
            ("1", "x", 90.0),
            ("2", "x", 75.0),
            ("3", "y", 60.0),
            ("4", "y", 42.0),
            ("5", "y", 33.0),
        ];
        let records: Vec<StudentRecord> = rows
            .iter()
            .map(|(id, class, a)| {
                let mut r = StudentRecord::new(*id, *id, *class);
                r.scores.insert("A".into(), Some(*a));
                r.scores.insert("Flat".into(), Some(50.0));
                r.recompute_total(&schema);
                r
            })
            .collect();
        let config = ExamConfig::derive_defaults(&schema, &records);
        (schema, config, records)
    }

    #[test]
    fn z_scores_center_on_zero_and_t_scores_on_fifty() {
        let (schema, config, records) = fixture();
        let ctx = CalcContext::new(&schema, &config, &records);
        let selected = ctx.select(&GroupFilter::Cohort);
        let stats = compute_statistics(&ctx, &selected);
        let out = compute_standardized(&ctx, &selected, &stats);

        let zs: Vec<f64> = out.iter().filter_map(|s| s.subjects[0].z).collect();
        assert_eq!(zs.len(), 5);
        let mean_z = zs.iter().sum::<f64>() / 5.0;
        assert!(mean_z.abs() < 1e-9);

        let ts: Vec<f64> = out.iter().filter_map(|s| s.subjects[0].t).collect();
        let mean_t = ts.iter().sum::<f64>() / 5.0;
        let sd_t = (ts.iter().map(|t| (t - mean_t).powi(2)).sum::<f64>() / 5.0).sqrt();
        assert!((mean_t - 50.0).abs() < 1e-9);
        assert!((sd_t - 10.0).abs() < 1e-9);
        assert!(ts.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn zero_variance_subject_is_absent_not_zero() {
        let (schema, config, records) = fixture();
        let ctx = CalcContext::new(&schema, &config, &records);
        let selected = ctx.select(&GroupFilter::Cohort);
        let stats = compute_statistics(&ctx, &selected);
        let out = compute_standardized(&ctx, &selected, &stats);
        assert!(out.iter().all(|s| s.subjects.iter().all(|x| x.subject != "Flat")));
        assert!(out[0].total.is_some());
    }

    #[test]
    fn assigned_scores_use_whole_cohort_even_when_filtered() {
        let (schema, mut config, records) = fixture();
        config.subjects.get_mut("A").unwrap().uses_rank_based_rescoring = true;
        let ctx = CalcContext::new(&schema, &config, &records);
        let selected = ctx.select(&GroupFilter::Class { class: "y".into() });
        let stats = compute_statistics(&ctx, &selected);
        let out = compute_standardized(&ctx, &selected, &stats);
        // Student 3 is beaten by 2 of 5 cohort scores (40 %) -> 45 % band -> 58.
        let s3 = out.iter().find(|s| s.id == "3").unwrap();
        assert_eq!(s3.subjects[0].assigned_score, Some(58.0));
        // Student 5 is last: 80 % above -> 85 % band -> 46.
        let s5 = out.iter().find(|s| s.id == "5").unwrap();
        assert_eq!(s5.subjects[0].assigned_score, Some(46.0));
    }

    #[test]
    fn tied_scores_share_an_assigned_band() {
        let scheme = AssignedScoreScheme::default();
        let pop = vec![100.0, 90.0, 90.0, 90.0, 10.0];
        assert_eq!(assigned_score(100.0, &pop, &scheme), Some(70.0));
        let tied = assigned_score(90.0, &pop, &scheme);
        assert_eq!(tied, Some(64.0));
        assert_eq!(assigned_score(10.0, &pop, &scheme), Some(46.0));
        assert_eq!(assigned_score(10.0, &[], &scheme), None);
    }
}
