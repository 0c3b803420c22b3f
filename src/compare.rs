use crate::model::{Dataset, StudentRecord, TOTAL_KEY};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDelta {
    pub subject: String,
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRow {
    pub id: String,
    pub name: String,
    pub class: String,
    pub current_total: Option<f64>,
    pub previous_total: Option<f64>,
    pub total_delta: Option<f64>,
    pub current_grade_rank: Option<u32>,
    pub previous_grade_rank: Option<u32>,
    /// Places climbed since the previous exam; negative means dropped.
    pub grade_rank_delta: Option<i64>,
    pub subjects: Vec<SubjectDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub current_dataset_id: String,
    pub previous_dataset_id: String,
    pub shared_subjects: Vec<String>,
    pub rows: Vec<ProgressRow>,
    pub unmatched_current: usize,
    pub unmatched_previous: usize,
}

/// Matches students of `current` against `previous` by id.
///
/// Only subjects present in both schemas are compared, in `current`'s order.
/// Neither dataset is modified.
pub fn compare_datasets(current: &Dataset, previous: &Dataset) -> ProgressReport {
    let shared_subjects: Vec<String> = current
        .subject_schema
        .iter()
        .filter(|s| previous.subject_schema.contains(s))
        .map(str::to_string)
        .collect();
    // First record wins for a repeated id, as with every other id lookup.
    let mut previous_by_id: HashMap<&str, (usize, &StudentRecord)> = HashMap::new();
    for (i, r) in previous.records.iter().enumerate() {
        previous_by_id.entry(r.id.as_str()).or_insert((i, r));
    }
    let mut matched: HashSet<usize> = HashSet::new();

    let mut rows = Vec::new();
    let mut unmatched_current = 0_usize;
    for cur in &current.records {
        let Some(&(prev_index, prev)) = previous_by_id.get(cur.id.as_str()) else {
            unmatched_current += 1;
            continue;
        };
        matched.insert(prev_index);
        let current_total = cur.score(TOTAL_KEY);
        let previous_total = prev.score(TOTAL_KEY);
        let total_delta = match (current_total, previous_total) {
            (Some(c), Some(p)) => Some(c - p),
            _ => None,
        };
        let grade_rank_delta = match (cur.grade_rank, prev.grade_rank) {
            (Some(c), Some(p)) => Some(i64::from(p) - i64::from(c)),
            _ => None,
        };
        let subjects = shared_subjects
            .iter()
            .filter_map(|s| {
                let c = cur.score(s)?;
                let p = prev.score(s)?;
                Some(SubjectDelta {
                    subject: s.clone(),
                    current: c,
                    previous: p,
                    delta: c - p,
                })
            })
            .collect();
        rows.push(ProgressRow {
            id: cur.id.clone(),
            name: cur.name.clone(),
            class: cur.class.clone(),
            current_total,
            previous_total,
            total_delta,
            current_grade_rank: cur.grade_rank,
            previous_grade_rank: prev.grade_rank,
            grade_rank_delta,
            subjects,
        });
    }
    let unmatched_previous = previous.records.len() - matched.len();

    ProgressReport {
        current_dataset_id: current.id.clone(),
        previous_dataset_id: previous.id.clone(),
        shared_subjects,
        rows,
        unmatched_current,
        unmatched_previous,
    }
}
