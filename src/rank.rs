use crate::model::{StudentRecord, SubjectSchema};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Ranks `1..=N` by descending value. Ties get distinct consecutive ranks in
/// input order (stable sort), not shared competition ranks.
fn ordinal_ranks(mut entries: Vec<(usize, f64)>) -> Vec<(usize, u32)> {
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    entries
        .into_iter()
        .enumerate()
        .map(|(pos, (idx, _))| (idx, (pos + 1) as u32))
        .collect()
}

fn class_partitions(records: &[StudentRecord]) -> Vec<Vec<usize>> {
    let mut order: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for r in records {
        if seen.insert(r.class.as_str()) {
            order.push(r.class.as_str());
        }
    }
    order
        .into_iter()
        .map(|class| {
            records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.class == class)
                .map(|(i, _)| i)
                .collect()
        })
        .collect()
}

fn total_key(r: &StudentRecord) -> f64 {
    r.total_score.filter(|v| v.is_finite()).unwrap_or(f64::NEG_INFINITY)
}

/// Attaches total and per-subject ranks that the source did not supply, then
/// sorts records by class rank.
///
/// Total ranks are computed only when the first record lacks them. A
/// subject's ranks are computed only when no record carries one for that
/// subject. Missing totals rank last; missing subject scores are not ranked.
pub fn apply_ranks(records: &mut Vec<StudentRecord>, schema: &SubjectSchema) {
    if records.is_empty() {
        return;
    }
    let partitions = class_partitions(records);

    if records[0].grade_rank.is_none() {
        let entries = records.iter().enumerate().map(|(i, r)| (i, total_key(r))).collect();
        for (idx, rank) in ordinal_ranks(entries) {
            records[idx].grade_rank = Some(rank);
        }
    }

    if records[0].class_rank.is_none() {
        for members in &partitions {
            let entries = members.iter().map(|&i| (i, total_key(&records[i]))).collect();
            for (idx, rank) in ordinal_ranks(entries) {
                records[idx].class_rank = Some(rank);
            }
        }
    }

    for subject in schema.iter() {
        if !records.iter().any(|r| r.grade_ranks.contains_key(subject)) {
            let entries = records
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.score(subject).map(|v| (i, v)))
                .collect();
            for (idx, rank) in ordinal_ranks(entries) {
                records[idx].grade_ranks.insert(subject.to_string(), rank);
            }
        }
        if !records.iter().any(|r| r.class_ranks.contains_key(subject)) {
            for members in &partitions {
                let entries = members
                    .iter()
                    .filter_map(|&i| records[i].score(subject).map(|v| (i, v)))
                    .collect();
                for (idx, rank) in ordinal_ranks(entries) {
                    records[idx].class_ranks.insert(subject.to_string(), rank);
                }
            }
        }
    }

    records.sort_by_key(|r| r.class_rank.unwrap_or(u32::MAX));
}
