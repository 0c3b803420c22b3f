use crate::calc::StatisticsMap;
use crate::model::{StudentRecord, SubjectSchema};
use crate::standardize::z_score;
use serde::Serialize;
use std::cmp::Ordering;

/// Fewer usable subject z-scores than this and a student is left out.
pub const MIN_USABLE_SUBJECTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDeviation {
    pub subject: String,
    pub z: f64,
    /// `z - avgZ`; negative means weaker than the student's own baseline.
    pub deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessDiagnosis {
    pub id: String,
    pub name: String,
    pub class: String,
    pub avg_z: f64,
    /// Imbalance coefficient: population std dev of the student's z-scores.
    pub std_dev_z: f64,
    pub subject_deviations: Vec<SubjectDeviation>,
    pub weakest_subject: String,
    pub strongest_subject: String,
}

pub fn diagnose_student(
    record: &StudentRecord,
    schema: &SubjectSchema,
    stats: &StatisticsMap,
) -> Option<WeaknessDiagnosis> {
    let zs: Vec<(&str, f64)> = schema
        .iter()
        .filter_map(|s| {
            let score = record.score(s)?;
            let z = z_score(score, stats.get(s)?)?;
            Some((s, z))
        })
        .collect();
    if zs.len() < MIN_USABLE_SUBJECTS {
        return None;
    }

    let n = zs.len() as f64;
    let avg_z = zs.iter().map(|(_, z)| z).sum::<f64>() / n;
    let std_dev_z = (zs.iter().map(|(_, z)| (z - avg_z).powi(2)).sum::<f64>() / n).sqrt();
    let subject_deviations: Vec<SubjectDeviation> = zs
        .iter()
        .map(|(s, z)| SubjectDeviation {
            subject: s.to_string(),
            z: *z,
            deviation: z - avg_z,
        })
        .collect();

    let by_deviation = |a: &&SubjectDeviation, b: &&SubjectDeviation| {
        a.deviation.partial_cmp(&b.deviation).unwrap_or(Ordering::Equal)
    };
    let weakest_subject = subject_deviations.iter().min_by(by_deviation)?.subject.clone();
    let strongest_subject = subject_deviations.iter().max_by(by_deviation)?.subject.clone();

    Some(WeaknessDiagnosis {
        id: record.id.clone(),
        name: record.name.clone(),
        class: record.class.clone(),
        avg_z,
        std_dev_z,
        subject_deviations,
        weakest_subject,
        strongest_subject,
    })
}

/// Diagnoses every record with enough signal, in input order.
pub fn diagnose_weakness(
    records: &[&StudentRecord],
    schema: &SubjectSchema,
    stats: &StatisticsMap,
) -> Vec<WeaknessDiagnosis> {
    records
        .iter()
        .filter_map(|r| diagnose_student(r, schema, stats))
        .collect()
}
