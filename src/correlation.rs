use crate::calc::round_to;
use crate::model::{StudentRecord, SubjectSchema};
use serde::Serialize;

/// Pairs at or below this correlation are left out of the edge set.
pub const EDGE_THRESHOLD: f64 = 0.35;

/// Pearson r with population deviations: `Σ(dx·dy) / (n·σx·σy)`.
///
/// Zero when fewer than two pairs exist or either side has no spread.
pub fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / nf;
    let mut sxy = 0.0_f64;
    let mut sxx = 0.0_f64;
    let mut syy = 0.0_f64;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    // n·σx·σy == sqrt(Σdx²·Σdy²)
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Scores of students who have a valid value in both subjects.
fn paired_scores(records: &[&StudentRecord], a: &str, b: &str) -> Vec<(f64, f64)> {
    records
        .iter()
        .filter_map(|r| Some((r.score(a)?, r.score(b)?)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationEdge {
    pub source: String,
    pub target: String,
    pub r: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCentrality {
    pub subject: String,
    pub centrality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationMatrix {
    pub subjects: Vec<String>,
    /// Symmetric, diagonal 1.0, off-diagonal rounded to 2 decimals.
    pub matrix: Vec<Vec<f64>>,
    /// Number of list-wise pairs behind each entry.
    pub pair_counts: Vec<Vec<usize>>,
    pub centrality: Vec<SubjectCentrality>,
    pub edges: Vec<CorrelationEdge>,
}

pub fn compute_correlation(schema: &SubjectSchema, records: &[&StudentRecord]) -> CorrelationMatrix {
    let subjects: Vec<String> = schema.iter().map(str::to_string).collect();
    let n = subjects.len();
    let mut matrix = vec![vec![0.0_f64; n]; n];
    let mut pair_counts = vec![vec![0_usize; n]; n];
    let mut edges = Vec::new();

    for i in 0..n {
        matrix[i][i] = 1.0;
        pair_counts[i][i] = records.iter().filter(|r| r.score(&subjects[i]).is_some()).count();
        for j in (i + 1)..n {
            let pairs = paired_scores(records, &subjects[i], &subjects[j]);
            let r = round_to(pearson(&pairs), 2);
            matrix[i][j] = r;
            matrix[j][i] = r;
            pair_counts[i][j] = pairs.len();
            pair_counts[j][i] = pairs.len();
            if r > EDGE_THRESHOLD {
                edges.push(CorrelationEdge {
                    source: subjects[i].clone(),
                    target: subjects[j].clone(),
                    r,
                });
            }
        }
    }

    let centrality = subjects
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let others: Vec<f64> = (0..n).filter(|&j| j != i).map(|j| matrix[i][j]).collect();
            let centrality = if others.is_empty() {
                0.0
            } else {
                others.iter().sum::<f64>() / (others.len() as f64)
            };
            SubjectCentrality {
                subject: s.clone(),
                centrality,
            }
        })
        .collect();

    CorrelationMatrix {
        subjects,
        matrix,
        pair_counts,
        centrality,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(rows: &[(Option<f64>, Option<f64>, Option<f64>)]) -> (SubjectSchema, Vec<StudentRecord>) {
        let mut schema = SubjectSchema::new();
        for s in ["X", "Y", "Z"] {
            schema.push(s);
        }
        let out = rows
            .iter()
            .enumerate()
            .map(|(i, (x, y, z))| {
                let mut r = StudentRecord::new(i.to_string(), "s", "1");
                r.scores.insert("X".into(), *x);
                r.scores.insert("Y".into(), *y);
                r.scores.insert("Z".into(), *z);
                r
            })
            .collect();
        (schema, out)
    }

    #[test]
    fn perfectly_linear_pairs_give_exactly_one() {
        assert_eq!(pearson(&[(10.0, 20.0), (20.0, 40.0), (30.0, 60.0)]), 1.0);
        assert_eq!(pearson(&[(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)]), -1.0);
    }

    #[test]
    fn degenerate_inputs_give_zero() {
        assert_eq!(pearson(&[]), 0.0);
        assert_eq!(pearson(&[(1.0, 2.0)]), 0.0);
        assert_eq!(pearson(&[(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)]), 0.0);
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal_and_listwise_pairs() {
        let (schema, recs) = records(&[
            (Some(10.0), Some(20.0), Some(5.0)),
            (Some(20.0), Some(40.0), Some(3.0)),
            (Some(30.0), Some(60.0), None),
            (Some(40.0), None, Some(9.0)),
            (None, Some(10.0), Some(1.0)),
        ]);
        let refs: Vec<&StudentRecord> = recs.iter().collect();
        let m = compute_correlation(&schema, &refs);
        for i in 0..3 {
            assert_eq!(m.matrix[i][i], 1.0);
            for j in 0..3 {
                assert_eq!(m.matrix[i][j], m.matrix[j][i]);
                assert!((-1.0..=1.0).contains(&m.matrix[i][j]));
            }
        }
        assert_eq!(m.matrix[0][1], 1.0);
        assert_eq!(m.pair_counts[0][1], 3);
        assert_eq!(m.pair_counts[0][2], 3);
        assert!(m.edges.iter().any(|e| e.source == "X" && e.target == "Y"));
        assert!(m.edges.iter().all(|e| e.r > EDGE_THRESHOLD));

        let cx = m.centrality.iter().find(|c| c.subject == "X").unwrap();
        assert!((cx.centrality - (m.matrix[0][1] + m.matrix[0][2]) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn single_subject_has_zero_centrality() {
        let mut schema = SubjectSchema::new();
        schema.push("X");
        let r = StudentRecord::new("1", "s", "1");
        let m = compute_correlation(&schema, &[&r]);
        assert_eq!(m.matrix, vec![vec![1.0]]);
        assert_eq!(m.centrality[0].centrality, 0.0);
        assert!(m.edges.is_empty());
    }
}
