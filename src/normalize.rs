//! Turns a worksheet-like grid into typed student records.
//!
//! Headers may be single-tier (`姓名 | 班级 | 语文 | 数学`) or two-tier, where the
//! row above the key row carries subject labels that span several sub-columns
//! (`语文` over `分数 | 班名 | 级名`). A blank subject cell continues the
//! subject of the cell to its left, which is how merged cells come out of a
//! spreadsheet export.

use crate::calc::CalcError;
use crate::model::{StudentRecord, SubjectSchema};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Rows scanned for the key row.
pub const HEADER_SCAN_ROWS: usize = 5;

const ID_LABELS: &[&str] = &["学号", "考号", "准考证号", "id", "student id", "studentid"];
const NAME_LABELS: &[&str] = &["姓名", "学生姓名", "name", "student name"];
const CLASS_LABELS: &[&str] = &["班级", "班别", "class"];
const CLASS_RANK_LABELS: &[&str] = &["班级排名", "班排", "班级名次", "class rank", "classrank"];
const GRADE_RANK_LABELS: &[&str] = &["年级排名", "级排", "年级名次", "校排", "grade rank", "graderank"];
const SCORE_SUB_LABELS: &[&str] = &["分数", "得分", "成绩", "原始分", "score"];
const SUBJECT_CLASS_RANK_SUB_LABELS: &[&str] = &["班名", "班次"];
const SUBJECT_GRADE_RANK_SUB_LABELS: &[&str] = &["级名", "校次", "年名"];
const IGNORED_LABELS: &[&str] = &[
    "总分", "合计", "total", "totalscore", "序号", "no", "no.", "备注", "remark", "赋分", "等级",
    "考场", "座号",
];

/// One worksheet cell. JSON numbers, strings, booleans and `null` map directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Bool(bool),
    Text(String),
    Empty,
}

impl CellValue {
    /// Trimmed display text; integral numbers print without a fraction.
    pub fn text(&self) -> String {
        match self {
            CellValue::Number(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", *v as i64)
                } else {
                    v.to_string()
                }
            }
            CellValue::Bool(b) => b.to_string(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Empty => String::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text().is_empty()
    }

    /// Permissive numeric read: anything that is not a finite number is `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(v) => Some(*v),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Bool(_) | CellValue::Empty => None,
        }
        .filter(|v| v.is_finite())
    }

    /// Positive integral rank; zero, fractions and junk read as absent.
    pub fn as_rank(&self) -> Option<u32> {
        let v = self.as_number()?;
        if v >= 1.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
            Some(v as u32)
        } else {
            None
        }
    }
}

pub type Grid = Vec<Vec<CellValue>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Name,
    Class,
    ClassRank,
    GradeRank,
    SubjectScore(String),
    SubjectClassRank(String),
    SubjectGradeRank(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    pub index: usize,
    pub kind: FieldKind,
}

#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub columns: Vec<MappedColumn>,
    pub schema: SubjectSchema,
}

impl ColumnMap {
    fn column_of(&self, kind: &FieldKind) -> Option<usize> {
        self.columns.iter().find(|c| c.kind == *kind).map(|c| c.index)
    }
}

fn label_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn label_in(label: &str, set: &[&str]) -> bool {
    set.iter().any(|s| *s == label)
}

fn fixed_field(label: &str) -> Option<FieldKind> {
    if label_in(label, ID_LABELS) {
        Some(FieldKind::Id)
    } else if label_in(label, NAME_LABELS) {
        Some(FieldKind::Name)
    } else if label_in(label, CLASS_LABELS) {
        Some(FieldKind::Class)
    } else if label_in(label, CLASS_RANK_LABELS) {
        Some(FieldKind::ClassRank)
    } else if label_in(label, GRADE_RANK_LABELS) {
        Some(FieldKind::GradeRank)
    } else {
        None
    }
}

fn is_key_row(row: &[CellValue]) -> bool {
    let labels: Vec<String> = row.iter().map(|c| label_key(&c.text())).collect();
    labels.iter().any(|l| label_in(l, NAME_LABELS)) && labels.iter().any(|l| label_in(l, CLASS_LABELS))
}

/// Index of the first row in the scan window that has both a name and a class label.
pub fn find_key_row(grid: &[Vec<CellValue>]) -> Option<usize> {
    grid.iter().take(HEADER_SCAN_ROWS).position(|row| is_key_row(row))
}

/// Column mapper over the two header rows.
///
/// The only state is the subject currently being tracked from the label row;
/// each column emits at most one `(subject, field kind)` mapping.
#[derive(Debug, Default)]
struct HeaderTokenizer {
    tracking_subject: Option<String>,
}

impl HeaderTokenizer {
    fn advance(&mut self, subject_cell: &str) {
        let raw = subject_cell.trim();
        if raw.is_empty() {
            return;
        }
        let key = label_key(raw);
        // A fixed or ignored label in the upper row is a vertically merged
        // header, not a subject group.
        if fixed_field(&key).is_some() || label_in(&key, IGNORED_LABELS) {
            self.tracking_subject = None;
        } else {
            self.tracking_subject = Some(raw.to_string());
        }
    }

    fn emit(&self, label_cell: &str) -> Option<FieldKind> {
        let raw = label_cell.trim();
        if raw.is_empty() {
            return None;
        }
        let key = label_key(raw);
        if let Some(kind) = fixed_field(&key) {
            return Some(kind);
        }
        let is_sub_label = label_in(&key, SCORE_SUB_LABELS)
            || label_in(&key, SUBJECT_CLASS_RANK_SUB_LABELS)
            || label_in(&key, SUBJECT_GRADE_RANK_SUB_LABELS);
        if let Some(subject) = &self.tracking_subject {
            if label_in(&key, SCORE_SUB_LABELS) {
                return Some(FieldKind::SubjectScore(subject.clone()));
            }
            if label_in(&key, SUBJECT_CLASS_RANK_SUB_LABELS) {
                return Some(FieldKind::SubjectClassRank(subject.clone()));
            }
            if label_in(&key, SUBJECT_GRADE_RANK_SUB_LABELS) {
                return Some(FieldKind::SubjectGradeRank(subject.clone()));
            }
        }
        if is_sub_label || label_in(&key, IGNORED_LABELS) {
            return None;
        }
        Some(FieldKind::SubjectScore(raw.to_string()))
    }
}

/// Maps header columns to fields. `subject_row` is the row above the key row, if any.
pub fn map_columns(subject_row: Option<&[CellValue]>, key_row: &[CellValue]) -> Result<ColumnMap, CalcError> {
    let width = key_row.len().max(subject_row.map(|r| r.len()).unwrap_or(0));
    let mut tokenizer = HeaderTokenizer::default();
    let mut columns: Vec<MappedColumn> = Vec::new();
    let mut schema = SubjectSchema::new();

    for index in 0..width {
        if let Some(cell) = subject_row.and_then(|r| r.get(index)) {
            tokenizer.advance(&cell.text());
        }
        let label = key_row.get(index).map(|c| c.text()).unwrap_or_default();
        let Some(kind) = tokenizer.emit(&label) else {
            continue;
        };
        // First column wins for every field.
        if columns.iter().any(|c| c.kind == kind) {
            continue;
        }
        if let FieldKind::SubjectScore(subject) = &kind {
            schema.push(subject.clone());
        }
        columns.push(MappedColumn { index, kind });
    }

    let mut missing = Vec::new();
    if !columns.iter().any(|c| c.kind == FieldKind::Name) {
        missing.push("name");
    }
    if !columns.iter().any(|c| c.kind == FieldKind::Class) {
        missing.push("class");
    }
    if !missing.is_empty() {
        return Err(CalcError::with_details(
            "schema_error",
            format!("header is missing required columns: {}", missing.join(", ")),
            json!({ "missing": missing }),
        ));
    }

    // Rank sub-columns only count for subjects that also have a score column.
    columns.retain(|c| match &c.kind {
        FieldKind::SubjectClassRank(s) | FieldKind::SubjectGradeRank(s) => schema.contains(s),
        _ => true,
    });

    Ok(ColumnMap { columns, schema })
}

#[derive(Debug, Clone)]
pub struct NormalizedGrid {
    pub records: Vec<StudentRecord>,
    pub subject_schema: SubjectSchema,
    /// Data rows that yielded no record (blank sentinels and identity-less rows).
    pub dropped_rows: usize,
    /// Ids carried by more than one record, in first-seen order. Lookups by id
    /// resolve to the first of them.
    pub duplicate_ids: Vec<String>,
}

fn duplicate_ids(records: &[StudentRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dups: Vec<String> = Vec::new();
    for r in records {
        if !seen.insert(r.id.as_str()) && !dups.contains(&r.id) {
            dups.push(r.id.clone());
        }
    }
    dups
}

fn cell(row: &[CellValue], index: usize) -> &CellValue {
    row.get(index).unwrap_or(&CellValue::Empty)
}

fn parse_row(row: &[CellValue], map: &ColumnMap) -> Option<StudentRecord> {
    let text_of = |kind: &FieldKind| {
        map.column_of(kind)
            .map(|i| cell(row, i).text())
            .unwrap_or_default()
    };
    let name = text_of(&FieldKind::Name);
    let class = text_of(&FieldKind::Class);
    let mut id = text_of(&FieldKind::Id);
    if id.is_empty() {
        id = name.clone();
    }
    if id.is_empty() {
        return None;
    }

    let mut record = StudentRecord::new(id, name, class);
    for s in map.schema.iter() {
        record.scores.insert(s.to_string(), None);
    }
    for col in &map.columns {
        let value = cell(row, col.index);
        match &col.kind {
            FieldKind::SubjectScore(s) => {
                record.scores.insert(s.clone(), value.as_number());
            }
            FieldKind::SubjectClassRank(s) => {
                if let Some(rank) = value.as_rank() {
                    record.class_ranks.insert(s.clone(), rank);
                }
            }
            FieldKind::SubjectGradeRank(s) => {
                if let Some(rank) = value.as_rank() {
                    record.grade_ranks.insert(s.clone(), rank);
                }
            }
            FieldKind::ClassRank => record.class_rank = value.as_rank(),
            FieldKind::GradeRank => record.grade_rank = value.as_rank(),
            FieldKind::Id | FieldKind::Name | FieldKind::Class => {}
        }
    }
    record.recompute_total(&map.schema);
    Some(record)
}

/// Locates the header, maps columns and parses every data row below it.
pub fn normalize_grid(grid: &[Vec<CellValue>]) -> Result<NormalizedGrid, CalcError> {
    let Some(key_idx) = find_key_row(grid) else {
        return Err(CalcError::with_details(
            "schema_error",
            format!(
                "no header row with both a name and a class column in the first {} rows",
                HEADER_SCAN_ROWS
            ),
            json!({ "missing": ["name", "class"], "scannedRows": grid.len().min(HEADER_SCAN_ROWS) }),
        ));
    };
    let subject_row = if key_idx > 0 {
        Some(grid[key_idx - 1].as_slice())
    } else {
        None
    };
    let map = map_columns(subject_row, &grid[key_idx])?;
    map.schema.validate()?;

    let sentinel_cols: Vec<usize> = map.columns.iter().take(2).map(|c| c.index).collect();
    let mut records = Vec::new();
    let mut dropped_rows = 0_usize;
    for (offset, row) in grid.iter().enumerate().skip(key_idx + 1) {
        if sentinel_cols.iter().all(|i| cell(row, *i).is_blank()) {
            debug!(row = offset, "skipping blank row");
            dropped_rows += 1;
            continue;
        }
        match parse_row(row, &map) {
            Some(r) => records.push(r),
            None => {
                debug!(row = offset, "dropping row without identity");
                dropped_rows += 1;
            }
        }
    }

    if records.is_empty() {
        return Err(CalcError::new("parse_error", "no valid student rows found"));
    }

    let duplicate_ids = duplicate_ids(&records);
    if !duplicate_ids.is_empty() {
        warn!(ids = ?duplicate_ids, "several rows share a student id");
    }

    Ok(NormalizedGrid {
        records,
        subject_schema: map.schema,
        dropped_rows,
        duplicate_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grid(v: serde_json::Value) -> Grid {
        serde_json::from_value(v).expect("grid json")
    }

    #[test]
    fn cells_parse_from_mixed_json() {
        let g = grid(json!([["姓名", 12, null, true, " 7.5 "]]));
        assert_eq!(g[0][0], CellValue::Text("姓名".into()));
        assert_eq!(g[0][1], CellValue::Number(12.0));
        assert_eq!(g[0][2], CellValue::Empty);
        assert_eq!(g[0][1].text(), "12");
        assert_eq!(g[0][4].as_number(), Some(7.5));
        assert_eq!(g[0][3].as_number(), None);
        assert_eq!(CellValue::Number(0.0).as_rank(), None);
        assert_eq!(CellValue::Text("缺考".into()).as_number(), None);
    }

    #[test]
    fn single_tier_header() {
        let g = grid(json!([
            ["学号", "姓名", "班级", "语文", "数学", "总分"],
            ["001", "Ann", "1", 90, "88", 999],
            ["002", "Bob", "1", "缺考", 70, 999]
        ]));
        let out = normalize_grid(&g).unwrap();
        assert_eq!(out.subject_schema.as_slice(), &["语文".to_string(), "数学".to_string()]);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].total_score, Some(178.0));
        assert_eq!(out.records[1].scores["语文"], None);
        assert_eq!(out.records[1].total_score, Some(70.0));
    }

    #[test]
    fn two_tier_header_tracks_subject_across_blank_cells() {
        let g = grid(json!([
            ["期中考试"],
            ["", "", "语文", "", "", "数学", "", "物理"],
            ["姓名", "班级", "分数", "班名", "级名", "得分", "班名", "物理"],
            ["Ann", "1", 100, 1, 2, 90, 2, 80],
            ["Bob", "1", 95, 2, 3, 99, 1, null]
        ]));
        let key = find_key_row(&g).unwrap();
        assert_eq!(key, 2);
        let map = map_columns(Some(&g[1]), &g[2]).unwrap();
        assert_eq!(map.schema.as_slice(), &["语文".to_string(), "数学".to_string(), "物理".to_string()]);
        assert!(map.columns.contains(&MappedColumn {
            index: 3,
            kind: FieldKind::SubjectClassRank("语文".into())
        }));
        assert!(map.columns.contains(&MappedColumn {
            index: 6,
            kind: FieldKind::SubjectClassRank("数学".into())
        }));

        let out = normalize_grid(&g).unwrap();
        let ann = &out.records[0];
        assert_eq!(ann.id, "Ann");
        assert_eq!(ann.class_ranks["语文"], 1);
        assert_eq!(ann.grade_ranks["语文"], 2);
        assert_eq!(ann.total_score, Some(270.0));
        assert_eq!(out.records[1].scores["物理"], None);
    }

    #[test]
    fn fixed_label_in_upper_row_stops_subject_tracking() {
        let g = grid(json!([
            ["", "", "英语", "总分"],
            ["姓名", "班级", "分数", "班名"],
            ["Ann", "2", 80, 5]
        ]));
        let map = map_columns(Some(&g[0]), &g[1]).unwrap();
        assert_eq!(map.schema.as_slice(), &["英语".to_string()]);
        assert!(!map.columns.iter().any(|c| c.index == 3));
    }

    #[test]
    fn pre_existing_total_ranks_are_read_and_bad_ranks_dropped() {
        let g = grid(json!([
            ["姓名", "班级", "A", "班级排名", "年级排名"],
            ["Ann", "1", 90, 1, "n/a"],
            ["Bob", "1", 80, 2, 0]
        ]));
        let out = normalize_grid(&g).unwrap();
        assert_eq!(out.records[0].class_rank, Some(1));
        assert_eq!(out.records[0].grade_rank, None);
        assert_eq!(out.records[1].grade_rank, None);
    }

    #[test]
    fn trailing_blank_rows_and_identity_less_rows_are_dropped() {
        let g = grid(json!([
            ["学号", "姓名", "班级", "A"],
            ["1", "Ann", "1", 50],
            ["", "", "1", 40],
            [null, null],
            []
        ]));
        let out = normalize_grid(&g).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped_rows, 3);
    }

    #[test]
    fn shared_names_without_id_column_are_reported() {
        let g = grid(json!([
            ["姓名", "班级", "A"],
            ["Ann", "1", 50],
            ["Ann", "2", 60],
            ["Bob", "1", 70],
            ["Ann", "2", 80]
        ]));
        let out = normalize_grid(&g).unwrap();
        assert_eq!(out.records.len(), 4);
        assert_eq!(out.duplicate_ids, vec!["Ann".to_string()]);
    }

    #[test]
    fn header_must_appear_within_scan_window() {
        let mut rows = vec![vec![CellValue::Empty]; HEADER_SCAN_ROWS];
        rows.push(vec![CellValue::Text("姓名".into()), CellValue::Text("班级".into())]);
        let e = normalize_grid(&rows).unwrap_err();
        assert_eq!(e.code, "schema_error");
        assert_eq!(e.details.unwrap()["missing"], json!(["name", "class"]));
    }

    #[test]
    fn header_only_grid_is_a_parse_error() {
        let g = grid(json!([["姓名", "班级", "A"]]));
        assert_eq!(normalize_grid(&g).unwrap_err().code, "parse_error");
    }

    #[test]
    fn english_labels_are_case_insensitive() {
        let g = grid(json!([
            ["Student ID", "Name", "Class", "Math", "Remark"],
            ["s1", "Ann", "A", 71, "ok"]
        ]));
        let out = normalize_grid(&g).unwrap();
        assert_eq!(out.records[0].id, "s1");
        assert_eq!(out.subject_schema.as_slice(), &["Math".to_string()]);
    }
}
