use crate::calc::{
    compute_distributions, compute_statistics, CalcContext, CalcError, Distribution, GroupFilter,
    StatisticsMap,
};
use crate::correlation::{compute_correlation, CorrelationMatrix};
use crate::diagnose::{diagnose_weakness, WeaknessDiagnosis};
use crate::goals::{allocate_target, AllocationPlan};
use crate::model::{StudentRecord, SubjectSchema};
use crate::standardize::{compute_standardized, StudentStandardized};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub student_id: String,
    pub target_total: f64,
}

/// Everything the presentation layer consumes for one filter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub filter: GroupFilter,
    pub subject_schema: SubjectSchema,
    pub records: Vec<StudentRecord>,
    pub statistics: StatisticsMap,
    pub distributions: Vec<Distribution>,
    pub standardized_scores: Vec<StudentStandardized>,
    pub weakness_diagnosis: Vec<WeaknessDiagnosis>,
    pub correlation: CorrelationMatrix,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_plan: Option<AllocationPlan>,
}

/// Looks a student up in the filtered population.
pub fn find_selected<'a>(selected: &[&'a StudentRecord], student_id: &str) -> Result<&'a StudentRecord, CalcError> {
    selected
        .iter()
        .copied()
        .find(|r| r.id == student_id)
        .ok_or_else(|| {
            CalcError::with_details(
                "not_found",
                "student not found in the selected group",
                json!({ "studentId": student_id }),
            )
        })
}

/// Runs every stage for one group filter. Records are selected, never re-parsed.
pub fn build_report(
    ctx: &CalcContext<'_>,
    filter: &GroupFilter,
    allocation: Option<&AllocationRequest>,
) -> Result<AnalyticsReport, CalcError> {
    let selected = ctx.select(filter);
    let statistics = compute_statistics(ctx, &selected);
    let allocation_plan = match allocation {
        Some(req) => {
            let student = find_selected(&selected, &req.student_id)?;
            Some(allocate_target(student, req.target_total, ctx.schema, ctx.config, &statistics))
        }
        None => None,
    };

    Ok(AnalyticsReport {
        filter: filter.clone(),
        subject_schema: ctx.schema.clone(),
        records: selected.iter().map(|r| (*r).clone()).collect(),
        distributions: compute_distributions(&statistics),
        standardized_scores: compute_standardized(ctx, &selected, &statistics),
        weakness_diagnosis: diagnose_weakness(&selected, ctx.schema, &statistics),
        correlation: compute_correlation(ctx.schema, &selected),
        statistics,
        allocation_plan,
    })
}
