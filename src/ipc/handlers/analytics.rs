use crate::calc::{self, CalcContext, GroupFilter};
use crate::compare::compare_datasets;
use crate::correlation::compute_correlation;
use crate::diagnose::diagnose_weakness;
use crate::goals::allocate_target;
use crate::ipc::error::{calc_err, ok};
use crate::ipc::helpers::{dataset, optional_str, parse_filter, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Dataset, TOTAL_KEY};
use crate::report::{build_report, find_selected, AllocationRequest};
use crate::standardize::{compute_standardized, T_CENTER, T_SCALE};
use serde_json::json;

fn dataset_and_filter<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Dataset, GroupFilter), serde_json::Value> {
    let ds = dataset(state, req, "datasetId")?;
    let filter = parse_filter(req)?;
    Ok((ds, filter))
}

fn context(ds: &Dataset) -> CalcContext<'_> {
    CalcContext::new(&ds.subject_schema, &ds.config, &ds.records)
}

fn handle_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (ds, filter) = match dataset_and_filter(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = context(ds);
    let selected = ctx.select(&filter);
    let statistics = calc::compute_statistics(&ctx, &selected);
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "filter": filter,
            "studentCount": selected.len(),
            "subjectSchema": ds.subject_schema,
            "statistics": statistics,
            "distributions": calc::compute_distributions(&statistics),
        }),
    )
}

fn handle_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ds = match dataset(state, req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match optional_str(req, "subject") {
        Ok(v) => v.filter(|s| !s.is_empty()).unwrap_or_else(|| TOTAL_KEY.to_string()),
        Err(e) => return e,
    };
    match calc::compute_class_breakdown(&context(ds), &key) {
        Ok(classes) => ok(
            &req.id,
            json!({
                "datasetId": ds.id,
                "subject": key,
                "classes": classes,
            }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_standardized(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (ds, filter) = match dataset_and_filter(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = context(ds);
    let selected = ctx.select(&filter);
    let statistics = calc::compute_statistics(&ctx, &selected);
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "filter": filter,
            "tCenter": T_CENTER,
            "tScale": T_SCALE,
            "standardizedScores": compute_standardized(&ctx, &selected, &statistics),
        }),
    )
}

fn handle_weakness(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (ds, filter) = match dataset_and_filter(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = context(ds);
    let selected = ctx.select(&filter);
    let statistics = calc::compute_statistics(&ctx, &selected);
    let diagnoses = diagnose_weakness(&selected, ctx.schema, &statistics);
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "filter": filter,
            "excludedCount": selected.len() - diagnoses.len(),
            "diagnoses": diagnoses,
        }),
    )
}

fn handle_correlation(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (ds, filter) = match dataset_and_filter(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = context(ds);
    let selected = ctx.select(&filter);
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "filter": filter,
            "correlation": compute_correlation(ctx.schema, &selected),
        }),
    )
}

fn handle_allocation(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (ds, filter) = match dataset_and_filter(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target_total = match required_f64(req, "targetTotal") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = context(ds);
    let selected = ctx.select(&filter);
    let student = match find_selected(&selected, &student_id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    let statistics = calc::compute_statistics(&ctx, &selected);
    let plan = allocate_target(student, target_total, ctx.schema, ctx.config, &statistics);
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "filter": filter,
            "allocationPlan": plan,
        }),
    )
}

fn handle_compare(state: &mut AppState, req: &Request) -> serde_json::Value {
    let current = match dataset(state, req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let previous = match dataset(state, req, "otherDatasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(&req.id, json!(compare_datasets(current, previous)))
}

fn handle_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (ds, filter) = match dataset_and_filter(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let allocation = match optional_str(req, "studentId") {
        Ok(Some(student_id)) if !student_id.is_empty() => match required_f64(req, "targetTotal") {
            Ok(target_total) => Some(AllocationRequest {
                student_id,
                target_total,
            }),
            Err(e) => return e,
        },
        Ok(_) => None,
        Err(e) => return e,
    };
    match build_report(&context(ds), &filter, allocation.as_ref()) {
        Ok(report) => {
            let mut value = json!(report);
            value["datasetId"] = json!(ds.id);
            ok(&req.id, value)
        }
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.statistics" => Some(handle_statistics(state, req)),
        "analytics.classes" => Some(handle_classes(state, req)),
        "analytics.standardized" => Some(handle_standardized(state, req)),
        "analytics.weakness" => Some(handle_weakness(state, req)),
        "analytics.correlation" => Some(handle_correlation(state, req)),
        "analytics.allocation" => Some(handle_allocation(state, req)),
        "analytics.compare" => Some(handle_compare(state, req)),
        "analytics.report" => Some(handle_report(state, req)),
        _ => None,
    }
}
