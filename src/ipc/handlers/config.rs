use crate::calc::CalcError;
use crate::ipc::error::{calc_err, ok};
use crate::ipc::helpers::{dataset, persist, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{AssignedScoreScheme, ExamConfig, SubjectConfigPatch, SubjectSchema};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

/// Applies `{ "subjects": { name: patch }, "assignedScheme": { "bands": [...] } }`.
/// Either key may be omitted; nothing changes unless everything validates.
pub fn apply_config_params(
    schema: &SubjectSchema,
    config: &mut ExamConfig,
    raw: &serde_json::Value,
) -> Result<(), CalcError> {
    if raw.is_null() {
        return Ok(());
    }
    if !raw.is_object() {
        return Err(CalcError::new("bad_params", "config must be an object"));
    }
    let mut next = config.clone();
    if let Some(subjects) = raw.get("subjects").filter(|v| !v.is_null()) {
        let patches: BTreeMap<String, SubjectConfigPatch> = serde_json::from_value(subjects.clone())
            .map_err(|e| CalcError::new("bad_params", format!("invalid subjects config: {}", e)))?;
        next.apply_patches(schema, &patches)?;
    }
    if let Some(scheme) = raw.get("assignedScheme").filter(|v| !v.is_null()) {
        let scheme: AssignedScoreScheme = serde_json::from_value(scheme.clone())
            .map_err(|e| CalcError::new("bad_params", format!("invalid assignedScheme: {}", e)))?;
        scheme.validate()?;
        next.assigned_scheme = scheme;
    }
    *config = next;
    Ok(())
}

fn config_json(config: &ExamConfig) -> serde_json::Value {
    json!({
        "subjects": config.subjects,
        "total": config.total(),
        "assignedScheme": config.assigned_scheme,
    })
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ds = match dataset(state, req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "config": config_json(&ds.config),
        }),
    )
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let dataset_id = match required_str(req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let db = state.db.as_ref();
    let Some(ds) = state.datasets.iter_mut().find(|d| d.id == dataset_id) else {
        return crate::ipc::error::err(
            &req.id,
            "not_found",
            "dataset not found",
            Some(json!({ "datasetId": dataset_id })),
        );
    };

    let mut updated = ds.clone();
    if let Err(e) = apply_config_params(&updated.subject_schema, &mut updated.config, &req.params) {
        return calc_err(&req.id, e);
    }
    if let Err(e) = persist(db, &updated, req) {
        return e;
    }
    info!(dataset = %updated.id, "config updated");
    *ds = updated;
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "config": config_json(&ds.config),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
