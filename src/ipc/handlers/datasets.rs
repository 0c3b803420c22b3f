use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::handlers::config::apply_config_params;
use crate::ipc::helpers::{dataset, optional_str, persist, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Dataset, ExamConfig};
use crate::normalize::{normalize_grid, Grid};
use crate::rank::apply_ranks;
use serde_json::json;
use tracing::{info, warn};

fn handle_dataset_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw_grid) = req.params.get("grid") else {
        return err(&req.id, "bad_params", "missing grid", None);
    };
    let grid: Grid = match serde_json::from_value(raw_grid.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("grid must be an array of rows of cells: {}", e),
                None,
            )
        }
    };
    let name = match optional_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut normalized = match normalize_grid(&grid) {
        Ok(v) => v,
        Err(e) => {
            info!(code = %e.code, "import rejected: {}", e.message);
            return calc_err(&req.id, e);
        }
    };
    apply_ranks(&mut normalized.records, &normalized.subject_schema);

    let mut config = ExamConfig::derive_defaults(&normalized.subject_schema, &normalized.records);
    if let Some(raw) = req.params.get("config") {
        if let Err(e) = apply_config_params(&normalized.subject_schema, &mut config, raw) {
            return calc_err(&req.id, e);
        }
    }

    let now = chrono::Utc::now();
    let dataset = Dataset {
        id: uuid::Uuid::new_v4().to_string(),
        name: name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Exam {}", now.format("%Y-%m-%d %H:%M"))),
        imported_at: now.to_rfc3339(),
        subject_schema: normalized.subject_schema,
        config,
        records: normalized.records,
    };
    if let Err(e) = persist(state.db.as_ref(), &dataset, req) {
        return e;
    }
    info!(
        dataset = %dataset.id,
        records = dataset.records.len(),
        subjects = dataset.subject_schema.subject_count(),
        dropped = normalized.dropped_rows,
        "dataset imported"
    );

    let result = json!({
        "datasetId": dataset.id,
        "name": dataset.name,
        "importedAt": dataset.imported_at,
        "subjectSchema": dataset.subject_schema,
        "recordCount": dataset.records.len(),
        "droppedRows": normalized.dropped_rows,
        "duplicateIds": normalized.duplicate_ids,
        "config": dataset.config,
        "records": dataset.records,
    });
    state.datasets.push(dataset);
    ok(&req.id, result)
}

fn handle_dataset_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let datasets: Vec<serde_json::Value> = state
        .datasets
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "name": d.name,
                "importedAt": d.imported_at,
                "recordCount": d.records.len(),
                "subjectSchema": d.subject_schema,
            })
        })
        .collect();
    ok(&req.id, json!({ "datasets": datasets }))
}

fn handle_dataset_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ds = match dataset(state, req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "datasetId": ds.id,
            "name": ds.name,
            "importedAt": ds.imported_at,
            "subjectSchema": ds.subject_schema,
            "config": ds.config,
            "records": ds.records,
        }),
    )
}

fn handle_dataset_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(pos) = state.datasets.iter().position(|d| d.id == id) else {
        return err(
            &req.id,
            "not_found",
            "dataset not found",
            Some(json!({ "datasetId": id })),
        );
    };
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = crate::db::dataset_delete(conn, &id) {
            warn!(error = ?e, dataset = %id, "deleting stored dataset failed");
            return err(&req.id, "db_delete_failed", format!("{e:?}"), None);
        }
    }
    state.datasets.remove(pos);
    ok(&req.id, json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dataset.import" => Some(handle_dataset_import(state, req)),
        "dataset.list" => Some(handle_dataset_list(state, req)),
        "dataset.open" => Some(handle_dataset_open(state, req)),
        "dataset.delete" => Some(handle_dataset_delete(state, req)),
        _ => None,
    }
}
