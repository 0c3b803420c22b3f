use crate::calc::{self, GroupFilter};
use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};
use crate::model::Dataset;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()))
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a string", key), None)),
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing or non-numeric {}", key), None))
}

pub fn parse_filter(req: &Request) -> Result<GroupFilter, serde_json::Value> {
    calc::parse_group_filter(req.params.get("filter")).map_err(|e| calc_err(&req.id, e))
}

pub fn dataset<'a>(state: &'a AppState, req: &Request, key: &str) -> Result<&'a Dataset, serde_json::Value> {
    let id = required_str(req, key)?;
    state.dataset(&id).ok_or_else(|| {
        err(
            &req.id,
            "not_found",
            "dataset not found",
            Some(serde_json::json!({ "datasetId": id })),
        )
    })
}

/// Writes a dataset through to the workspace store when one is open.
pub fn persist(
    db: Option<&rusqlite::Connection>,
    dataset: &Dataset,
    req: &Request,
) -> Result<(), serde_json::Value> {
    let Some(conn) = db else {
        return Ok(());
    };
    crate::db::dataset_put(conn, dataset).map_err(|e| {
        tracing::warn!(error = ?e, dataset = %dataset.id, "persisting dataset failed");
        err(&req.id, "db_insert_failed", format!("{e:?}"), None)
    })
}
