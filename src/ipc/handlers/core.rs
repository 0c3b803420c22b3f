use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "datasetCount": state.datasets.len()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = ?e, "workspace open failed");
            return err(&req.id, "db_open_failed", format!("{e:?}"), None);
        }
    };
    let stored = match db::dataset_list(&conn) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = ?e, "loading stored datasets failed");
            return err(&req.id, "db_query_failed", format!("{e:?}"), None);
        }
    };

    // Only datasets imported before any workspace was open are memory-only.
    // Those are written through; a previous workspace's datasets stay in its store.
    if state.db.is_some() {
        state.datasets.clear();
    }
    for d in &state.datasets {
        if stored.iter().any(|s| s.id == d.id) {
            continue;
        }
        if let Err(e) = db::dataset_put(&conn, d) {
            warn!(error = ?e, dataset = %d.id, "persisting in-memory dataset failed");
            return err(&req.id, "db_insert_failed", format!("{e:?}"), None);
        }
    }
    let mut merged = stored;
    for d in state.datasets.drain(..) {
        if !merged.iter().any(|s| s.id == d.id) {
            merged.push(d);
        }
    }

    info!(path = %path.display(), datasets = merged.len(), "workspace selected");
    state.datasets = merged;
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "datasetCount": state.datasets.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
