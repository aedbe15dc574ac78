use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::errors::AppResult;
use crate::state::AppState;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let db = state.conn()?;
    let version: String = db.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
    Ok(Json(serde_json::json!({ "status": "ok", "sqlite": version })))
}
