use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::handlers::acting_user;
use crate::models::{TransactionKind, WalletTransaction};
use crate::services::ledger::{self, LedgerAudit, LedgerOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FundRequest {
    pub amount: Decimal,
    /// Top-up reference from the funding source.
    pub reference: Option<String>,
}

// POST /api/wallet/fund
pub async fn fund_wallet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<FundRequest>,
) -> AppResult<Json<LedgerOutcome>> {
    let user_id = acting_user(&headers)?;
    let reference = body
        .reference
        .unwrap_or_else(|| format!("fund-{}", uuid::Uuid::new_v4()));

    let mut db = state.conn()?;
    let outcome = ledger::apply_transaction(
        &mut db,
        state.notifier.as_ref(),
        &user_id,
        TransactionKind::Credit,
        body.amount,
        "Wallet funding",
        &reference,
    )?;
    Ok(Json(outcome))
}

// GET /api/wallet/transactions
pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<WalletTransaction>>> {
    let user_id = acting_user(&headers)?;
    let db = state.conn()?;
    Ok(Json(ledger::history(&db, &user_id)?))
}

// GET /api/wallet/audit
pub async fn get_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<LedgerAudit>> {
    let user_id = acting_user(&headers)?;
    let db = state.conn()?;
    Ok(Json(ledger::audit(&db, &user_id)?))
}
