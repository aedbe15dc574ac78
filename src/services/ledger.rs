use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::{TransactionKind, WalletTransaction};
use crate::services::notifications::{dispatch, Notification, NotificationKind, NotificationSink};

#[derive(Debug, Clone, Serialize)]
pub struct LedgerOutcome {
    pub transaction: WalletTransaction,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerAudit {
    pub user_id: String,
    pub stored_balance: Decimal,
    pub replayed_balance: Decimal,
    pub transactions: usize,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.replayed_balance
    }
}

pub fn parse_kind(s: &str) -> AppResult<TransactionKind> {
    TransactionKind::parse(s)
        .ok_or_else(|| AppError::Validation(format!("transaction type must be credit or debit, got {s:?}")))
}

/// Applies one balance mutation inside the caller's transaction.
///
/// The caller must hold an `IMMEDIATE` transaction (see [`db::atomic`]) so
/// the balance read here cannot go stale before the write.
pub fn apply_in(
    conn: &Connection,
    user_id: &str,
    kind: TransactionKind,
    amount: Decimal,
    description: &str,
    reference: &str,
) -> AppResult<LedgerOutcome> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(format!("amount must be positive, got {amount}")));
    }

    let balance_before = queries::get_wallet_balance(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

    if kind == TransactionKind::Debit && balance_before < amount {
        return Err(AppError::InsufficientFunds {
            balance: balance_before,
            requested: amount,
        });
    }

    let balance_after = kind.apply(balance_before, amount).ok_or_else(|| {
        AppError::Validation(format!(
            "{} of {amount} overflows balance {balance_before}",
            kind.as_str()
        ))
    })?;
    debug_assert!(balance_after >= Decimal::ZERO);

    let now = Utc::now().naive_utc();
    let transaction = WalletTransaction {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        kind,
        amount,
        description: description.to_string(),
        reference: reference.to_string(),
        balance_before,
        balance_after,
        created_at: now,
    };

    queries::set_wallet_balance(conn, user_id, balance_after, &now)?;
    queries::insert_wallet_transaction(conn, &transaction)?;

    tracing::info!(
        user_id,
        kind = kind.as_str(),
        amount = %amount,
        balance_before = %balance_before,
        balance_after = %balance_after,
        reference,
        "wallet transaction applied"
    );

    Ok(LedgerOutcome {
        transaction,
        new_balance: balance_after,
    })
}

/// Standalone entry point: one mutation in its own atomic unit.
pub fn apply_transaction(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    user_id: &str,
    kind: TransactionKind,
    amount: Decimal,
    description: &str,
    reference: &str,
) -> AppResult<LedgerOutcome> {
    let outcome = db::atomic(conn, |tx| {
        apply_in(tx, user_id, kind, amount, description, reference)
    })?;

    let title = match kind {
        TransactionKind::Credit => "Wallet credited",
        TransactionKind::Debit => "Wallet debited",
    };
    dispatch(
        notifier,
        user_id,
        Notification::new(
            NotificationKind::Wallet,
            title,
            format!("{description}: {amount}"),
            serde_json::json!({
                "transaction_id": outcome.transaction.id,
                "amount": amount.to_string(),
                "balance": outcome.new_balance.to_string(),
            }),
        ),
    );

    Ok(outcome)
}

pub fn history(conn: &Connection, user_id: &str) -> AppResult<Vec<WalletTransaction>> {
    if queries::get_user(conn, user_id)?.is_none() {
        return Err(AppError::NotFound(format!("user {user_id}")));
    }
    Ok(queries::list_wallet_transactions(conn, user_id)?)
}

fn fold_ledger(rows: &[WalletTransaction]) -> AppResult<Decimal> {
    rows.iter()
        .try_fold(Decimal::ZERO, |balance, row| row.kind.apply(balance, row.amount))
        .ok_or_else(|| AppError::Database(anyhow::anyhow!("ledger replay overflowed")))
}

/// Folds a user's ledger, oldest first, starting from zero.
pub fn replay_balance(conn: &Connection, user_id: &str) -> AppResult<Decimal> {
    let rows = queries::list_wallet_transactions(conn, user_id)?;
    fold_ledger(&rows)
}

pub fn audit(conn: &Connection, user_id: &str) -> AppResult<LedgerAudit> {
    let user = queries::get_user(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
    let rows = queries::list_wallet_transactions(conn, user_id)?;
    let replayed = fold_ledger(&rows)?;

    let audit = LedgerAudit {
        user_id: user_id.to_string(),
        stored_balance: user.wallet_balance,
        replayed_balance: replayed,
        transactions: rows.len(),
    };
    if !audit.is_consistent() {
        tracing::error!(
            user_id,
            stored = %audit.stored_balance,
            replayed = %audit.replayed_balance,
            "wallet balance does not match ledger"
        );
    }
    Ok(audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::notifications::BroadcastNotifier;

    fn setup_db() -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        queries::create_user(&conn, "u1", "Ada", "ada@example.com", Role::Customer).unwrap();
        conn
    }

    fn naira(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn test_credit_then_debit() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);

        let credit = apply_transaction(
            &mut conn, &notifier, "u1", TransactionKind::Credit, naira(50000), "Wallet funding", "fund-1",
        )
        .unwrap();
        assert_eq!(credit.new_balance, naira(50000));
        assert_eq!(credit.transaction.balance_before, naira(0));

        let debit = apply_transaction(
            &mut conn, &notifier, "u1", TransactionKind::Debit, naira(12500), "Payment", "b-1",
        )
        .unwrap();
        assert_eq!(debit.transaction.balance_before, naira(50000));
        assert_eq!(debit.transaction.balance_after, naira(37500));
        assert_eq!(
            queries::get_user(&conn, "u1").unwrap().unwrap().wallet_balance,
            naira(37500)
        );
    }

    #[test]
    fn test_overdraw_rejected_and_balance_unchanged() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);
        apply_transaction(&mut conn, &notifier, "u1", TransactionKind::Credit, naira(5000), "fund", "f").unwrap();

        let err = apply_transaction(
            &mut conn, &notifier, "u1", TransactionKind::Debit, naira(12500), "Payment", "b-1",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));

        assert_eq!(
            queries::get_user(&conn, "u1").unwrap().unwrap().wallet_balance,
            naira(5000)
        );
        assert_eq!(queries::list_wallet_transactions(&conn, "u1").unwrap().len(), 1);
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);
        for amount in [naira(0), naira(-10)] {
            let err = apply_transaction(
                &mut conn, &notifier, "u1", TransactionKind::Credit, amount, "fund", "f",
            )
            .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(queries::list_wallet_transactions(&conn, "u1").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_user() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);
        let err = apply_transaction(
            &mut conn, &notifier, "ghost", TransactionKind::Credit, naira(1), "fund", "f",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_parse_kind_is_exact() {
        assert_eq!(parse_kind("debit").unwrap(), TransactionKind::Debit);
        assert!(matches!(parse_kind("Debit"), Err(AppError::Validation(_))));
        assert!(matches!(parse_kind("refund"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_balance_never_negative_and_ledger_replays() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);
        let ops = [
            (TransactionKind::Credit, 300),
            (TransactionKind::Debit, 120),
            (TransactionKind::Debit, 500),
            (TransactionKind::Debit, 180),
            (TransactionKind::Debit, 1),
            (TransactionKind::Credit, 75),
            (TransactionKind::Debit, 75),
        ];

        for (i, (kind, amount)) in ops.iter().enumerate() {
            let _ = apply_transaction(
                &mut conn, &notifier, "u1", *kind, naira(*amount), "op", &format!("op-{i}"),
            );
            let balance = queries::get_user(&conn, "u1").unwrap().unwrap().wallet_balance;
            assert!(balance >= Decimal::ZERO);
        }

        let audit = audit(&conn, "u1").unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.stored_balance, naira(0));
        assert_eq!(audit.transactions, 5);
        assert_eq!(replay_balance(&conn, "u1").unwrap(), naira(0));

        let rows = history(&conn, "u1").unwrap();
        for pair in rows.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }

    #[test]
    fn test_fractional_amounts_do_not_drift() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);
        for i in 0..100 {
            apply_transaction(
                &mut conn, &notifier, "u1", TransactionKind::Credit, Decimal::new(1, 2), "tip", &format!("t{i}"),
            )
            .unwrap();
        }
        assert_eq!(
            queries::get_user(&conn, "u1").unwrap().unwrap().wallet_balance,
            Decimal::ONE
        );
    }

    #[test]
    fn test_credit_overflow_rejected_without_panic() {
        let mut conn = setup_db();
        let notifier = BroadcastNotifier::new(8);
        apply_transaction(&mut conn, &notifier, "u1", TransactionKind::Credit, Decimal::MAX, "fund", "f1")
            .unwrap();

        let err = apply_transaction(&mut conn, &notifier, "u1", TransactionKind::Credit, naira(1), "fund", "f2")
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(
            queries::get_user(&conn, "u1").unwrap().unwrap().wallet_balance,
            Decimal::MAX
        );
        assert_eq!(queries::list_wallet_transactions(&conn, "u1").unwrap().len(), 1);
        assert!(audit(&conn, "u1").unwrap().is_consistent());
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap().to_string();

        let mut conn = db::init_db(&path).unwrap();
        queries::create_user(&conn, "u1", "Ada", "ada@example.com", Role::Customer).unwrap();
        let notifier = BroadcastNotifier::new(8);
        apply_transaction(&mut conn, &notifier, "u1", TransactionKind::Credit, naira(5000), "fund", "f").unwrap();

        let workers: Vec<_> = (0..10)
            .map(|i| {
                let mut conn = db::init_db(&path).unwrap();
                std::thread::spawn(move || {
                    let notifier = BroadcastNotifier::new(1);
                    apply_transaction(
                        &mut conn, &notifier, "u1", TransactionKind::Debit, naira(1000), "debit", &format!("d{i}"),
                    )
                })
            })
            .collect();

        let results: Vec<_> = workers.into_iter().map(|h| h.join().unwrap()).collect();
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 5);
        assert!(results.iter().all(|r| match r {
            Ok(_) => true,
            Err(e) => matches!(e, AppError::InsufficientFunds { .. }),
        }));

        let audit = audit(&conn, "u1").unwrap();
        assert_eq!(audit.stored_balance, naira(0));
        assert!(audit.is_consistent());
    }
}
