use crate::db;
use crate::ipc::handlers::ledgers::totals_json;
use crate::ipc::helpers::{get_required_str, resolve_today, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{apply_payment, recompute, FeeCategory, Money};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

fn parse_selections(params: &serde_json::Value) -> Result<BTreeMap<FeeCategory, Money>, HandlerErr> {
    let Some(raw) = params.get("selections").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing selections"));
    };
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("selections must not be empty"));
    }
    let mut selections = BTreeMap::new();
    for (key, value) in raw {
        let Some(category) = FeeCategory::parse(key) else {
            return Err(HandlerErr {
                code: "unknown_category",
                message: format!("unknown fee category: {}", key),
                details: Some(json!({ "category": key })),
            });
        };
        let Some(amount) = value.as_i64() else {
            return Err(HandlerErr::bad_params(format!(
                "selection for {} must be an integer amount",
                key
            )));
        };
        if selections.insert(category, amount).is_some() {
            return Err(HandlerErr::bad_params(format!(
                "selection for {} given twice",
                key
            )));
        }
    }
    Ok(selections)
}

/// Apply a collection transaction: validate everything in memory through the
/// engine, then persist items, totals source data, and the history entry in
/// one SQLite transaction.
fn fees_collect(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let ledger_id = get_required_str(params, "ledgerId")?;
    let mode = get_required_str(params, "mode")?;
    let collector = get_required_str(params, "collector")?;
    let selections = parse_selections(params)?;

    let mut ledger = db::load_ledger(conn, &ledger_id)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("ledger not found"))?;

    let receipt_ref = Uuid::new_v4().to_string();
    let record = apply_payment(
        &mut ledger,
        &selections,
        &mode,
        &collector,
        today,
        &receipt_ref,
    )?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (&category, _) in &selections {
        // Engine already applied the amounts; write the item back as-is.
        let item = ledger
            .fee(category)
            .ok_or_else(|| HandlerErr::new("db_update_failed", "selected item vanished"))?;
        tx.execute(
            "UPDATE fee_items
             SET paid = ?, status = ?, last_payment_date = ?, receipt_ref = ?
             WHERE ledger_id = ? AND category = ?",
            (
                item.paid,
                item.classify(today).as_str(),
                today.format("%Y-%m-%d").to_string(),
                &receipt_ref,
                &ledger_id,
                category.as_str(),
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "fee_items" })),
        })?;
    }
    let seq = db::next_payment_seq(&tx, &ledger_id).map_err(HandlerErr::db)?;
    tx.execute(
        "INSERT INTO payments(id, ledger_id, seq, date, amount, categories, mode, receipt_ref, collector)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &ledger_id,
            seq,
            record.date.format("%Y-%m-%d").to_string(),
            record.amount,
            serde_json::to_string(&record.categories)
                .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?,
            &record.mode,
            &record.receipt_ref,
            &record.collector,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let totals = recompute(&ledger, today);
    Ok(json!({
        "receiptRef": receipt_ref,
        "amount": record.amount,
        "categories": record.categories,
        "totals": totals_json(&totals),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.collect" => Some(with_db(state, req, fees_collect)),
        _ => None,
    }
}
