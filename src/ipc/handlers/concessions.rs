use crate::db;
use crate::ipc::handlers::ledgers::totals_json;
use crate::ipc::helpers::{
    get_required_str, parse_date_field, resolve_today, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{apply_discount, installment_views, recompute, ConcessionKind, Installment};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn fees_apply_concession(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let ledger_id = get_required_str(params, "ledgerId")?;
    let kind_text = get_required_str(params, "kind")?;
    let Some(kind) = ConcessionKind::parse(&kind_text) else {
        return Err(HandlerErr::bad_params(
            "kind must be 'percentage' or 'fixed'",
        ));
    };
    let value = params
        .get("value")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing value"))?;
    let reason = get_required_str(params, "reason")?;

    let mut ledger = db::load_ledger(conn, &ledger_id)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("ledger not found"))?;

    let applied = apply_discount(&mut ledger, kind, value, &reason, today)?;
    let granted = ledger
        .concessions
        .last()
        .cloned()
        .ok_or_else(|| HandlerErr::new("db_update_failed", "concession not recorded"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE ledgers SET discount = ? WHERE id = ?",
        (ledger.discount, &ledger_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "ledgers" })),
    })?;
    let seq = db::next_concession_seq(&tx, &ledger_id).map_err(HandlerErr::db)?;
    tx.execute(
        "INSERT INTO concessions(id, ledger_id, seq, kind, percentage, amount, reason, granted_on)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &ledger_id,
            seq,
            granted.kind.as_str(),
            granted.percentage,
            granted.amount,
            &granted.reason,
            granted.granted_on.format("%Y-%m-%d").to_string(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "concessions" })),
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let totals = recompute(&ledger, today);
    Ok(json!({
        "appliedAmount": applied,
        "discount": ledger.discount,
        "totals": totals_json(&totals),
    }))
}

fn fees_set_installment_plan(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let ledger_id = get_required_str(params, "ledgerId")?;
    let Some(raw) = params.get("installments").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing installments array"));
    };
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("installments must not be empty"));
    }

    let mut plan: Vec<Installment> = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let amount = entry
            .get("amount")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::bad_params("installment missing amount"))?;
        if amount <= 0 {
            return Err(HandlerErr::bad_params("installment amount must be positive"));
        }
        let due_text = entry
            .get("dueDate")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("installment missing dueDate"))?;
        plan.push(Installment {
            index: (i + 1) as i64,
            amount,
            due_date: parse_date_field(due_text, "dueDate")?,
        });
    }

    let mut ledger = db::load_ledger(conn, &ledger_id)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("ledger not found"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM installments WHERE ledger_id = ?", [&ledger_id])
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "installments" })),
        })?;
    for inst in &plan {
        tx.execute(
            "INSERT INTO installments(ledger_id, idx, amount, due_date) VALUES(?, ?, ?, ?)",
            (
                &ledger_id,
                inst.index,
                inst.amount,
                inst.due_date.format("%Y-%m-%d").to_string(),
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "installments" })),
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    ledger.installments = plan;
    let views: Vec<serde_json::Value> = installment_views(&ledger, today)
        .iter()
        .map(|v| {
            json!({
                "index": v.index,
                "amount": v.amount,
                "dueDate": v.due_date.format("%Y-%m-%d").to_string(),
                "paidAmount": v.paid_amount,
                "status": v.status.as_str(),
            })
        })
        .collect();
    Ok(json!({ "installments": views }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.applyConcession" => Some(with_db(state, req, fees_apply_concession)),
        "fees.setInstallmentPlan" => Some(with_db(state, req, fees_set_installment_plan)),
        _ => None,
    }
}
