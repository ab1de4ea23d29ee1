use crate::db;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, parse_date_field, resolve_today, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{
    check_unique_categories, classify, installment_views, recompute, FeeCategory, FeeItem,
    LedgerTotals, StudentLedger,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

pub(crate) fn totals_json(totals: &LedgerTotals) -> serde_json::Value {
    json!({
        "totalAmount": totals.total_amount,
        "totalPaid": totals.total_paid,
        "discount": totals.discount,
        "balance": totals.balance,
        "status": totals.status.as_str(),
    })
}

fn fee_item_json(item: &FeeItem, today: NaiveDate) -> serde_json::Value {
    json!({
        "category": item.category.as_str(),
        "label": item.label,
        "amount": item.amount,
        "paid": item.paid,
        "remaining": item.remaining(),
        "dueDate": item.due_date.format("%Y-%m-%d").to_string(),
        // Always the fresh classification, never the stored cache.
        "status": item.classify(today).as_str(),
        "lastPaymentDate": item.last_payment_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "receiptRef": item.receipt_ref,
    })
}

/// Full read model for one ledger. Every derived field is recomputed here.
pub(crate) fn read_model(ledger: &StudentLedger, today: NaiveDate) -> serde_json::Value {
    let totals = recompute(ledger, today);
    let fees: Vec<serde_json::Value> = ledger
        .fees
        .iter()
        .map(|item| fee_item_json(item, today))
        .collect();
    let concessions: Vec<serde_json::Value> = ledger
        .concessions
        .iter()
        .map(|c| {
            json!({
                "kind": c.kind.as_str(),
                "percentage": c.percentage,
                "amount": c.amount,
                "reason": c.reason,
                "grantedOn": c.granted_on.format("%Y-%m-%d").to_string(),
            })
        })
        .collect();
    let installments: Vec<serde_json::Value> = installment_views(ledger, today)
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
    let history: Vec<serde_json::Value> = ledger
        .payment_history
        .iter()
        .map(|p| {
            json!({
                "date": p.date.format("%Y-%m-%d").to_string(),
                "amount": p.amount,
                "categories": p.categories,
                "mode": p.mode,
                "receiptRef": p.receipt_ref,
                "collector": p.collector,
            })
        })
        .collect();

    json!({
        "id": ledger.id,
        "name": ledger.name,
        "className": ledger.class_name,
        "section": ledger.section,
        "rollNo": ledger.roll_no,
        "guardianContact": ledger.guardian_contact,
        "fees": fees,
        "totals": totals_json(&totals),
        "concessions": concessions,
        "installments": installments,
        "paymentHistory": history,
    })
}

fn parse_fee_entries(params: &serde_json::Value, today: NaiveDate) -> Result<Vec<FeeItem>, HandlerErr> {
    let Some(raw) = params.get("fees").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing fees array"));
    };
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("fees must not be empty"));
    }

    let mut fees: Vec<FeeItem> = Vec::with_capacity(raw.len());
    for entry in raw {
        let category_text = entry
            .get("category")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("fee entry missing category"))?;
        let Some(category) = FeeCategory::parse(category_text) else {
            return Err(HandlerErr {
                code: "unknown_category",
                message: format!("unknown fee category: {}", category_text),
                details: Some(json!({ "category": category_text })),
            });
        };
        let amount = entry
            .get("amount")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::bad_params("fee entry missing amount"))?;
        if amount < 0 {
            return Err(HandlerErr::bad_params("fee amount must not be negative"));
        }
        let due_text = entry
            .get("dueDate")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("fee entry missing dueDate"))?;
        let due_date = parse_date_field(due_text, "dueDate")?;
        let label = entry
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| category.default_label().to_string());

        fees.push(FeeItem {
            category,
            label,
            amount,
            paid: 0,
            due_date,
            status: classify(amount, 0, due_date, today),
            last_payment_date: None,
            receipt_ref: None,
        });
    }
    check_unique_categories(&fees)?;
    Ok(fees)
}

fn ledgers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let Some(student) = params.get("student") else {
        return Err(HandlerErr::bad_params("missing student"));
    };
    let name = get_required_str(student, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("student name must not be empty"));
    }
    let class_name = get_required_str(student, "className")?;
    let section = get_opt_str(student, "section").unwrap_or_default();
    let roll_no = get_opt_str(student, "rollNo").unwrap_or_default();
    let guardian_contact = get_opt_str(student, "guardianContact").unwrap_or_default();

    let fees = parse_fee_entries(params, today)?;

    let ledger = StudentLedger {
        id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        class_name,
        section,
        roll_no,
        guardian_contact,
        fees,
        discount: 0,
        concessions: Vec::new(),
        installments: Vec::new(),
        payment_history: Vec::new(),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    db::insert_ledger(&tx, &ledger).map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "ledgers" })),
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let totals = recompute(&ledger, today);
    Ok(json!({
        "ledgerId": ledger.id,
        "totals": totals_json(&totals),
    }))
}

fn ledgers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let class_filter = get_opt_str(params, "className");
    let search = get_opt_str(params, "search").map(|s| s.to_lowercase());

    let ledgers = db::load_all_ledgers(conn).map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = ledgers
        .iter()
        .filter(|l| {
            class_filter
                .as_ref()
                .map(|c| l.class_name == *c)
                .unwrap_or(true)
        })
        .filter(|l| {
            search
                .as_ref()
                .map(|q| l.name.to_lowercase().contains(q) || l.id.to_lowercase().contains(q))
                .unwrap_or(true)
        })
        .map(|l| {
            let totals = recompute(l, today);
            json!({
                "id": l.id,
                "name": l.name,
                "className": l.class_name,
                "section": l.section,
                "rollNo": l.roll_no,
                "totals": totals_json(&totals),
            })
        })
        .collect();

    Ok(json!({ "ledgers": rows }))
}

fn ledgers_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let ledger_id = get_required_str(params, "ledgerId")?;
    let ledger = db::load_ledger(conn, &ledger_id)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("ledger not found"))?;
    Ok(read_model(&ledger, today))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ledgers.create" => Some(with_db(state, req, ledgers_create)),
        "ledgers.list" => Some(with_db(state, req, ledgers_list)),
        "ledgers.open" => Some(with_db(state, req, ledgers_open)),
        _ => None,
    }
}
