use crate::db;
use crate::ipc::handlers::ledgers::totals_json;
use crate::ipc::helpers::{resolve_today, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{find_reminder_candidates, recompute, FeeStatus};
use rusqlite::Connection;
use serde_json::json;

const DEFAULT_WINDOW_DAYS: i64 = 7;

fn resolve_window_days(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<i64, HandlerErr> {
    if let Some(v) = params.get("windowDays") {
        let Some(days) = v.as_i64().filter(|d| *d >= 0) else {
            return Err(HandlerErr::bad_params(
                "windowDays must be a non-negative integer",
            ));
        };
        return Ok(days);
    }
    let configured = db::settings_get_json(conn, "setup.reminders")
        .map_err(HandlerErr::db)?
        .and_then(|v| v.get("windowDays").and_then(|d| d.as_i64()))
        .filter(|d| *d >= 0);
    Ok(configured.unwrap_or(DEFAULT_WINDOW_DAYS))
}

fn fees_reminder_candidates(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let window_days = resolve_window_days(conn, params)?;

    let ledgers = db::load_all_ledgers(conn).map_err(HandlerErr::db)?;
    let candidates: Vec<serde_json::Value> = find_reminder_candidates(&ledgers, today, window_days)
        .into_iter()
        .map(|ledger| {
            let totals = recompute(ledger, today);
            let due_items: Vec<serde_json::Value> = ledger
                .fees
                .iter()
                .filter(|item| {
                    if item.classify(today) == FeeStatus::Paid {
                        return false;
                    }
                    let days_until_due = (item.due_date - today).num_days();
                    (0..=window_days).contains(&days_until_due) || days_until_due < 0
                })
                .map(|item| {
                    json!({
                        "category": item.category.as_str(),
                        "label": item.label,
                        "remaining": item.remaining(),
                        "dueDate": item.due_date.format("%Y-%m-%d").to_string(),
                        "status": item.classify(today).as_str(),
                    })
                })
                .collect();
            json!({
                "id": ledger.id,
                "name": ledger.name,
                "className": ledger.class_name,
                "section": ledger.section,
                "guardianContact": ledger.guardian_contact,
                "totals": totals_json(&totals),
                "dueItems": due_items,
            })
        })
        .collect();

    Ok(json!({
        "windowDays": window_days,
        "candidates": candidates,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.reminderCandidates" => Some(with_db(state, req, fees_reminder_candidates)),
        _ => None,
    }
}
