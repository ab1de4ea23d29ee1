use crate::db;
use crate::ipc::helpers::{get_opt_str, resolve_today, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{recompute, FeeCategory, FeeStatus, Money};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Default)]
struct CategoryTally {
    billed: Money,
    collected: Money,
}

/// Collection dashboard numbers across the whole workspace, optionally
/// restricted to one class.
fn fees_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = resolve_today(params)?;
    let class_filter = get_opt_str(params, "className");

    let ledgers = db::load_all_ledgers(conn).map_err(HandlerErr::db)?;
    let scoped: Vec<_> = ledgers
        .iter()
        .filter(|l| {
            class_filter
                .as_ref()
                .map(|c| l.class_name == *c)
                .unwrap_or(true)
        })
        .collect();

    let mut total_billed: Money = 0;
    let mut total_collected: Money = 0;
    let mut total_discount: Money = 0;
    let mut pending_amount: Money = 0;
    let mut overdue_count: usize = 0;
    let mut fully_paid_count: usize = 0;
    let mut by_category: BTreeMap<FeeCategory, CategoryTally> = BTreeMap::new();

    for ledger in &scoped {
        let totals = recompute(ledger, today);
        total_billed += totals.total_amount;
        total_collected += totals.total_paid;
        total_discount += totals.discount;
        pending_amount += totals.balance;
        match totals.status {
            FeeStatus::Overdue => overdue_count += 1,
            FeeStatus::Paid => fully_paid_count += 1,
            _ => {}
        }
        for item in &ledger.fees {
            let tally = by_category.entry(item.category).or_default();
            tally.billed += item.amount;
            tally.collected += item.paid;
        }
    }

    let categories: Vec<serde_json::Value> = by_category
        .iter()
        .map(|(category, tally)| {
            json!({
                "category": category.as_str(),
                "label": category.default_label(),
                "billed": tally.billed,
                "collected": tally.collected,
                "pending": tally.billed - tally.collected,
            })
        })
        .collect();

    Ok(json!({
        "totalStudents": scoped.len(),
        "totalBilled": total_billed,
        "totalCollected": total_collected,
        "totalDiscount": total_discount,
        "pendingAmount": pending_amount,
        "overdueCount": overdue_count,
        "fullyPaidCount": fully_paid_count,
        "categories": categories,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.summary" => Some(with_db(state, req, fees_summary)),
        _ => None,
    }
}
