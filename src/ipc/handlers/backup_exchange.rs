use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::ledger::{check_unique_categories, StudentLedger};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }
    if let Err(e) = std::fs::create_dir_all(&workspace_path) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": workspace_path.to_string_lossy() })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

fn handle_exchange_export_ledgers_json(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };

    let ledgers = match db::load_all_ledgers(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let text = match serde_json::to_string_pretty(&ledgers) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
    };

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, text) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    ok(
        &req.id,
        json!({ "ok": true, "exported": ledgers.len(), "path": out_path }),
    )
}

fn validate_imported_ledger(ledger: &StudentLedger, idx: usize) -> Result<(), HandlerErr> {
    let detail = |field: &str| Some(json!({ "record": idx, "field": field }));
    if ledger.id.trim().is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "ledger record missing id".to_string(),
            details: detail("id"),
        });
    }
    if ledger.name.trim().is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "ledger record missing name".to_string(),
            details: detail("name"),
        });
    }
    if ledger.discount < 0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "discount must not be negative".to_string(),
            details: detail("discount"),
        });
    }
    check_unique_categories(&ledger.fees)?;
    for item in &ledger.fees {
        if item.amount < 0 {
            return Err(HandlerErr {
                code: "bad_params",
                message: "fee amount must not be negative".to_string(),
                details: detail("fees.amount"),
            });
        }
        if item.paid < 0 || item.paid > item.amount {
            return Err(HandlerErr {
                code: "bad_params",
                message: "paid must stay within 0..=amount".to_string(),
                details: detail("fees.paid"),
            });
        }
    }
    for inst in &ledger.installments {
        if inst.amount <= 0 {
            return Err(HandlerErr {
                code: "bad_params",
                message: "installment amount must be positive".to_string(),
                details: detail("installments.amount"),
            });
        }
    }
    Ok(())
}

/// Replace the whole ledger store with the snapshot file. Every record is
/// validated before the first row is touched; any failure leaves the store
/// as it was.
fn handle_exchange_import_ledgers_json(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };

    let text = match std::fs::read_to_string(&in_path) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            )
        }
    };
    let ledgers: Vec<StudentLedger> = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("snapshot is not a ledger array: {}", e),
                Some(json!({ "path": in_path })),
            )
        }
    };
    for (idx, ledger) in ledgers.iter().enumerate() {
        if let Err(e) = validate_imported_ledger(ledger, idx) {
            return e.response(&req.id);
        }
    }
    let mut seen_ids: Vec<&str> = ledgers.iter().map(|l| l.id.as_str()).collect();
    seen_ids.sort_unstable();
    if seen_ids.windows(2).any(|w| w[0] == w[1]) {
        return err(&req.id, "bad_params", "duplicate ledger id in snapshot", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for table in ["payments", "concessions", "installments", "fee_items", "ledgers"] {
        if let Err(e) = tx.execute(&format!("DELETE FROM {}", table), []) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    for ledger in &ledgers {
        if let Err(e) = db::insert_ledger(&tx, ledger) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "ledgerId": ledger.id })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "ok": true, "imported": ledgers.len(), "path": in_path }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        "exchange.exportLedgersJson" => Some(handle_exchange_export_ledgers_json(state, req)),
        "exchange.importLedgersJson" => Some(handle_exchange_import_ledgers_json(state, req)),
        _ => None,
    }
}
