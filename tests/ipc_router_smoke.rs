use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bursard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bursard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("bursard-router-smoke");
    let bundle_out = workspace.join("smoke-backup.bzbundle.zip");
    let json_out = workspace.join("smoke-ledgers.json");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "ledgers.create",
        json!({
            "today": "2026-04-01",
            "student": { "name": "Smoke Student", "className": "Class 6" },
            "fees": [
                { "category": "tuition", "amount": 5000, "dueDate": "2026-04-10" },
                { "category": "transport", "amount": 1200, "dueDate": "2026-04-10" }
            ]
        }),
    );
    let ledger_id = created
        .get("result")
        .and_then(|v| v.get("ledgerId"))
        .and_then(|v| v.as_str())
        .expect("ledgerId")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "4", "ledgers.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "ledgers.open",
        json!({ "ledgerId": ledger_id, "today": "2026-04-01" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "fees.collect",
        json!({
            "ledgerId": ledger_id,
            "today": "2026-04-02",
            "mode": "cash",
            "collector": "Front Office",
            "selections": { "tuition": 1000 }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "fees.applyConcession",
        json!({
            "ledgerId": ledger_id,
            "today": "2026-04-02",
            "kind": "fixed",
            "value": 200.0,
            "reason": "sibling concession"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "fees.setInstallmentPlan",
        json!({
            "ledgerId": ledger_id,
            "today": "2026-04-02",
            "installments": [
                { "amount": 3000, "dueDate": "2026-04-10" },
                { "amount": 3200, "dueDate": "2026-05-10" }
            ]
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "fees.reminderCandidates",
        json!({ "today": "2026-04-08" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "fees.summary",
        json!({ "today": "2026-04-08" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "roles.menu",
        json!({ "role": "admin" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "exchange.exportLedgersJson",
        json!({ "outPath": json_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "exchange.importLedgersJson",
        json!({ "inPath": json_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
