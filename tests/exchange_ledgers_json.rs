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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn result(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response, got {}",
        resp
    );
    resp.get("result").expect("result")
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response, got {}",
        resp
    );
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

#[test]
fn snapshot_roundtrip_restores_the_exported_state() {
    let workspace = temp_dir("bursard-exchange");
    let snapshot = workspace.join("ledgers.json");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "create",
        "ledgers.create",
        json!({
            "today": "2026-04-01",
            "student": { "name": "Neha Gupta", "className": "Class 5" },
            "fees": [
                { "category": "tuition", "amount": 3000, "dueDate": "2026-04-30" },
                { "category": "library", "amount": 300, "dueDate": "2026-04-30" }
            ]
        }),
    );
    let ledger_id = result(&created)
        .get("ledgerId")
        .and_then(|v| v.as_str())
        .expect("ledgerId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "pay1",
        "fees.collect",
        json!({
            "ledgerId": ledger_id,
            "today": "2026-04-05",
            "mode": "cash",
            "collector": "Front Office",
            "selections": { "tuition": 1000 }
        }),
    );

    let exported = request(
        &mut stdin,
        &mut reader,
        "export",
        "exchange.exportLedgersJson",
        json!({ "outPath": snapshot.to_string_lossy() }),
    );
    assert_eq!(
        result(&exported).get("exported").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert!(snapshot.is_file());

    // Mutate after the snapshot, then import to roll back.
    let _ = request(
        &mut stdin,
        &mut reader,
        "pay2",
        "fees.collect",
        json!({
            "ledgerId": ledger_id,
            "today": "2026-04-06",
            "mode": "upi",
            "collector": "Front Office",
            "selections": { "tuition": 2000, "library": 300 }
        }),
    );

    let imported = request(
        &mut stdin,
        &mut reader,
        "import",
        "exchange.importLedgersJson",
        json!({ "inPath": snapshot.to_string_lossy() }),
    );
    assert_eq!(
        result(&imported).get("imported").and_then(|v| v.as_i64()),
        Some(1)
    );

    let opened = request(
        &mut stdin,
        &mut reader,
        "open",
        "ledgers.open",
        json!({ "ledgerId": ledger_id, "today": "2026-04-06" }),
    );
    let model = result(&opened);
    assert_eq!(
        model
            .get("totals")
            .and_then(|t| t.get("totalPaid"))
            .and_then(|v| v.as_i64()),
        Some(1000),
        "post-snapshot payment must be gone"
    );
    assert_eq!(
        model
            .get("paymentHistory")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_snapshot_is_rejected_without_touching_the_store() {
    let workspace = temp_dir("bursard-exchange-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "create",
        "ledgers.create",
        json!({
            "today": "2026-04-01",
            "student": { "name": "Existing Student", "className": "Class 3" },
            "fees": [
                { "category": "tuition", "amount": 2000, "dueDate": "2026-04-30" }
            ]
        }),
    );
    let existing_id = result(&created)
        .get("ledgerId")
        .and_then(|v| v.as_str())
        .expect("ledgerId")
        .to_string();

    // Second record repeats the tuition category.
    let bad = workspace.join("bad-snapshot.json");
    let bad_snapshot = json!([
        {
            "id": "l-ok",
            "name": "Fine Record",
            "className": "Class 3",
            "section": "",
            "rollNo": "",
            "guardianContact": "",
            "discount": 0,
            "fees": [
                {
                    "category": "tuition",
                    "label": "Tuition Fee",
                    "amount": 1000,
                    "paid": 0,
                    "dueDate": "2026-04-30",
                    "status": "pending"
                }
            ]
        },
        {
            "id": "l-dup",
            "name": "Broken Record",
            "className": "Class 3",
            "section": "",
            "rollNo": "",
            "guardianContact": "",
            "discount": 0,
            "fees": [
                {
                    "category": "tuition",
                    "label": "Tuition Fee",
                    "amount": 1000,
                    "paid": 0,
                    "dueDate": "2026-04-30",
                    "status": "pending"
                },
                {
                    "category": "tuition",
                    "label": "Tuition Again",
                    "amount": 500,
                    "paid": 0,
                    "dueDate": "2026-04-30",
                    "status": "pending"
                }
            ]
        }
    ]);
    std::fs::write(&bad, serde_json::to_string_pretty(&bad_snapshot).unwrap())
        .expect("write bad snapshot");

    let rejected = request(
        &mut stdin,
        &mut reader,
        "import",
        "exchange.importLedgersJson",
        json!({ "inPath": bad.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), "duplicate_category");

    // The pre-import ledger is still the only one there.
    let listed = request(&mut stdin, &mut reader, "list", "ledgers.list", json!({}));
    let rows = result(&listed)
        .get("ledgers")
        .and_then(|v| v.as_array())
        .expect("ledgers");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("id").and_then(|v| v.as_str()),
        Some(existing_id.as_str())
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn snapshot_with_overpaid_item_is_rejected() {
    let workspace = temp_dir("bursard-exchange-overpaid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let bad = workspace.join("overpaid.json");
    let bad_snapshot = json!([
        {
            "id": "l-over",
            "name": "Overpaid Record",
            "className": "Class 4",
            "section": "",
            "rollNo": "",
            "guardianContact": "",
            "discount": 0,
            "fees": [
                {
                    "category": "tuition",
                    "label": "Tuition Fee",
                    "amount": 1000,
                    "paid": 1500,
                    "dueDate": "2026-04-30",
                    "status": "paid"
                }
            ]
        }
    ]);
    std::fs::write(&bad, serde_json::to_string_pretty(&bad_snapshot).unwrap())
        .expect("write bad snapshot");

    let rejected = request(
        &mut stdin,
        &mut reader,
        "import",
        "exchange.importLedgersJson",
        json!({ "inPath": bad.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
