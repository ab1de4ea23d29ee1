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

fn create_ledger(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    class_name: &str,
    fees: serde_json::Value,
) -> String {
    let created = request(
        stdin,
        reader,
        id,
        "ledgers.create",
        json!({
            "today": "2026-04-01",
            "student": { "name": name, "className": class_name },
            "fees": fees
        }),
    );
    result(&created)
        .get("ledgerId")
        .and_then(|v| v.as_str())
        .expect("ledgerId")
        .to_string()
}

#[test]
fn summary_rolls_up_totals_counts_and_categories() {
    let workspace = temp_dir("bursard-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_ledger(
        &mut stdin,
        &mut reader,
        "a",
        "Student A",
        "Class 6",
        json!([
            { "category": "tuition", "amount": 5000, "dueDate": "2026-04-10" },
            { "category": "transport", "amount": 1000, "dueDate": "2026-04-10" }
        ]),
    );
    let b = create_ledger(
        &mut stdin,
        &mut reader,
        "b",
        "Student B",
        "Class 6",
        json!([
            { "category": "tuition", "amount": 5000, "dueDate": "2026-06-30" }
        ]),
    );
    let _c = create_ledger(
        &mut stdin,
        &mut reader,
        "c",
        "Student C",
        "Class 7",
        json!([
            { "category": "tuition", "amount": 4000, "dueDate": "2026-06-30" }
        ]),
    );

    // A pays tuition in part; B settles in full.
    let _ = request(
        &mut stdin,
        &mut reader,
        "payA",
        "fees.collect",
        json!({
            "ledgerId": a,
            "today": "2026-04-05",
            "mode": "cash",
            "collector": "Front Office",
            "selections": { "tuition": 2000 }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "payB",
        "fees.collect",
        json!({
            "ledgerId": b,
            "today": "2026-04-05",
            "mode": "upi",
            "collector": "Front Office",
            "selections": { "tuition": 5000 }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "conc",
        "fees.applyConcession",
        json!({
            "ledgerId": a,
            "today": "2026-04-05",
            "kind": "fixed",
            "value": 500.0,
            "reason": "staff ward"
        }),
    );

    // 2026-04-20: A's items are past due, so A reads overdue.
    let summary = request(
        &mut stdin,
        &mut reader,
        "sum",
        "fees.summary",
        json!({ "today": "2026-04-20" }),
    );
    let summary = result(&summary);
    assert_eq!(summary.get("totalStudents").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(summary.get("totalBilled").and_then(|v| v.as_i64()), Some(15000));
    assert_eq!(
        summary.get("totalCollected").and_then(|v| v.as_i64()),
        Some(7000)
    );
    assert_eq!(summary.get("totalDiscount").and_then(|v| v.as_i64()), Some(500));
    assert_eq!(
        summary.get("pendingAmount").and_then(|v| v.as_i64()),
        Some(7500)
    );
    assert_eq!(summary.get("overdueCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(summary.get("fullyPaidCount").and_then(|v| v.as_i64()), Some(1));

    let categories = summary
        .get("categories")
        .and_then(|v| v.as_array())
        .expect("categories");
    let tuition = categories
        .iter()
        .find(|c| c.get("category").and_then(|v| v.as_str()) == Some("tuition"))
        .expect("tuition rollup");
    assert_eq!(tuition.get("billed").and_then(|v| v.as_i64()), Some(14000));
    assert_eq!(tuition.get("collected").and_then(|v| v.as_i64()), Some(7000));
    assert_eq!(tuition.get("pending").and_then(|v| v.as_i64()), Some(7000));
    let transport = categories
        .iter()
        .find(|c| c.get("category").and_then(|v| v.as_str()) == Some("transport"))
        .expect("transport rollup");
    assert_eq!(transport.get("billed").and_then(|v| v.as_i64()), Some(1000));

    // Scoping to one class drops the other class entirely.
    let scoped = request(
        &mut stdin,
        &mut reader,
        "scoped",
        "fees.summary",
        json!({ "today": "2026-04-20", "className": "Class 7" }),
    );
    let scoped = result(&scoped);
    assert_eq!(scoped.get("totalStudents").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(scoped.get("totalBilled").and_then(|v| v.as_i64()), Some(4000));
    assert_eq!(scoped.get("totalCollected").and_then(|v| v.as_i64()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
