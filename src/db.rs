use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::ledger::{
    ConcessionKind, ConcessionRecord, FeeCategory, FeeItem, FeeStatus, Installment, PaymentRecord,
    StudentLedger,
};

pub const DB_FILE: &str = "bursar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledgers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            section TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            guardian_contact TEXT NOT NULL,
            discount INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledgers_class ON ledgers(class_name)",
        [],
    )?;

    // One row per billable category; the primary key enforces the
    // category-uniqueness invariant at the storage layer too.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_items(
            ledger_id TEXT NOT NULL,
            category TEXT NOT NULL,
            label TEXT NOT NULL,
            amount INTEGER NOT NULL,
            paid INTEGER NOT NULL DEFAULT 0,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            last_payment_date TEXT,
            receipt_ref TEXT,
            PRIMARY KEY(ledger_id, category),
            FOREIGN KEY(ledger_id) REFERENCES ledgers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_items_ledger ON fee_items(ledger_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            ledger_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            date TEXT NOT NULL,
            amount INTEGER NOT NULL,
            categories TEXT NOT NULL,
            mode TEXT NOT NULL,
            receipt_ref TEXT NOT NULL UNIQUE,
            collector TEXT NOT NULL,
            FOREIGN KEY(ledger_id) REFERENCES ledgers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_ledger ON payments(ledger_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS concessions(
            id TEXT PRIMARY KEY,
            ledger_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            kind TEXT NOT NULL,
            percentage REAL NOT NULL,
            amount INTEGER NOT NULL,
            reason TEXT NOT NULL,
            granted_on TEXT NOT NULL,
            FOREIGN KEY(ledger_id) REFERENCES ledgers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_concessions_ledger ON concessions(ledger_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS installments(
            ledger_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            due_date TEXT NOT NULL,
            PRIMARY KEY(ledger_id, idx),
            FOREIGN KEY(ledger_id) REFERENCES ledgers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Early workspaces predate per-item receipt tracking and creation
    // stamps. Add the columns when missing.
    ensure_fee_items_receipt_ref(&conn)?;
    ensure_ledgers_created_at(&conn)?;

    Ok(conn)
}

fn ensure_fee_items_receipt_ref(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "fee_items", "receipt_ref")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE fee_items ADD COLUMN receipt_ref TEXT", [])?;
    Ok(())
}

fn ensure_ledgers_created_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "ledgers", "created_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE ledgers ADD COLUMN created_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let text: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match text {
        Some(t) => Ok(Some(serde_json::from_str(&t)?)),
        None => Ok(None),
    }
}

fn parse_date(text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_opt_date(text: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    text.map(|t| parse_date(&t)).transpose()
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Materialize one ledger with items, concessions, installments, and the
/// payment history newest first. Derived fields are never stored, so there
/// is nothing stale to load; callers recompute.
pub fn load_ledger(conn: &Connection, ledger_id: &str) -> anyhow::Result<Option<StudentLedger>> {
    let head = conn
        .query_row(
            "SELECT name, class_name, section, roll_no, guardian_contact, discount
             FROM ledgers WHERE id = ?",
            [ledger_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((name, class_name, section, roll_no, guardian_contact, discount)) = head else {
        return Ok(None);
    };

    let mut items_stmt = conn.prepare(
        "SELECT category, label, amount, paid, due_date, status, last_payment_date, receipt_ref
         FROM fee_items WHERE ledger_id = ? ORDER BY category",
    )?;
    let fees: Vec<FeeItem> = items_stmt
        .query_map([ledger_id], |r| {
            let category_text: String = r.get(0)?;
            let due: String = r.get(4)?;
            let status_text: String = r.get(5)?;
            Ok(FeeItem {
                category: FeeCategory::parse(&category_text).unwrap_or(FeeCategory::Miscellaneous),
                label: r.get(1)?,
                amount: r.get(2)?,
                paid: r.get(3)?,
                due_date: parse_date(&due)?,
                status: FeeStatus::parse(&status_text).unwrap_or(FeeStatus::Pending),
                last_payment_date: parse_opt_date(r.get(6)?)?,
                receipt_ref: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut conc_stmt = conn.prepare(
        "SELECT kind, percentage, amount, reason, granted_on
         FROM concessions WHERE ledger_id = ? ORDER BY seq",
    )?;
    let concessions: Vec<ConcessionRecord> = conc_stmt
        .query_map([ledger_id], |r| {
            let kind_text: String = r.get(0)?;
            let granted: String = r.get(4)?;
            Ok(ConcessionRecord {
                kind: ConcessionKind::parse(&kind_text).unwrap_or(ConcessionKind::Fixed),
                percentage: r.get(1)?,
                amount: r.get(2)?,
                reason: r.get(3)?,
                granted_on: parse_date(&granted)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut inst_stmt = conn
        .prepare("SELECT idx, amount, due_date FROM installments WHERE ledger_id = ? ORDER BY idx")?;
    let installments: Vec<Installment> = inst_stmt
        .query_map([ledger_id], |r| {
            let due: String = r.get(2)?;
            Ok(Installment {
                index: r.get(0)?,
                amount: r.get(1)?,
                due_date: parse_date(&due)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut pay_stmt = conn.prepare(
        "SELECT date, amount, categories, mode, receipt_ref, collector
         FROM payments WHERE ledger_id = ? ORDER BY seq DESC",
    )?;
    let payment_history: Vec<PaymentRecord> = pay_stmt
        .query_map([ledger_id], |r| {
            let date_text: String = r.get(0)?;
            let categories_text: String = r.get(2)?;
            let categories: Vec<String> =
                serde_json::from_str(&categories_text).unwrap_or_default();
            Ok(PaymentRecord {
                date: parse_date(&date_text)?,
                amount: r.get(1)?,
                categories,
                mode: r.get(3)?,
                receipt_ref: r.get(4)?,
                collector: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(StudentLedger {
        id: ledger_id.to_string(),
        name,
        class_name,
        section,
        roll_no,
        guardian_contact,
        fees,
        discount,
        concessions,
        installments,
        payment_history,
    }))
}

pub fn list_ledger_ids(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM ledgers ORDER BY id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn load_all_ledgers(conn: &Connection) -> anyhow::Result<Vec<StudentLedger>> {
    let mut out = Vec::new();
    for id in list_ledger_ids(conn)? {
        if let Some(ledger) = load_ledger(conn, &id)? {
            out.push(ledger);
        }
    }
    Ok(out)
}

/// Insert a full ledger; runs inside whatever transaction the caller holds.
pub fn insert_ledger(conn: &Connection, ledger: &StudentLedger) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO ledgers(id, name, class_name, section, roll_no, guardian_contact, discount, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &ledger.id,
            &ledger.name,
            &ledger.class_name,
            &ledger.section,
            &ledger.roll_no,
            &ledger.guardian_contact,
            ledger.discount,
            fmt_date(chrono::Local::now().date_naive()),
        ),
    )?;
    for item in &ledger.fees {
        conn.execute(
            "INSERT INTO fee_items(ledger_id, category, label, amount, paid, due_date, status,
                                   last_payment_date, receipt_ref)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &ledger.id,
                item.category.as_str(),
                &item.label,
                item.amount,
                item.paid,
                fmt_date(item.due_date),
                item.status.as_str(),
                item.last_payment_date.map(fmt_date),
                item.receipt_ref.as_deref(),
            ),
        )?;
    }
    for (i, conc) in ledger.concessions.iter().enumerate() {
        conn.execute(
            "INSERT INTO concessions(id, ledger_id, seq, kind, percentage, amount, reason, granted_on)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                uuid::Uuid::new_v4().to_string(),
                &ledger.id,
                i as i64,
                conc.kind.as_str(),
                conc.percentage,
                conc.amount,
                &conc.reason,
                fmt_date(conc.granted_on),
            ),
        )?;
    }
    for inst in &ledger.installments {
        conn.execute(
            "INSERT INTO installments(ledger_id, idx, amount, due_date) VALUES(?, ?, ?, ?)",
            (&ledger.id, inst.index, inst.amount, fmt_date(inst.due_date)),
        )?;
    }
    // History arrives newest first; the oldest entry gets the lowest seq so
    // `ORDER BY seq DESC` reproduces the order.
    for (i, rec) in ledger.payment_history.iter().rev().enumerate() {
        conn.execute(
            "INSERT INTO payments(id, ledger_id, seq, date, amount, categories, mode, receipt_ref, collector)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                uuid::Uuid::new_v4().to_string(),
                &ledger.id,
                i as i64,
                fmt_date(rec.date),
                rec.amount,
                serde_json::to_string(&rec.categories)?,
                &rec.mode,
                &rec.receipt_ref,
                &rec.collector,
            ),
        )?;
    }
    Ok(())
}

pub fn next_payment_seq(conn: &Connection, ledger_id: &str) -> anyhow::Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(seq) FROM payments WHERE ledger_id = ?",
        [ledger_id],
        |r| r.get(0),
    )?;
    Ok(max.map(|v| v + 1).unwrap_or(0))
}

pub fn next_concession_seq(conn: &Connection, ledger_id: &str) -> anyhow::Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(seq) FROM concessions WHERE ledger_id = ?",
        [ledger_id],
        |r| r.get(0),
    )?;
    Ok(max.map(|v| v + 1).unwrap_or(0))
}
