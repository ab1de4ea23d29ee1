use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Whole-rupee amounts. Keeping money integral makes the balance identity
/// exact: balance = total_amount - total_paid - discount.
pub type Money = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeCategory {
    Tuition,
    Transport,
    Lab,
    Library,
    Sports,
    Exam,
    Admission,
    Miscellaneous,
}

impl FeeCategory {
    pub const ALL: [FeeCategory; 8] = [
        FeeCategory::Tuition,
        FeeCategory::Transport,
        FeeCategory::Lab,
        FeeCategory::Library,
        FeeCategory::Sports,
        FeeCategory::Exam,
        FeeCategory::Admission,
        FeeCategory::Miscellaneous,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tuition" => Some(Self::Tuition),
            "transport" => Some(Self::Transport),
            "lab" => Some(Self::Lab),
            "library" => Some(Self::Library),
            "sports" => Some(Self::Sports),
            "exam" => Some(Self::Exam),
            "admission" => Some(Self::Admission),
            "miscellaneous" => Some(Self::Miscellaneous),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tuition => "tuition",
            Self::Transport => "transport",
            Self::Lab => "lab",
            Self::Library => "library",
            Self::Sports => "sports",
            Self::Exam => "exam",
            Self::Admission => "admission",
            Self::Miscellaneous => "miscellaneous",
        }
    }

    pub fn default_label(self) -> &'static str {
        match self {
            Self::Tuition => "Tuition Fee",
            Self::Transport => "Transport Fee",
            Self::Lab => "Lab Fee",
            Self::Library => "Library Fee",
            Self::Sports => "Sports Fee",
            Self::Exam => "Exam Fee",
            Self::Admission => "Admission Fee",
            Self::Miscellaneous => "Miscellaneous Fee",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Paid,
    Partial,
    Pending,
    Overdue,
}

impl FeeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paid" => Some(Self::Paid),
            "partial" => Some(Self::Partial),
            "pending" => Some(Self::Pending),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Pending => "pending",
            Self::Overdue => "overdue",
        }
    }
}

/// One billable category on one ledger. `status` is a cache of the last
/// classification; readers must reclassify against today's date instead of
/// trusting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeItem {
    pub category: FeeCategory,
    pub label: String,
    pub amount: Money,
    pub paid: Money,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_payment_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_ref: Option<String>,
}

/// Precedence: fully paid wins, then any payment at all, then the calendar.
/// A partially paid item past its due date still reads Partial.
pub fn classify(amount: Money, paid: Money, due_date: NaiveDate, today: NaiveDate) -> FeeStatus {
    if paid >= amount {
        FeeStatus::Paid
    } else if paid > 0 {
        FeeStatus::Partial
    } else if today > due_date {
        FeeStatus::Overdue
    } else {
        FeeStatus::Pending
    }
}

impl FeeItem {
    pub fn classify(&self, today: NaiveDate) -> FeeStatus {
        classify(self.amount, self.paid, self.due_date, today)
    }

    pub fn remaining(&self) -> Money {
        self.amount - self.paid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcessionKind {
    Percentage,
    Fixed,
}

impl ConcessionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcessionRecord {
    pub kind: ConcessionKind,
    pub percentage: f64,
    pub amount: Money,
    pub reason: String,
    pub granted_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub index: i64,
    pub amount: Money,
    pub due_date: NaiveDate,
}

/// An installment joined with its derived share of the ledger's payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentView {
    pub index: i64,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub paid_amount: Money,
    pub status: FeeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub date: NaiveDate,
    pub amount: Money,
    pub categories: Vec<String>,
    pub mode: String,
    pub receipt_ref: String,
    pub collector: String,
}

/// A student's fee ledger for one academic cycle. `payment_history` is
/// ordered newest first and is append-only; `discount` only ever grows and
/// always equals the sum of `concessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLedger {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub section: String,
    pub roll_no: String,
    pub guardian_contact: String,
    pub fees: Vec<FeeItem>,
    pub discount: Money,
    #[serde(default)]
    pub concessions: Vec<ConcessionRecord>,
    #[serde(default)]
    pub installments: Vec<Installment>,
    #[serde(default)]
    pub payment_history: Vec<PaymentRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub total_amount: Money,
    pub total_paid: Money,
    pub discount: Money,
    pub balance: Money,
    pub status: FeeStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    InvalidPaymentAmount {
        category: FeeCategory,
        requested: Money,
        remaining: Money,
    },
    InvalidDiscountValue {
        value: f64,
    },
    UnknownCategory {
        category: String,
    },
    DuplicateCategory {
        category: FeeCategory,
    },
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPaymentAmount { .. } => "invalid_payment_amount",
            Self::InvalidDiscountValue { .. } => "invalid_discount_value",
            Self::UnknownCategory { .. } => "unknown_category",
            Self::DuplicateCategory { .. } => "duplicate_category",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidPaymentAmount {
                category,
                requested,
                remaining,
            } => Some(serde_json::json!({
                "category": category.as_str(),
                "requested": requested,
                "remaining": remaining,
            })),
            Self::InvalidDiscountValue { value } => Some(serde_json::json!({ "value": value })),
            Self::UnknownCategory { category } => {
                Some(serde_json::json!({ "category": category }))
            }
            Self::DuplicateCategory { category } => {
                Some(serde_json::json!({ "category": category.as_str() }))
            }
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPaymentAmount {
                category,
                requested,
                remaining,
            } => write!(
                f,
                "payment of {} against {} exceeds remaining {}",
                requested,
                category.as_str(),
                remaining
            ),
            Self::InvalidDiscountValue { value } => {
                write!(f, "discount value {} is out of range", value)
            }
            Self::UnknownCategory { category } => {
                write!(f, "category {} not on this ledger", category)
            }
            Self::DuplicateCategory { category } => {
                write!(f, "category {} appears more than once", category.as_str())
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl StudentLedger {
    pub fn fee(&self, category: FeeCategory) -> Option<&FeeItem> {
        self.fees.iter().find(|item| item.category == category)
    }

    fn fee_mut(&mut self, category: FeeCategory) -> Option<&mut FeeItem> {
        self.fees.iter_mut().find(|item| item.category == category)
    }
}

/// Construction-time invariant: one item per category.
pub fn check_unique_categories(fees: &[FeeItem]) -> Result<(), LedgerError> {
    let mut seen: HashSet<FeeCategory> = HashSet::new();
    for item in fees {
        if !seen.insert(item.category) {
            return Err(LedgerError::DuplicateCategory {
                category: item.category,
            });
        }
    }
    Ok(())
}

/// Ledger-level derived fields, computed from scratch on every call. Stored
/// per-item statuses are ignored; items are reclassified against `today`.
pub fn recompute(ledger: &StudentLedger, today: NaiveDate) -> LedgerTotals {
    let total_amount: Money = ledger.fees.iter().map(|item| item.amount).sum();
    let total_paid: Money = ledger.fees.iter().map(|item| item.paid).sum();
    let balance = total_amount - total_paid - ledger.discount;

    let any_overdue = ledger
        .fees
        .iter()
        .any(|item| item.classify(today) == FeeStatus::Overdue);

    // A single overdue category flags the whole student even when every
    // other category is settled.
    let status = if balance == 0 {
        FeeStatus::Paid
    } else if any_overdue {
        FeeStatus::Overdue
    } else if total_paid > 0 && balance > 0 {
        FeeStatus::Partial
    } else {
        FeeStatus::Pending
    };

    LedgerTotals {
        total_amount,
        total_paid,
        discount: ledger.discount,
        balance,
        status,
    }
}

/// Apply a multi-category collection. Every selection is validated before
/// anything mutates, so a rejected call leaves the ledger untouched.
/// Callers guarantee a non-empty selection map.
pub fn apply_payment(
    ledger: &mut StudentLedger,
    selections: &BTreeMap<FeeCategory, Money>,
    mode: &str,
    collector: &str,
    today: NaiveDate,
    receipt_ref: &str,
) -> Result<PaymentRecord, LedgerError> {
    for (&category, &amount) in selections {
        let Some(item) = ledger.fee(category) else {
            return Err(LedgerError::UnknownCategory {
                category: category.as_str().to_string(),
            });
        };
        let remaining = item.remaining();
        if amount <= 0 || amount > remaining {
            return Err(LedgerError::InvalidPaymentAmount {
                category,
                requested: amount,
                remaining,
            });
        }
    }

    let mut total: Money = 0;
    let mut labels: Vec<String> = Vec::new();
    for (&category, &amount) in selections {
        // Validated above; the lookup cannot fail here.
        if let Some(item) = ledger.fee_mut(category) {
            item.paid += amount;
            item.status = classify(item.amount, item.paid, item.due_date, today);
            item.last_payment_date = Some(today);
            item.receipt_ref = Some(receipt_ref.to_string());
            total += amount;
            labels.push(item.label.clone());
        }
    }

    let record = PaymentRecord {
        date: today,
        amount: total,
        categories: labels,
        mode: mode.to_string(),
        receipt_ref: receipt_ref.to_string(),
        collector: collector.to_string(),
    };
    ledger.payment_history.insert(0, record.clone());
    Ok(record)
}

/// Grant a concession. The discount total accumulates across grants and the
/// concession list keeps every grant, newest last.
pub fn apply_discount(
    ledger: &mut StudentLedger,
    kind: ConcessionKind,
    value: f64,
    reason: &str,
    today: NaiveDate,
) -> Result<Money, LedgerError> {
    let valid = match kind {
        ConcessionKind::Percentage => value > 0.0 && value <= 100.0,
        ConcessionKind::Fixed => value > 0.0 && value.fract() == 0.0,
    };
    if !valid {
        return Err(LedgerError::InvalidDiscountValue { value });
    }

    let total_amount: Money = ledger.fees.iter().map(|item| item.amount).sum();
    let (applied, percentage) = match kind {
        ConcessionKind::Percentage => {
            let applied = ((total_amount as f64) * value / 100.0).round() as Money;
            (applied, value)
        }
        ConcessionKind::Fixed => {
            let applied = value as Money;
            let percentage = if total_amount > 0 {
                (applied as f64) / (total_amount as f64) * 100.0
            } else {
                0.0
            };
            (applied, percentage)
        }
    };

    ledger.discount += applied;
    ledger.concessions.push(ConcessionRecord {
        kind,
        percentage,
        amount: applied,
        reason: reason.to_string(),
        granted_on: today,
    });
    Ok(applied)
}

/// Spread the ledger's total paid across the plan in index order and
/// classify each slice with the same rules as fee items.
pub fn installment_views(ledger: &StudentLedger, today: NaiveDate) -> Vec<InstallmentView> {
    let mut remaining: Money = ledger.fees.iter().map(|item| item.paid).sum();
    let mut plan: Vec<&Installment> = ledger.installments.iter().collect();
    plan.sort_by_key(|inst| inst.index);

    plan.into_iter()
        .map(|inst| {
            let paid_amount = remaining.min(inst.amount).max(0);
            remaining -= paid_amount;
            InstallmentView {
                index: inst.index,
                amount: inst.amount,
                due_date: inst.due_date,
                paid_amount,
                status: classify(inst.amount, paid_amount, inst.due_date, today),
            }
        })
        .collect()
}

fn needs_reminder(ledger: &StudentLedger, today: NaiveDate, window_days: i64) -> bool {
    if recompute(ledger, today).balance <= 0 {
        return false;
    }
    ledger.fees.iter().any(|item| {
        if item.classify(today) == FeeStatus::Paid {
            return false;
        }
        let days_until_due = (item.due_date - today).num_days();
        // Due inside the forward window, or already past due.
        (0..=window_days).contains(&days_until_due) || days_until_due < 0
    })
}

/// Reminder worklist: settled ledgers never qualify; ordering is by ledger
/// id so repeated scans are reproducible.
pub fn find_reminder_candidates<'a>(
    ledgers: &'a [StudentLedger],
    today: NaiveDate,
    window_days: i64,
) -> Vec<&'a StudentLedger> {
    let mut out: Vec<&StudentLedger> = ledgers
        .iter()
        .filter(|ledger| needs_reminder(ledger, today, window_days))
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}
