//! Loan domain model with derived repayment state.

mod service;

pub use service::{LoanService, NewLoan, NewPayment};

use chrono::NaiveDate;
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CollectionView;
use crate::documents::{doc_id, str_field};
use crate::errors::{Error, Result};
use crate::money::{parse_magnitude, parse_money, round_money};
use crate::persistence::{Collection, Filter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Paid,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Paid => "paid",
            LoanStatus::Defaulted => "defaulted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(LoanStatus::Active),
            "paid" => Some(LoanStatus::Paid),
            "defaulted" => Some(LoanStatus::Defaulted),
            _ => None,
        }
    }
}

/// One repayment against a loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanPayment {
    pub id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A loan with its evolving payment list.
///
/// `total_paid` and `status` are derived from the payments and recomputed on
/// every payment mutation; they are stored alongside so other clients can
/// render without replaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub owner_id: String,
    /// Principal.
    pub amount: Decimal,
    pub interest_rate: Decimal,
    pub term_months: i64,
    pub payments: Vec<LoanPayment>,
    pub total_paid: Decimal,
    pub status: LoanStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Loan {
    pub fn from_document(document: &Value) -> Result<Self> {
        let id =
            doc_id(document).ok_or_else(|| Error::malformed("loan document missing 'id'"))?;
        let owner_id = str_field(document, "ownerId")
            .ok_or_else(|| Error::malformed(format!("loan '{}' missing 'ownerId'", id)))?;
        let amount = document
            .get("amount")
            .and_then(parse_magnitude)
            .ok_or_else(|| Error::malformed(format!("loan '{}' has unparseable amount", id)))?;
        let interest_rate = document
            .get("interestRate")
            .and_then(parse_money)
            .unwrap_or_default();
        let term_months = document
            .get("termMonths")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let status = str_field(document, "status")
            .and_then(LoanStatus::parse)
            .unwrap_or(LoanStatus::Active);

        let mut payments = Vec::new();
        if let Some(raw_payments) = document.get("payments").and_then(Value::as_array) {
            for raw in raw_payments {
                match parse_payment(raw) {
                    Some(payment) => payments.push(payment),
                    None => warn!("skipping malformed payment record on loan '{}'", id),
                }
            }
        }

        let mut loan = Loan {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            amount,
            interest_rate,
            term_months,
            payments,
            total_paid: Decimal::ZERO,
            status,
            created_at: str_field(document, "createdAt").unwrap_or_default().to_string(),
            updated_at: str_field(document, "updatedAt").unwrap_or_default().to_string(),
        };
        loan.recompute_derived();
        Ok(loan)
    }

    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Recomputes `total_paid` and `status` from the payment list.
    ///
    /// `Paid` exactly when the payments cover the principal, reverting to
    /// `Active` when they no longer do. A `Defaulted` mark is operator-set
    /// and survives while the loan stays unpaid.
    pub fn recompute_derived(&mut self) {
        self.total_paid = round_money(
            self.payments
                .iter()
                .fold(Decimal::ZERO, |total, payment| total + payment.amount),
        );
        self.status = if self.total_paid >= self.amount {
            LoanStatus::Paid
        } else if self.status == LoanStatus::Defaulted {
            LoanStatus::Defaulted
        } else {
            LoanStatus::Active
        };
    }
}

fn parse_payment(raw: &Value) -> Option<LoanPayment> {
    Some(LoanPayment {
        id: doc_id(raw)?.to_string(),
        amount: raw.get("amount").and_then(parse_magnitude)?,
        date: str_field(raw, "date")?.parse().ok()?,
        note: str_field(raw, "note").map(str::to_string),
    })
}

/// The collection slice holding one owner's loans.
pub fn owner_view(owner_id: &str) -> CollectionView {
    CollectionView::new(
        Collection::Loans,
        vec![Filter::eq("ownerId", owner_id)],
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn loan_with_payments(principal: Decimal, amounts: &[Decimal]) -> Loan {
        let mut loan = Loan {
            id: "l1".to_string(),
            owner_id: "u1".to_string(),
            amount: principal,
            interest_rate: dec!(0.05),
            term_months: 12,
            payments: amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| LoanPayment {
                    id: format!("p{}", i),
                    amount: *amount,
                    date: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                    note: None,
                })
                .collect(),
            total_paid: Decimal::ZERO,
            status: LoanStatus::Active,
            created_at: String::new(),
            updated_at: String::new(),
        };
        loan.recompute_derived();
        loan
    }

    #[test]
    fn status_becomes_paid_exactly_at_principal() {
        let loan = loan_with_payments(dec!(100), &[dec!(60), dec!(40)]);
        assert_eq!(loan.total_paid, dec!(100));
        assert_eq!(loan.status, LoanStatus::Paid);
    }

    #[test]
    fn status_reverts_to_active_when_payments_drop() {
        let mut loan = loan_with_payments(dec!(100), &[dec!(60), dec!(40)]);
        loan.payments.pop();
        loan.recompute_derived();
        assert_eq!(loan.total_paid, dec!(60));
        assert_eq!(loan.status, LoanStatus::Active);
    }

    #[test]
    fn defaulted_mark_survives_while_unpaid() {
        let mut loan = loan_with_payments(dec!(100), &[dec!(10)]);
        loan.status = LoanStatus::Defaulted;
        loan.recompute_derived();
        assert_eq!(loan.status, LoanStatus::Defaulted);

        loan.payments.push(LoanPayment {
            id: "p-final".to_string(),
            amount: dec!(90),
            date: chrono::NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            note: None,
        });
        loan.recompute_derived();
        assert_eq!(loan.status, LoanStatus::Paid);
    }

    #[test]
    fn malformed_payment_records_are_skipped() {
        let loan = Loan::from_document(&serde_json::json!({
            "id": "l1",
            "ownerId": "u1",
            "amount": 500,
            "payments": [
                {"id": "p1", "amount": 100, "date": "2026-01-10"},
                {"id": "p2", "amount": "junk", "date": "2026-01-11"},
            ],
        }))
        .expect("normalize");
        assert_eq!(loan.payments.len(), 1);
        assert_eq!(loan.total_paid, dec!(100));
    }
}
