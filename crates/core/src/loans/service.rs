//! Loan CRUD and payment tracking routed through the sync engine.

use chrono::{NaiveDate, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::CollectionCache;
use crate::errors::{Error, Result};
use crate::money::{self, round_money};
use crate::persistence::{Collection, PersistenceService};
use crate::sync::{PendingOperation, SyncEngine};

use super::{owner_view, Loan, LoanPayment, LoanStatus};

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub amount: Decimal,
    pub interest_rate: Decimal,
    pub term_months: i64,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount: Decimal,
    pub date: NaiveDate,
    pub note: Option<String>,
}

pub struct LoanService {
    persistence: Arc<dyn PersistenceService>,
    cache: CollectionCache,
    sync: Arc<SyncEngine>,
}

impl LoanService {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        cache: CollectionCache,
        sync: Arc<SyncEngine>,
    ) -> Self {
        Self {
            persistence,
            cache,
            sync,
        }
    }

    pub async fn create_loan(&self, actor: &str, input: NewLoan) -> Result<Loan> {
        if input.amount <= Decimal::ZERO {
            return Err(Error::validation("loan principal must be positive"));
        }
        if input.term_months <= 0 {
            return Err(Error::validation("loan term must be positive"));
        }
        let amount = round_money(input.amount);
        let now = Utc::now().to_rfc3339();

        let payload = json!({
            "ownerId": actor,
            "amount": money::to_json(amount),
            "interestRate": money::to_json(input.interest_rate),
            "termMonths": input.term_months,
            "payments": [],
            "totalPaid": money::to_json(Decimal::ZERO),
            "status": LoanStatus::Active.as_str(),
            "createdAt": now,
            "updatedAt": now,
        });

        let operation = PendingOperation::create(Collection::Loans, payload, owner_view(actor));
        let outcome = self.sync.submit(operation).await?;
        debug!("loan of {} created for '{}'", amount, actor);

        Ok(Loan {
            id: outcome.id().to_string(),
            owner_id: actor.to_string(),
            amount,
            interest_rate: input.interest_rate,
            term_months: input.term_months,
            payments: Vec::new(),
            total_paid: Decimal::ZERO,
            status: LoanStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn get_loan(&self, actor: &str, loan_id: &str) -> Result<Loan> {
        let document = if self.persistence.is_online() {
            self.persistence.get_by_id(Collection::Loans, loan_id).await?
        } else {
            self.cache
                .find_document(&owner_view(actor), loan_id)
                .await?
        };
        let document = document.ok_or_else(|| Error::not_found("loan", loan_id))?;
        let loan = Loan::from_document(&document)?;
        if loan.owner_id != actor {
            return Err(Error::permission_denied(actor, "loan", loan_id));
        }
        Ok(loan)
    }

    pub async fn list_loans(&self, actor: &str) -> Result<Vec<Loan>> {
        let view = owner_view(actor);
        let documents = if self.persistence.is_online() {
            let fetched = self
                .persistence
                .query(view.collection, &view.filters, None)
                .await?;
            self.cache.merge_remote(&view, fetched).await?
        } else {
            self.cache.read(&view).await?
        };

        let mut loans = Vec::with_capacity(documents.len());
        for document in &documents {
            match Loan::from_document(document) {
                Ok(loan) => loans.push(loan),
                Err(err) => warn!("skipping malformed loan document: {}", err),
            }
        }
        Ok(loans)
    }

    /// Records a repayment. The payment sum may never exceed the principal;
    /// `total_paid` and `status` are recomputed and written together with
    /// the payment list.
    pub async fn add_payment(&self, actor: &str, loan_id: &str, input: NewPayment) -> Result<Loan> {
        if input.amount <= Decimal::ZERO {
            return Err(Error::validation("payment amount must be positive"));
        }
        let mut loan = self.get_loan(actor, loan_id).await?;

        let amount = round_money(input.amount);
        if loan.total_paid + amount > loan.amount {
            return Err(Error::validation(format!(
                "payment of {} would exceed the principal ({} of {} already paid)",
                amount, loan.total_paid, loan.amount
            )));
        }

        loan.payments.push(LoanPayment {
            id: Uuid::new_v4().to_string(),
            amount,
            date: input.date,
            note: input.note,
        });
        loan.recompute_derived();
        self.write_payments(actor, &loan).await?;
        Ok(loan)
    }

    /// Removes a repayment; a fully-paid loan reverts to active when its
    /// payments no longer cover the principal.
    pub async fn remove_payment(
        &self,
        actor: &str,
        loan_id: &str,
        payment_id: &str,
    ) -> Result<Loan> {
        let mut loan = self.get_loan(actor, loan_id).await?;
        let before = loan.payments.len();
        loan.payments.retain(|payment| payment.id != payment_id);
        if loan.payments.len() == before {
            return Err(Error::not_found("payment", payment_id));
        }
        loan.recompute_derived();
        self.write_payments(actor, &loan).await?;
        Ok(loan)
    }

    /// Marks an unpaid loan as defaulted.
    pub async fn mark_defaulted(&self, actor: &str, loan_id: &str) -> Result<Loan> {
        let mut loan = self.get_loan(actor, loan_id).await?;
        if loan.status == LoanStatus::Paid {
            return Err(Error::validation("a fully repaid loan cannot default"));
        }
        loan.status = LoanStatus::Defaulted;

        let partial = json!({
            "status": loan.status.as_str(),
            "updatedAt": Utc::now().to_rfc3339(),
        });
        let operation =
            PendingOperation::update(Collection::Loans, loan_id, partial, owner_view(actor));
        self.sync.submit(operation).await?;
        Ok(loan)
    }

    async fn write_payments(&self, actor: &str, loan: &Loan) -> Result<()> {
        let partial = json!({
            "payments": serde_json::to_value(&loan.payments)?,
            "totalPaid": money::to_json(loan.total_paid),
            "status": loan.status.as_str(),
            "updatedAt": Utc::now().to_rfc3339(),
        });
        let operation =
            PendingOperation::update(Collection::Loans, &loan.id, partial, owner_view(actor));
        self.sync.submit(operation).await?;
        Ok(())
    }
}
