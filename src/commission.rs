//! Commission ledger - the house account.
//!
//! Every fee an operation charges is posted here inside the same
//! transaction as the balance mutation, so the house total always matches
//! the sum of recorded postings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::OperationId;
use crate::operation::OperationKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionEntry {
    pub operation: OperationId,
    pub kind: OperationKind,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CommissionLedger {
    entries: Vec<CommissionEntry>,
    total: Decimal,
}

impl CommissionLedger {
    /// Post a fee to the house account. Zero postings are dropped.
    pub fn post(&mut self, operation: OperationId, kind: OperationKind, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        self.total += amount;
        self.entries.push(CommissionEntry {
            operation,
            kind,
            amount,
        });
    }

    #[inline]
    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn entries(&self) -> &[CommissionEntry] {
        &self.entries
    }
}
