//! Withdrawal requests.
//!
//! A withdrawal operation debits the wallet immediately but the actual
//! payout to the external chain is a manual admin approval step. The request
//! sits Pending until approved; the operation stays `done = false` until
//! then.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{OperationId, WalletId, WithdrawalRequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    Done,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WithdrawalRequest {
    pub id: WithdrawalRequestId,
    pub operation: OperationId,
    pub wallet: WalletId,
    /// Amount the user asked for, before commission.
    pub original_amount: Decimal,
    pub commission: Decimal,
    /// Net amount to pay out.
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub done_at: Option<NaiveDate>,
}

impl WithdrawalRequest {
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == WithdrawalStatus::Pending
    }

    /// Admin approval: flips the request to Done.
    pub fn approve(&mut self, as_of: NaiveDate) {
        self.status = WithdrawalStatus::Done;
        self.done_at = Some(as_of);
    }
}
