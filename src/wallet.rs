//! Wallet - per-user store of free and frozen balances.
//!
//! Fields are private: the only mutation path is
//! `LedgerState::update_balance`, which calls the validated delta methods
//! here and reconciles frozen parcels alongside. Both columns are invariant
//! non-negative; a delta that would break that is rejected before anything
//! is written.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{UserId, WalletId};
use crate::error::LedgerError;
use crate::money::quantize;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    id: WalletId,
    user_id: UserId,
    free: Decimal,
    frozen: Decimal,
}

impl Wallet {
    pub fn new(id: WalletId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            free: Decimal::ZERO,
            frozen: Decimal::ZERO,
        }
    }

    #[inline]
    pub fn id(&self) -> WalletId {
        self.id
    }

    #[inline]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[inline]
    pub fn free(&self) -> Decimal {
        self.free
    }

    #[inline]
    pub fn frozen(&self) -> Decimal {
        self.frozen
    }

    /// Total balance: free + frozen.
    #[inline]
    pub fn balance(&self) -> Decimal {
        self.free + self.frozen
    }

    /// Apply a delta to the free column. Negative results are rejected and
    /// nothing is written.
    pub(crate) fn apply_free_delta(&mut self, delta: Decimal) -> Result<(), LedgerError> {
        let result = quantize(self.free + delta);
        if result < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance {
                wallet: self.id,
                column: "free",
                result,
            });
        }
        self.free = result;
        Ok(())
    }

    /// Apply a delta to the frozen column. Negative results are rejected and
    /// nothing is written.
    pub(crate) fn apply_frozen_delta(&mut self, delta: Decimal) -> Result<(), LedgerError> {
        let result = quantize(self.frozen + delta);
        if result < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance {
                wallet: self.id,
                column: "frozen",
                result,
            });
        }
        self.frozen = result;
        Ok(())
    }
}
