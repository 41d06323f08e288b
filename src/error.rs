//! Ledger error types.
//!
//! Variants are grouped by the failure taxonomy: validation errors reject a
//! request before any state mutates, confirmation errors leave an operation
//! pending, idempotency violations are skips for retried schedulers, external
//! failures never roll back committed state, and fatal errors abort the whole
//! transaction.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{OperationId, WalletId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Insufficient funds in wallet {wallet}: need {needed}, have {available}")]
    InsufficientFunds {
        wallet: WalletId,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Amount {amount} is below the minimum {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Sender and receiver wallet cannot be the same")]
    SelfTransfer,

    #[error("Amount mismatch: {0}")]
    AmountMismatch(String),

    #[error("Invalid status for this operation: {0}")]
    InvalidStatus(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("Program not found: {0}")]
    ProgramNotFound(u64),

    #[error("User program not found: {0}")]
    UserProgramNotFound(u64),

    #[error("Replenishment not found: {0}")]
    ReplenishmentNotFound(u64),

    #[error("Frozen item not found: {0}")]
    FrozenItemNotFound(u64),

    #[error("Withdrawal request not found: {0}")]
    WithdrawalRequestNotFound(u64),

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    // === Confirmation Errors ===
    #[error("Wrong confirmation code")]
    WrongCode,

    #[error("Confirmation code expired")]
    CodeExpired,

    #[error("No confirmation pending for this destination")]
    UnknownDestination,

    #[error("Operation is not awaiting confirmation")]
    NotAwaitingConfirmation,

    // === Idempotency Errors ===
    #[error("Operation {0} has already been applied")]
    AlreadyApplied(OperationId),

    #[error("Accrual already exists for this program and date")]
    AlreadyAccrued,

    // === External Dependency Errors ===
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    // === Fatal ===
    #[error("Balance for wallet {wallet} would go negative ({column}: {result})")]
    NegativeBalance {
        wallet: WalletId,
        column: &'static str,
        result: Decimal,
    },
}

impl LedgerError {
    /// Stable error code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::AmountMismatch(_) => "AMOUNT_MISMATCH",
            LedgerError::InvalidStatus(_) => "INVALID_STATUS",
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::ProgramNotFound(_) => "PROGRAM_NOT_FOUND",
            LedgerError::UserProgramNotFound(_) => "USER_PROGRAM_NOT_FOUND",
            LedgerError::ReplenishmentNotFound(_) => "REPLENISHMENT_NOT_FOUND",
            LedgerError::FrozenItemNotFound(_) => "FROZEN_ITEM_NOT_FOUND",
            LedgerError::WithdrawalRequestNotFound(_) => "WITHDRAWAL_REQUEST_NOT_FOUND",
            LedgerError::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            LedgerError::WrongCode => "WRONG_CODE",
            LedgerError::CodeExpired => "CODE_EXPIRED",
            LedgerError::UnknownDestination => "UNKNOWN_DESTINATION",
            LedgerError::NotAwaitingConfirmation => "NOT_AWAITING_CONFIRMATION",
            LedgerError::AlreadyApplied(_) => "ALREADY_APPLIED",
            LedgerError::AlreadyAccrued => "ALREADY_ACCRUED",
            LedgerError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            LedgerError::NegativeBalance { .. } => "NEGATIVE_BALANCE",
        }
    }

    /// True for errors a retried scheduler should treat as "already done,
    /// move on" rather than a failure.
    pub fn is_idempotency_skip(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadyApplied(_) | LedgerError::AlreadyAccrued
        )
    }
}
