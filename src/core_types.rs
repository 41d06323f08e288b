//! Core identifier types shared across the ledger.
//!
//! All ids are `u64` sequence values allocated by the state store; the
//! externally-visible correlation id on an operation is a `Uuid`.

pub type UserId = u64;
pub type WalletId = u64;
pub type FrozenItemId = u64;
pub type ProgramId = u64;
pub type UserProgramId = u64;
pub type ReplenishmentId = u64;
pub type AccrualId = u64;
pub type OperationId = u64;
pub type ConfirmationId = u64;
pub type WithdrawalRequestId = u64;
