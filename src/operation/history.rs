//! OperationHistory - the append-only, user-visible audit trail.
//!
//! Each applied operation writes one or more entries. `message_type` keys
//! the localized template the presentation layer renders; `insertion_data`
//! carries the template placeholders as JSON. Entries are never mutated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core_types::WalletId;

/// Display category, distinct from the operation kind: the same transfer
/// operation produces a debit entry for the sender and a credit entry for
/// the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    WalletCredit,
    WalletDebit,
    Program,
    Commission,
}

/// Keys for the localized message templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    ReplenishmentInitiated,
    ReplenishmentCredited,
    WithdrawalRequested,
    WithdrawalApproved,
    TransferSent,
    TransferReceived,
    CommissionCharged,
    ProgramStarted,
    ProgramReplenished,
    ProgramReplenishmentPending,
    ProgramReplenishmentCanceled,
    ProgramClosed,
    ProgramPartiallyClosed,
    ProgramAccrued,
    FundsDefrosted,
    ExtraFeeCharged,
    ConfirmationCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationHistory {
    pub wallet: WalletId,
    pub kind: HistoryKind,
    pub message_type: MessageType,
    /// Template placeholders.
    pub insertion_data: Value,
    /// Display name of the counterparty or program involved.
    pub target_name: Option<String>,
    pub amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl OperationHistory {
    pub fn new(
        wallet: WalletId,
        kind: HistoryKind,
        message_type: MessageType,
        insertion_data: Value,
        target_name: Option<String>,
        amount: Option<Decimal>,
    ) -> Self {
        Self {
            wallet,
            kind,
            message_type,
            insertion_data,
            target_name,
            amount,
            created_at: Utc::now(),
        }
    }
}
