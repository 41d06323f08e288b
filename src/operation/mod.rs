//! The typed financial operation ledger.
//!
//! Every balance-touching action in the system is an [`types::Operation`]
//! with a closed [`types::OperationKind`]. Confirmation gating lives in
//! [`confirmation`], the user-visible audit trail in [`history`]; the
//! dispatch itself is implemented on [`crate::Ledger`].

pub mod confirmation;
pub mod history;
pub mod types;

pub use confirmation::{ConfirmationDestination, OperationConfirmation};
pub use history::{HistoryKind, MessageType, OperationHistory};
pub use types::{Operation, OperationKind, OperationParams, OperationState};
