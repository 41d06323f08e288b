//! fundcore - Operation/Ledger Engine for an investment-fund back office
//!
//! The crate owns the state that money flows through: per-user wallets
//! (free + frozen balances), frozen-fund parcels with scheduled defrost,
//! yield programs and their per-user runs, and the typed `Operation`
//! ledger that is the only way any of that state mutates.
//!
//! # Architecture
//!
//! All mutable state lives in one [`store::LedgerState`] owned by a
//! [`Ledger`]. Every `Operation::apply` runs against a staged copy of the
//! state and commits only on success, so a failing handler can never leave
//! a half-applied balance change behind. Exclusive access (`&mut Ledger`)
//! stands in for row-level locking: two operations on the same wallet are
//! serialized by construction.
//!
//! External collaborators (message delivery, the payment gateway) sit
//! behind the [`notifier::Notifier`] and [`gateway::PaymentGateway`]
//! traits and are best-effort: their failures never roll back a committed
//! ledger transaction.

pub mod accrual;
pub mod commission;
pub mod config;
pub mod core_types;
pub mod error;
pub mod frozen;
pub mod gateway;
pub mod history;
pub mod logging;
pub mod money;
pub mod notifier;
pub mod operation;
pub mod program;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod wallet;
pub mod withdrawal;

mod engine;

pub use config::AppConfig;
pub use engine::{Ledger, ProgramTemplate};
pub use error::LedgerError;
