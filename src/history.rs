//! Daily denormalized snapshots for reporting and statistics.
//!
//! Pure read-then-append rows; the scheduler writes them once per day,
//! after the day's accrual so they reflect post-accrual state.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{UserProgramId, WalletId};
use crate::program::UserProgramStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletHistory {
    pub wallet: WalletId,
    pub date: NaiveDate,
    pub free: Decimal,
    pub frozen: Decimal,
    /// Sum of funds across the wallet's non-finished program runs.
    pub invested: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProgramHistory {
    pub user_program: UserProgramId,
    pub date: NaiveDate,
    pub status: UserProgramStatus,
    pub deposit: Decimal,
    pub funds: Decimal,
    pub profit: Decimal,
}
