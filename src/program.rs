//! Yield products and per-user runs of them.
//!
//! `Program` is the product template an admin defines; `UserProgram` is one
//! user's running instance with its own deposit, cumulative profit and
//! status. `UserProgramReplenishment` is a pending top-up that applies a few
//! business days after the operation that created it.

use chrono::{Datelike, Months, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{ProgramId, ReplenishmentId, UserProgramId, WalletId};
use crate::money::quantize;

/// How often a program accrues profit. Daily is the only mode the fund
/// currently runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccrualType {
    #[default]
    Daily,
}

/// When accrued profit becomes withdrawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalType {
    /// Positive accruals are paid out to the wallet each day.
    Daily,
    /// Profit stays in the program until closure.
    AfterFinish,
}

/// Product template. Immutable outside admin edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub min_deposit: Decimal,
    /// Minimum top-up amount; `None` means any positive amount.
    pub min_replenishment: Option<Decimal>,
    /// Term in months; `None` is an open-ended program.
    pub duration_months: Option<u32>,
    pub accrual_type: AccrualType,
    pub withdrawal_type: WithdrawalType,
}

/// UserProgram lifecycle. Transitions are monotonic:
/// Initial -> Running -> Finished, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum UserProgramStatus {
    Initial = 0,
    Running = 10,
    Finished = 20,
}

impl UserProgramStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, UserProgramStatus::Finished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserProgramStatus::Initial => "INITIAL",
            UserProgramStatus::Running => "RUNNING",
            UserProgramStatus::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for UserProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user's run of a program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProgram {
    pub id: UserProgramId,
    pub wallet: WalletId,
    pub program: ProgramId,
    /// Auto-derived: the program name, or `Name/N` for the Nth concurrent run.
    pub name: String,
    /// Principal. Never negative.
    pub deposit: Decimal,
    /// Cumulative net profit. May be negative.
    pub profit: Decimal,
    pub status: UserProgramStatus,
    pub start_date: NaiveDate,
    /// `start_date + duration`; `None` for open-ended programs.
    pub end_date: Option<NaiveDate>,
    pub close_date: Option<NaiveDate>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl UserProgram {
    pub fn new(
        id: UserProgramId,
        wallet: WalletId,
        program: &Program,
        name: String,
        deposit: Decimal,
        start_date: NaiveDate,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let end_date = program
            .duration_months
            .map(|months| start_date + Months::new(months));
        Self {
            id,
            wallet,
            program: program.id,
            name,
            deposit: quantize(deposit),
            profit: Decimal::ZERO,
            status: UserProgramStatus::Initial,
            start_date,
            end_date,
            close_date: None,
            created_at,
        }
    }

    /// Put a freshly created run into service. Called once the start
    /// operation applies.
    pub fn activate(&mut self) {
        self.status = UserProgramStatus::Running;
    }

    /// Tradable funds.
    ///
    /// Fixed-term programs compound profit into funds; open-ended programs
    /// pay positive profit out daily, so only losses reduce funds here.
    pub fn funds(&self) -> Decimal {
        match self.end_date {
            Some(_) => self.deposit + self.profit,
            None => self.deposit + self.profit.min(Decimal::ZERO),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == UserProgramStatus::Running
    }
}

/// Derive the display name for a new run: the bare program name for the
/// first, `Name/N` for the Nth concurrent one.
pub fn derive_run_name(program_name: &str, prior_runs: usize) -> String {
    if prior_runs == 0 {
        program_name.to_string()
    } else {
        format!("{}/{}", program_name, prior_runs + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplenishmentStatus {
    Initial,
    Done,
    Canceled,
}

impl ReplenishmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplenishmentStatus::Initial => "INITIAL",
            ReplenishmentStatus::Done => "DONE",
            ReplenishmentStatus::Canceled => "CANCELED",
        }
    }
}

/// A pending top-up to a running program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProgramReplenishment {
    pub id: ReplenishmentId,
    pub user_program: UserProgramId,
    pub amount: Decimal,
    pub status: ReplenishmentStatus,
    /// Date from which the scheduler may apply the top-up.
    pub apply_date: NaiveDate,
}

impl UserProgramReplenishment {
    pub fn new(
        id: ReplenishmentId,
        user_program: UserProgramId,
        amount: Decimal,
        created: NaiveDate,
        apply_delay_business_days: u32,
    ) -> Self {
        Self {
            id,
            user_program,
            amount: quantize(amount),
            status: ReplenishmentStatus::Initial,
            apply_date: add_business_days(created, apply_delay_business_days),
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == ReplenishmentStatus::Initial
    }

    /// Partial cancellation: reduce the pending amount. Reducing to zero
    /// cancels outright.
    pub fn decrease(&mut self, value: Decimal) {
        self.amount = (self.amount - quantize(value)).max(Decimal::ZERO);
        if self.amount.is_zero() {
            self.status = ReplenishmentStatus::Canceled;
        }
    }
}

/// Step `days` business days forward, skipping weekends.
pub fn add_business_days(from: NaiveDate, days: u32) -> NaiveDate {
    let mut date = from;
    let mut remaining = days;
    while remaining > 0 {
        date += chrono::Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    date
}
