//! Daily profit accrual records and the fee-breakdown math.
//!
//! One `UserProgramAccrual` row exists per (user program, trading day);
//! uniqueness is the scheduler's idempotency guard. Rows are append-only.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{AccrualId, UserProgramId};
use crate::money::{pct_of, quantize, quantize_pct, safe_zero_div};

/// One day's accrual for a user program, net of fees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProgramAccrual {
    pub id: AccrualId,
    pub user_program: UserProgramId,
    pub date: NaiveDate,
    /// Net amount after fees. May be negative on a losing day.
    pub amount: Decimal,
    /// Net amount as a percentage of funds at accrual time.
    pub percent_amount: Decimal,
    pub success_fee: Decimal,
    pub management_fee: Decimal,
}

/// Fee breakdown for one accrual computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccrualBreakdown {
    pub amount: Decimal,
    pub percent_amount: Decimal,
    pub success_fee: Decimal,
    pub management_fee: Decimal,
}

/// Compute one day's accrual for a program run.
///
/// Gross is the fund-wide daily rate applied to the run's funds. The
/// management fee is charged on the deposit regardless of result; the
/// success fee applies only to what remains of a positive gross after the
/// management fee. `percent_amount` is reported against funds, zero when
/// funds is zero.
pub fn compute_accrual(
    funds: Decimal,
    deposit: Decimal,
    daily_result_pct: Decimal,
    success_fee_pct: Decimal,
    management_fee_pct: Decimal,
) -> AccrualBreakdown {
    let gross = quantize(pct_of(funds, daily_result_pct));
    let management_fee = quantize(pct_of(deposit, management_fee_pct));
    let success_fee = quantize(pct_of(gross - management_fee, success_fee_pct)).max(Decimal::ZERO);
    let amount = gross - success_fee - management_fee;
    AccrualBreakdown {
        amount,
        percent_amount: quantize_pct(safe_zero_div(amount, funds) * Decimal::ONE_HUNDRED),
        success_fee,
        management_fee,
    }
}
