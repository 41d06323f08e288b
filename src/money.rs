//! Money arithmetic for the ledger.
//!
//! All amounts are a single USDT-equivalent unit of account held as
//! `rust_decimal::Decimal`, quantized to 2 decimal places; percentages keep
//! up to 4 fractional digits. Every amount that lands in a wallet, program
//! or history row goes through [`quantize`] first - no raw intermediate
//! precision ever reaches storage.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places for stored amounts.
pub const AMOUNT_DP: u32 = 2;

/// Decimal places for stored percentages.
pub const PERCENT_DP: u32 = 4;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Quantize an amount to 2 decimal places, midpoint away from zero.
#[inline]
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Quantize a percentage to 4 decimal places.
#[inline]
pub fn quantize_pct(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Division that treats a zero denominator as zero instead of an error.
///
/// Accrual percent-of-funds reporting divides by a program's funds, which
/// may legitimately be zero after a full closure on the same day.
#[inline]
pub fn safe_zero_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// `rate_pct` percent of `amount`, unquantized.
#[inline]
pub fn pct_of(amount: Decimal, rate_pct: Decimal) -> Decimal {
    amount * rate_pct / HUNDRED
}

/// Result of commission application over one or more component amounts.
#[derive(Debug, Clone, PartialEq)]
pub struct CommissionOutcome {
    /// Component amounts after commission treatment. Unchanged for the
    /// included mode, scaled by `(1 + rate)` for the non-included mode.
    pub amounts: Vec<Decimal>,
    pub commission: Decimal,
    pub amount_net: Decimal,
}

impl CommissionOutcome {
    pub fn total(&self) -> Decimal {
        self.amounts.iter().copied().sum()
    }
}

/// Apply a commission rate to a set of component amounts.
///
/// Two modes, and the distinction decides who absorbs the fee:
///
/// * `included` - the fee is deducted from the requested sum:
///   `commission = sum * rate`, `amount_net = sum - commission`. Components
///   are left untouched.
/// * non-included - the payer pays extra on top: every component is scaled
///   by `(1 + rate)` first, then `commission = scaled_sum * rate` and
///   `amount_net = scaled_sum`.
///
/// 1000 at 3% included gives commission 30 / net 970; non-included gives
/// commission 30.90 / net 1030.
pub fn apply_commission(
    amounts: &[Decimal],
    rate_pct: Decimal,
    included: bool,
) -> CommissionOutcome {
    let rate = rate_pct / HUNDRED;
    if included {
        let sum: Decimal = amounts.iter().copied().sum();
        let commission = quantize(sum * rate);
        CommissionOutcome {
            amounts: amounts.to_vec(),
            commission,
            amount_net: quantize(sum - commission),
        }
    } else {
        let scaled: Vec<Decimal> = amounts
            .iter()
            .map(|a| quantize(*a * (Decimal::ONE + rate)))
            .collect();
        let scaled_sum: Decimal = scaled.iter().copied().sum();
        CommissionOutcome {
            amounts: scaled,
            commission: quantize(scaled_sum * rate),
            amount_net: quantize(scaled_sum),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantize_midpoint_away_from_zero() {
        assert_eq!(quantize(dec!(1.005)), dec!(1.01));
        assert_eq!(quantize(dec!(-1.005)), dec!(-1.01));
        assert_eq!(quantize(dec!(1.004)), dec!(1.00));
    }

    #[test]
    fn test_safe_zero_div() {
        assert_eq!(safe_zero_div(dec!(10), dec!(0)), Decimal::ZERO);
        assert_eq!(safe_zero_div(dec!(10), dec!(4)), dec!(2.5));
    }

    #[test]
    fn test_commission_included() {
        let out = apply_commission(&[dec!(1000)], dec!(3), true);
        assert_eq!(out.commission, dec!(30.00));
        assert_eq!(out.amount_net, dec!(970.00));
        assert_eq!(out.amounts, vec![dec!(1000)]);
    }

    #[test]
    fn test_commission_non_included() {
        let out = apply_commission(&[dec!(1000)], dec!(3), false);
        assert_eq!(out.amounts, vec![dec!(1030.00)]);
        assert_eq!(out.commission, dec!(30.90));
        assert_eq!(out.amount_net, dec!(1030.00));
    }

    #[test]
    fn test_commission_non_included_components() {
        // Each component scales independently; commission is on the scaled sum.
        let out = apply_commission(&[dec!(600), dec!(400)], dec!(3), false);
        assert_eq!(out.amounts, vec![dec!(618.00), dec!(412.00)]);
        assert_eq!(out.commission, dec!(30.90));
        assert_eq!(out.amount_net, dec!(1030.00));
    }

    #[test]
    fn test_commission_included_withdrawal_scenario() {
        // 500 at 2% included: commission 10, net 490.
        let out = apply_commission(&[dec!(500)], dec!(2), true);
        assert_eq!(out.commission, dec!(10.00));
        assert_eq!(out.amount_net, dec!(490.00));
    }

    #[test]
    fn test_commission_zero_rate() {
        let out = apply_commission(&[dec!(250)], Decimal::ZERO, true);
        assert_eq!(out.commission, Decimal::ZERO);
        assert_eq!(out.amount_net, dec!(250.00));

        let out = apply_commission(&[dec!(250)], Decimal::ZERO, false);
        assert_eq!(out.commission, Decimal::ZERO);
        assert_eq!(out.amount_net, dec!(250.00));
    }
}
