//! Frozen-fund parcels.
//!
//! Whenever a wallet's frozen balance grows, one `FrozenItem` records the
//! parcel with its scheduled defrost date. Decreases consume parcels oldest
//! defrost date first; a parcel whose remaining amount reaches zero is Done
//! and leaves the FIFO selection.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{FrozenItemId, WalletId};
use crate::money::quantize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrozenItemStatus {
    Initial,
    Done,
}

impl FrozenItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrozenItemStatus::Initial => "INITIAL",
            FrozenItemStatus::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrozenItem {
    pub id: FrozenItemId,
    pub wallet: WalletId,
    /// Remaining amount; only ever decreases.
    pub amount: Decimal,
    pub frost_date: NaiveDate,
    pub defrost_date: NaiveDate,
    pub status: FrozenItemStatus,
}

impl FrozenItem {
    pub fn new(
        id: FrozenItemId,
        wallet: WalletId,
        amount: Decimal,
        frost_date: NaiveDate,
        defrost_delay_days: i64,
    ) -> Self {
        Self {
            id,
            wallet,
            amount: quantize(amount),
            frost_date,
            defrost_date: frost_date + chrono::Duration::days(defrost_delay_days),
            status: FrozenItemStatus::Initial,
        }
    }

    /// True while the parcel still participates in FIFO defrost selection.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.status == FrozenItemStatus::Initial
    }

    /// Consume `value` from the parcel; `None` consumes the full remainder.
    ///
    /// Returns the amount actually consumed. A parcel drained to zero flips
    /// to Done.
    pub fn defrost(&mut self, value: Option<Decimal>) -> Decimal {
        let take = match value {
            Some(v) => quantize(v).min(self.amount),
            None => self.amount,
        };
        self.amount -= take;
        if self.amount.is_zero() {
            self.status = FrozenItemStatus::Done;
        }
        take
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_defrost_date_from_delay() {
        let item = FrozenItem::new(1, 1, dec!(100), date(2026, 3, 1), 30);
        assert_eq!(item.defrost_date, date(2026, 3, 31));
        assert_eq!(item.status, FrozenItemStatus::Initial);
    }

    #[test]
    fn test_partial_defrost_keeps_item_live() {
        let mut item = FrozenItem::new(1, 1, dec!(100), date(2026, 3, 1), 30);
        let taken = item.defrost(Some(dec!(40)));
        assert_eq!(taken, dec!(40));
        assert_eq!(item.amount, dec!(60));
        assert!(item.is_live());
    }

    #[test]
    fn test_full_defrost_marks_done() {
        let mut item = FrozenItem::new(1, 1, dec!(100), date(2026, 3, 1), 30);
        assert_eq!(item.defrost(None), dec!(100));
        assert_eq!(item.amount, Decimal::ZERO);
        assert_eq!(item.status, FrozenItemStatus::Done);
        assert!(!item.is_live());
    }

    #[test]
    fn test_defrost_caps_at_remaining() {
        let mut item = FrozenItem::new(1, 1, dec!(25), date(2026, 3, 1), 30);
        assert_eq!(item.defrost(Some(dec!(100))), dec!(25));
        assert_eq!(item.status, FrozenItemStatus::Done);
    }

    #[test]
    fn test_exact_defrost_marks_done() {
        let mut item = FrozenItem::new(1, 1, dec!(25), date(2026, 3, 1), 30);
        item.defrost(Some(dec!(25)));
        assert_eq!(item.status, FrozenItemStatus::Done);
    }
}
