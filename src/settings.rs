//! Two-tier settings resolution.
//!
//! Fee rates and 2FA confirmation toggles are configured globally and may be
//! overridden per wallet. Resolution is an explicit function over the two
//! tiers: the wallet override wins when present, the global default applies
//! otherwise. Nothing here is looked up dynamically.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Pick the wallet-level override when set, else the global default.
#[inline]
pub fn resolve<T: Copy>(wallet_override: Option<T>, default: T) -> T {
    wallet_override.unwrap_or(default)
}

/// Global default fee rates, in percent.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FeeSettings {
    pub withdrawal_fee_pct: Decimal,
    pub replenishment_fee_pct: Decimal,
    pub transfer_fee_pct: Decimal,
    pub success_fee_pct: Decimal,
    pub management_fee_pct: Decimal,
    /// Penalty rate for a forced defrost before the parcel's defrost date.
    pub early_defrost_fee_pct: Decimal,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            withdrawal_fee_pct: dec!(2),
            replenishment_fee_pct: dec!(3),
            transfer_fee_pct: dec!(3),
            success_fee_pct: dec!(20),
            management_fee_pct: dec!(0.005),
            early_defrost_fee_pct: dec!(5),
        }
    }
}

/// Per-wallet overrides. Every field is optional; `None` falls through to
/// the global default.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct WalletSettings {
    pub withdrawal_fee_pct: Option<Decimal>,
    pub replenishment_fee_pct: Option<Decimal>,
    pub transfer_fee_pct: Option<Decimal>,
    pub success_fee_pct: Option<Decimal>,
    pub management_fee_pct: Option<Decimal>,
    pub early_defrost_fee_pct: Option<Decimal>,

    /// 2FA on withdrawal / closure / replenishment-cancel, per destination.
    pub confirm_on_operation_email: Option<bool>,
    pub confirm_on_operation_telegram: Option<bool>,
    /// 2FA on transfer, per destination (a separate toggle).
    pub confirm_on_transfer_email: Option<bool>,
    pub confirm_on_transfer_telegram: Option<bool>,
}

/// Fully-resolved view of one wallet's settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSettings {
    pub withdrawal_fee_pct: Decimal,
    pub replenishment_fee_pct: Decimal,
    pub transfer_fee_pct: Decimal,
    pub success_fee_pct: Decimal,
    pub management_fee_pct: Decimal,
    pub early_defrost_fee_pct: Decimal,
    pub confirm_on_operation_email: bool,
    pub confirm_on_operation_telegram: bool,
    pub confirm_on_transfer_email: bool,
    pub confirm_on_transfer_telegram: bool,
}

impl WalletSettings {
    /// Resolve against the global defaults. Confirmation toggles default to
    /// off: 2FA is an opt-in per user.
    pub fn resolve(&self, defaults: &FeeSettings) -> ResolvedSettings {
        ResolvedSettings {
            withdrawal_fee_pct: resolve(self.withdrawal_fee_pct, defaults.withdrawal_fee_pct),
            replenishment_fee_pct: resolve(
                self.replenishment_fee_pct,
                defaults.replenishment_fee_pct,
            ),
            transfer_fee_pct: resolve(self.transfer_fee_pct, defaults.transfer_fee_pct),
            success_fee_pct: resolve(self.success_fee_pct, defaults.success_fee_pct),
            management_fee_pct: resolve(self.management_fee_pct, defaults.management_fee_pct),
            early_defrost_fee_pct: resolve(
                self.early_defrost_fee_pct,
                defaults.early_defrost_fee_pct,
            ),
            confirm_on_operation_email: resolve(self.confirm_on_operation_email, false),
            confirm_on_operation_telegram: resolve(self.confirm_on_operation_telegram, false),
            confirm_on_transfer_email: resolve(self.confirm_on_transfer_email, false),
            confirm_on_transfer_telegram: resolve(self.confirm_on_transfer_telegram, false),
        }
    }
}
