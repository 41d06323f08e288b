//! Payment-gateway seam for wallet replenishment.
//!
//! Actual settlement happens in an external gateway service reached over
//! HTTP. The engine only initiates a charge for the fee-adjusted expected
//! amount and is later told what was actually paid. A failure during
//! initiation rolls the replenishment operation back; the caller retries.

use rust_decimal::Decimal;
use uuid::Uuid;

/// External payment gateway.
pub trait PaymentGateway {
    /// Ask the gateway to collect `expected_amount` for the operation
    /// identified by `operation_uuid`.
    fn initiate(&self, operation_uuid: Uuid, expected_amount: Decimal) -> Result<(), String>;
}

/// Accepts every initiation. The default when the gateway is wired
/// elsewhere or in tests that confirm manually.
#[derive(Debug, Default)]
pub struct AcceptingGateway;

impl PaymentGateway for AcceptingGateway {
    fn initiate(&self, _operation_uuid: Uuid, _expected_amount: Decimal) -> Result<(), String> {
        Ok(())
    }
}

/// Rejects every initiation; for exercising the rollback path.
#[derive(Debug, Default)]
pub struct UnavailableGateway;

impl PaymentGateway for UnavailableGateway {
    fn initiate(&self, _operation_uuid: Uuid, _expected_amount: Decimal) -> Result<(), String> {
        Err("gateway unreachable".to_string())
    }
}
