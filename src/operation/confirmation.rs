//! Out-of-band confirmation gating.
//!
//! One `OperationConfirmation` row exists per required destination. An
//! operation with zero live rows counts as confirmed; resolving a code
//! deletes its row, and deleting the last one triggers `apply()`. Codes
//! expire after the configured validity window and an expired code can only
//! fail, never extend.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{ConfirmationId, OperationId};

/// Where the confirmation code is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationDestination {
    Email,
    Telegram,
}

impl ConfirmationDestination {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationDestination::Email => "email",
            ConfirmationDestination::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ConfirmationDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationConfirmation {
    pub id: ConfirmationId,
    pub operation: OperationId,
    pub destination: ConfirmationDestination,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

impl OperationConfirmation {
    pub fn new(
        id: ConfirmationId,
        operation: OperationId,
        destination: ConfirmationDestination,
        code_length: u32,
    ) -> Self {
        Self {
            id,
            operation,
            destination,
            code: generate_code(code_length),
            created_at: Utc::now(),
        }
    }

    /// True once the validity window has passed.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_minutes: i64) -> bool {
        now > self.created_at + Duration::minutes(ttl_minutes)
    }

    pub fn matches(&self, code: &str) -> bool {
        self.code == code
    }
}

/// Generate a zero-padded numeric code of the given length.
fn generate_code(length: u32) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_shape() {
        let code = generate_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_expiry_window() {
        let conf = OperationConfirmation::new(1, 1, ConfirmationDestination::Email, 6);
        let now = conf.created_at;
        assert!(!conf.is_expired(now + Duration::minutes(14), 15));
        assert!(conf.is_expired(now + Duration::minutes(16), 15));
    }

    #[test]
    fn test_code_match() {
        let conf = OperationConfirmation::new(1, 1, ConfirmationDestination::Telegram, 6);
        let code = conf.code.clone();
        assert!(conf.matches(&code));
        assert!(!conf.matches("not-a-code"));
    }
}
