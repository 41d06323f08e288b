//! Notification seam.
//!
//! Message delivery (email, messenger) is an external collaborator. The
//! engine collects notifications while a handler runs and dispatches them
//! only after the transaction commits; a delivery failure is logged and
//! never rolls the ledger back.

use serde_json::Value;

use crate::core_types::WalletId;
use crate::operation::MessageType;

/// One queued notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub wallet: WalletId,
    pub message_type: MessageType,
    pub insertion_data: Value,
}

/// Fire-and-forget delivery interface.
pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<(), String>;
}

/// Drops every notification. The default for embedders that wire delivery
/// elsewhere.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), String> {
        Ok(())
    }
}

/// Captures notifications for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), String> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}
