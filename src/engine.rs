//! The Ledger - operation engine and single owner of ledger state.
//!
//! All mutation flows through here: an external request layer (or the
//! scheduler) creates a typed operation, the post-create sequence decides
//! whether confirmation gates it, and `apply` runs the kind-specific
//! handler. Each apply stages a copy of the state and commits only on
//! success; notifications collected during a handler are dispatched after
//! the commit, best-effort.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core_types::*;
use crate::error::LedgerError;
use crate::gateway::PaymentGateway;
use crate::money::{apply_commission, pct_of, quantize, safe_zero_div};
use crate::notifier::{Notification, Notifier};
use crate::operation::confirmation::{ConfirmationDestination, OperationConfirmation};
use crate::operation::history::{HistoryKind, MessageType, OperationHistory};
use crate::operation::types::{Operation, OperationKind, OperationParams, OperationState};
use crate::program::{
    Program, ReplenishmentStatus, UserProgram, UserProgramReplenishment, UserProgramStatus,
    WithdrawalType, derive_run_name,
};
use crate::settings::{ResolvedSettings, WalletSettings};
use crate::store::LedgerState;
use crate::wallet::Wallet;
use crate::withdrawal::{WithdrawalRequest, WithdrawalStatus};

/// Side effects collected while a handler runs inside the staged state.
/// Dispatched only after the transaction commits.
#[derive(Debug, Default)]
pub(crate) struct TxnOutput {
    pub notifications: Vec<Notification>,
}

pub struct Ledger {
    state: LedgerState,
    config: AppConfig,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn PaymentGateway>,
}

impl Ledger {
    pub fn new(
        config: AppConfig,
        notifier: Arc<dyn Notifier>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            state: LedgerState::default(),
            config,
            notifier,
            gateway,
        }
    }

    /// Read-only view of the ledger state.
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ============================================================
    // Transaction boundary
    // ============================================================

    /// Run `f` against a staged copy of the state; commit by replacement on
    /// success, discard on error. The in-memory equivalent of one database
    /// transaction.
    pub(crate) fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut LedgerState, &AppConfig) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut staged = self.state.clone();
        match f(&mut staged, &self.config) {
            Ok(value) => {
                self.state = staged;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort delivery after commit. Failures are logged, never
    /// propagated.
    pub(crate) fn dispatch_notifications(&self, notifications: Vec<Notification>) {
        for n in notifications {
            if let Err(e) = self.notifier.notify(&n) {
                warn!(wallet = n.wallet, error = %e, "notification delivery failed");
            }
        }
    }

    // ============================================================
    // Admin surface
    // ============================================================

    pub fn create_wallet(&mut self, user_id: UserId) -> WalletId {
        let id = self.state.next_id();
        self.state.wallets.insert(id, Wallet::new(id, user_id));
        id
    }

    pub fn set_wallet_settings(&mut self, wallet: WalletId, settings: WalletSettings) {
        self.state.wallet_settings.insert(wallet, settings);
    }

    pub fn create_program(&mut self, template: ProgramTemplate) -> ProgramId {
        let id = self.state.next_id();
        self.state.programs.insert(
            id,
            Program {
                id,
                name: template.name,
                min_deposit: template.min_deposit,
                min_replenishment: template.min_replenishment,
                duration_months: template.duration_months,
                accrual_type: template.accrual_type,
                withdrawal_type: template.withdrawal_type,
            },
        );
        id
    }

    /// Direct balance mutation for admin tooling and funding in tests.
    pub fn update_balance(
        &mut self,
        wallet: WalletId,
        free_delta: Decimal,
        frozen_delta: Decimal,
    ) -> Result<(), LedgerError> {
        let today = Utc::now().date_naive();
        self.transact(|state, config| {
            state.update_balance(
                wallet,
                free_delta,
                frozen_delta,
                today,
                config.frozen.defrost_delay_days,
            )
        })
    }

    // ============================================================
    // Operation lifecycle
    // ============================================================

    /// Create an operation and run the explicit post-create sequence:
    /// confirmation rows when the wallet's 2FA settings require them,
    /// gateway initiation for replenishments, immediate apply otherwise.
    pub fn create_operation(&mut self, params: OperationParams) -> Result<OperationId, LedgerError> {
        let today = Utc::now().date_naive();
        let gateway = Arc::clone(&self.gateway);
        let (op_id, notifications) = self.transact(move |state, config| {
            let mut output = TxnOutput::default();
            let op = Self::build_operation(state, config, &params)?;
            let op_id = op.id;
            let kind = op.kind;
            let wallet = op.wallet;
            let uuid = op.uuid;
            let gateway_charge = op.amount_net;
            state.operations.insert(op_id, op);

            let destinations = Self::required_destinations(state, config, kind, wallet);
            if destinations.is_empty() {
                if kind == OperationKind::Replenishment {
                    // Initiation failure aborts the stage: the operation is
                    // discarded and the caller retries.
                    let expected = gateway_charge.unwrap_or(Decimal::ZERO);
                    gateway
                        .initiate(uuid, expected)
                        .map_err(LedgerError::GatewayUnavailable)?;
                }
                state.operation_mut(op_id)?.state = OperationState::Confirmed;
                Self::apply_in_stage(state, config, op_id, today, &mut output)?;
            } else {
                for destination in destinations {
                    let id = state.next_id();
                    let row = OperationConfirmation::new(
                        id,
                        op_id,
                        destination,
                        config.confirmation.code_length,
                    );
                    output.notifications.push(Notification {
                        wallet,
                        message_type: MessageType::ConfirmationCode,
                        insertion_data: json!({
                            "destination": destination.as_str(),
                            "code": row.code.clone(),
                            "operation": uuid.to_string(),
                        }),
                    });
                    state.confirmations.insert(id, row);
                }
                state.operation_mut(op_id)?.state = OperationState::ConfirmationPending;
            }
            Ok((op_id, output.notifications))
        })?;
        self.dispatch_notifications(notifications);
        Ok(op_id)
    }

    /// Resolve one confirmation code. The matched row is deleted; deleting
    /// the last row fires `apply`. Wrong or expired codes leave the
    /// operation pending.
    pub fn confirm(
        &mut self,
        op_id: OperationId,
        destination: ConfirmationDestination,
        code: &str,
    ) -> Result<OperationState, LedgerError> {
        let now = Utc::now();
        let today = now.date_naive();
        let (new_state, notifications) = self.transact(|state, config| {
            let mut output = TxnOutput::default();
            let op_state = state.operation(op_id)?.state;
            if op_state != OperationState::ConfirmationPending {
                return Err(LedgerError::NotAwaitingConfirmation);
            }
            let row = state
                .confirmations
                .values()
                .find(|c| c.operation == op_id && c.destination == destination)
                .cloned()
                .ok_or(LedgerError::UnknownDestination)?;
            if row.is_expired(now, config.confirmation.ttl_minutes) {
                return Err(LedgerError::CodeExpired);
            }
            if !row.matches(code) {
                return Err(LedgerError::WrongCode);
            }
            state.confirmations.remove(&row.id);

            if state.confirmations_of(op_id).is_empty() {
                state.operation_mut(op_id)?.state = OperationState::Confirmed;
                Self::apply_in_stage(state, config, op_id, today, &mut output)?;
            }
            Ok((state.operation(op_id)?.state, output.notifications))
        })?;
        self.dispatch_notifications(notifications);
        Ok(new_state)
    }

    /// Admin approval of a pending withdrawal: the payout leaves for the
    /// external chain and the originating operation finally flips done.
    pub fn approve_withdrawal(
        &mut self,
        request_id: WithdrawalRequestId,
        as_of: NaiveDate,
    ) -> Result<(), LedgerError> {
        let notifications = self.transact(|state, _config| {
            let request = state
                .withdrawal_requests
                .get_mut(&request_id)
                .ok_or(LedgerError::WithdrawalRequestNotFound(request_id))?;
            if !request.is_pending() {
                return Err(LedgerError::InvalidStatus(format!(
                    "withdrawal request {} is already {}",
                    request_id,
                    request.status.as_str()
                )));
            }
            request.approve(as_of);
            let (wallet, amount, operation) = (request.wallet, request.amount, request.operation);
            state.operation_mut(operation)?.done = true;
            state.operation_history.push(OperationHistory::new(
                wallet,
                HistoryKind::WalletDebit,
                MessageType::WithdrawalApproved,
                json!({ "amount": amount.to_string() }),
                None,
                Some(amount),
            ));
            Ok(vec![Notification {
                wallet,
                message_type: MessageType::WithdrawalApproved,
                insertion_data: json!({ "amount": amount.to_string() }),
            }])
        })?;
        self.dispatch_notifications(notifications);
        Ok(())
    }

    /// Gateway callback for a replenishment: credit the fee-adjusted amount
    /// actually paid and realize the commission.
    pub fn confirm_replenishment(
        &mut self,
        op_id: OperationId,
        actual_amount: Decimal,
    ) -> Result<(), LedgerError> {
        let today = Utc::now().date_naive();
        let notifications = self.transact(|state, config| {
            let op = state.operation(op_id)?.clone();
            if op.kind != OperationKind::Replenishment {
                return Err(LedgerError::InvalidStatus(format!(
                    "operation {} is a {}, not a replenishment",
                    op_id, op.kind
                )));
            }
            if op.done {
                return Err(LedgerError::AlreadyApplied(op_id));
            }
            if actual_amount <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount);
            }
            let settings = Self::resolved_settings(state, config, op.wallet);
            let rate = settings.replenishment_fee_pct / Decimal::ONE_HUNDRED;
            let credited = quantize(actual_amount / (Decimal::ONE + rate));
            state.update_balance(
                op.wallet,
                credited,
                Decimal::ZERO,
                today,
                config.frozen.defrost_delay_days,
            )?;
            state
                .commissions
                .post(op_id, op.kind, quantize(actual_amount - credited));
            let op_mut = state.operation_mut(op_id)?;
            op_mut.done = true;
            op_mut.amount_net = Some(credited);
            state.operation_history.push(OperationHistory::new(
                op.wallet,
                HistoryKind::WalletCredit,
                MessageType::ReplenishmentCredited,
                json!({ "amount": credited.to_string() }),
                None,
                Some(credited),
            ));
            Ok(vec![Notification {
                wallet: op.wallet,
                message_type: MessageType::ReplenishmentCredited,
                insertion_data: json!({ "amount": credited.to_string() }),
            }])
        })?;
        self.dispatch_notifications(notifications);
        Ok(())
    }

    // ============================================================
    // Creation: validation and field derivation
    // ============================================================

    pub(crate) fn resolved_settings(
        state: &LedgerState,
        config: &AppConfig,
        wallet: WalletId,
    ) -> ResolvedSettings {
        state
            .wallet_settings
            .get(&wallet)
            .copied()
            .unwrap_or_default()
            .resolve(&config.fees)
    }

    fn required_destinations(
        state: &LedgerState,
        config: &AppConfig,
        kind: OperationKind,
        wallet: WalletId,
    ) -> Vec<ConfirmationDestination> {
        let settings = Self::resolved_settings(state, config, wallet);
        let (email, telegram) = if kind.requires_operation_confirmation() {
            (
                settings.confirm_on_operation_email,
                settings.confirm_on_operation_telegram,
            )
        } else if kind == OperationKind::Transfer {
            (
                settings.confirm_on_transfer_email,
                settings.confirm_on_transfer_telegram,
            )
        } else {
            (false, false)
        };
        let mut destinations = Vec::new();
        if email {
            destinations.push(ConfirmationDestination::Email);
        }
        if telegram {
            destinations.push(ConfirmationDestination::Telegram);
        }
        destinations
    }

    /// Validate the request and derive the operation's amount fields.
    /// No state mutates here beyond id allocation.
    pub(crate) fn build_operation(
        state: &mut LedgerState,
        config: &AppConfig,
        params: &OperationParams,
    ) -> Result<Operation, LedgerError> {
        let id = state.next_id();
        let mut op = Operation::new(id, params.kind(), params.wallet());
        state.wallet(op.wallet)?;

        match *params {
            OperationParams::Replenishment { wallet, amount } => {
                require_positive(amount)?;
                let settings = Self::resolved_settings(state, config, wallet);
                let out = apply_commission(&[amount], settings.replenishment_fee_pct, false);
                op.amount = Some(quantize(amount));
                op.commission = Some(out.commission);
                // The gateway collects the fee-on-top total.
                op.amount_net = Some(out.amount_net);
            }
            OperationParams::Withdrawal { wallet, amount } => {
                require_positive(amount)?;
                let free = state.wallet(wallet)?.free();
                if free < amount {
                    return Err(LedgerError::InsufficientFunds {
                        wallet,
                        needed: amount,
                        available: free,
                    });
                }
                let settings = Self::resolved_settings(state, config, wallet);
                let out = apply_commission(&[amount], settings.withdrawal_fee_pct, true);
                op.amount = Some(quantize(amount));
                op.commission = Some(out.commission);
                op.amount_net = Some(out.amount_net);
            }
            OperationParams::Transfer {
                sender,
                receiver,
                amount_free,
                amount_frozen,
            } => {
                if sender == receiver {
                    return Err(LedgerError::SelfTransfer);
                }
                if amount_free < Decimal::ZERO || amount_frozen < Decimal::ZERO {
                    return Err(LedgerError::InvalidAmount);
                }
                require_positive(amount_free + amount_frozen)?;
                state.wallet(receiver)?;
                let settings = Self::resolved_settings(state, config, sender);
                let out = apply_commission(
                    &[amount_free, amount_frozen],
                    settings.transfer_fee_pct,
                    false,
                );
                let (debit_free, debit_frozen) =
                    transfer_debits(amount_free, amount_frozen, out.commission);
                let w = state.wallet(sender)?;
                if w.free() < debit_free {
                    return Err(LedgerError::InsufficientFunds {
                        wallet: sender,
                        needed: debit_free,
                        available: w.free(),
                    });
                }
                if w.frozen() < debit_frozen {
                    return Err(LedgerError::InsufficientFunds {
                        wallet: sender,
                        needed: debit_frozen,
                        available: w.frozen(),
                    });
                }
                op.amount_free = Some(quantize(amount_free));
                op.amount_frozen = Some(quantize(amount_frozen));
                op.amount_net = Some(quantize(amount_free + amount_frozen));
                op.commission = Some(out.commission);
                op.sender = Some(sender);
                op.receiver = Some(receiver);
            }
            OperationParams::ProgramStart {
                wallet,
                program,
                amount_free,
                amount_frozen,
            } => {
                if amount_free < Decimal::ZERO || amount_frozen < Decimal::ZERO {
                    return Err(LedgerError::InvalidAmount);
                }
                let total = amount_free + amount_frozen;
                require_positive(total)?;
                let template = state.program(program)?;
                if total < template.min_deposit {
                    return Err(LedgerError::BelowMinimum {
                        amount: total,
                        minimum: template.min_deposit,
                    });
                }
                let w = state.wallet(wallet)?;
                if w.free() < amount_free || w.frozen() < amount_frozen {
                    return Err(LedgerError::InsufficientFunds {
                        wallet,
                        needed: total,
                        available: w.balance(),
                    });
                }
                op.amount_free = Some(quantize(amount_free));
                op.amount_frozen = Some(quantize(amount_frozen));
                op.program = Some(program);
            }
            OperationParams::ProgramReplenishment {
                wallet,
                user_program,
                amount,
            } => {
                require_positive(amount)?;
                let up = state.user_program(user_program)?;
                if !up.is_running() {
                    return Err(LedgerError::InvalidStatus(format!(
                        "user program {} is {}",
                        user_program, up.status
                    )));
                }
                let template = state.program(up.program)?;
                if let Some(minimum) = template.min_replenishment
                    && amount < minimum
                {
                    return Err(LedgerError::BelowMinimum {
                        amount,
                        minimum,
                    });
                }
                let free = state.wallet(wallet)?.free();
                if free < amount {
                    return Err(LedgerError::InsufficientFunds {
                        wallet,
                        needed: amount,
                        available: free,
                    });
                }
                op.amount = Some(quantize(amount));
                op.user_program = Some(user_program);
                op.program = Some(state.user_program(user_program)?.program);
            }
            OperationParams::ProgramReplenishmentCancel {
                wallet: _,
                replenishment,
                amount,
            } => {
                require_positive(amount)?;
                let repl = state.replenishment(replenishment)?;
                if !repl.is_pending() {
                    return Err(LedgerError::InvalidStatus(format!(
                        "replenishment {} is {}",
                        replenishment,
                        repl.status.as_str()
                    )));
                }
                if amount > repl.amount {
                    return Err(LedgerError::AmountMismatch(format!(
                        "cancel amount {} exceeds pending {}",
                        amount, repl.amount
                    )));
                }
                op.partial = amount < repl.amount;
                op.amount = Some(quantize(amount));
                op.replenishment = Some(replenishment);
                op.user_program = Some(repl.user_program);
            }
            OperationParams::ProgramClosure {
                wallet: _,
                user_program,
                amount,
                early,
            } => {
                require_positive(amount)?;
                let up = state.user_program(user_program)?;
                if !up.is_running() {
                    return Err(LedgerError::InvalidStatus(format!(
                        "user program {} is {}",
                        user_program, up.status
                    )));
                }
                if amount > up.deposit {
                    return Err(LedgerError::AmountMismatch(format!(
                        "closure amount {} exceeds deposit {}",
                        amount, up.deposit
                    )));
                }
                op.partial = amount < up.deposit;
                op.early_closure = early;
                op.amount = Some(quantize(amount));
                op.user_program = Some(user_program);
                op.program = Some(up.program);
            }
            OperationParams::Defrost {
                wallet,
                frozen_item,
                forced,
            } => {
                let item = state.frozen_item(frozen_item)?;
                if item.wallet != wallet {
                    return Err(LedgerError::FrozenItemNotFound(frozen_item));
                }
                if !item.is_live() {
                    return Err(LedgerError::InvalidStatus(format!(
                        "frozen item {} is {}",
                        frozen_item,
                        item.status.as_str()
                    )));
                }
                op.amount = Some(item.amount);
                op.frozen_item = Some(frozen_item);
                op.forced = forced;
            }
            OperationParams::ExtraFeeWriteoff { wallet, amount } => {
                require_positive(amount)?;
                let free = state.wallet(wallet)?.free();
                if free < amount {
                    return Err(LedgerError::InsufficientFunds {
                        wallet,
                        needed: amount,
                        available: free,
                    });
                }
                op.amount = Some(quantize(amount));
            }
            OperationParams::ProgramAccrual {
                wallet: _,
                user_program,
                amount,
            } => {
                state.user_program(user_program)?;
                op.amount = Some(quantize(amount));
                op.user_program = Some(user_program);
                op.program = Some(state.user_program(user_program)?.program);
            }
        }
        Ok(op)
    }

    // ============================================================
    // Apply: dispatch and handlers
    // ============================================================

    /// Apply a confirmed operation inside the current stage and mark it
    /// Applied. `done` comes from the handler.
    pub(crate) fn apply_in_stage(
        state: &mut LedgerState,
        config: &AppConfig,
        op_id: OperationId,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<(), LedgerError> {
        let op = state.operation(op_id)?.clone();
        if op.state == OperationState::Applied {
            return Err(LedgerError::AlreadyApplied(op_id));
        }
        let done = Self::run_handler(state, config, &op, today, output)?;
        let op_mut = state.operation_mut(op_id)?;
        op_mut.done = done;
        op_mut.state = OperationState::Applied;
        info!(
            operation = op_id,
            kind = op.kind.as_str(),
            wallet = op.wallet,
            done,
            "operation applied"
        );
        Ok(())
    }

    /// Create a sub-operation from within a running handler and apply it in
    /// the same stage (closure-spawned cancels, forced-defrost fees).
    fn spawn_in_stage(
        state: &mut LedgerState,
        config: &AppConfig,
        params: OperationParams,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<OperationId, LedgerError> {
        let op = Self::build_operation(state, config, &params)?;
        let op_id = op.id;
        state.operations.insert(op_id, op);
        state.operation_mut(op_id)?.state = OperationState::Confirmed;
        Self::apply_in_stage(state, config, op_id, today, output)?;
        Ok(op_id)
    }

    /// The type dispatch: one arm per kind, exhaustive.
    fn run_handler(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        match op.kind {
            OperationKind::Replenishment => Self::handle_replenishment(state, op, output),
            OperationKind::Withdrawal => Self::handle_withdrawal(state, config, op, today, output),
            OperationKind::Transfer => Self::handle_transfer(state, config, op, today, output),
            OperationKind::ProgramStart => {
                Self::handle_program_start(state, config, op, today, output)
            }
            OperationKind::ProgramReplenishment => {
                Self::handle_program_replenishment(state, config, op, today, output)
            }
            OperationKind::ProgramReplenishmentCancel => {
                Self::handle_replenishment_cancel(state, config, op, today, output)
            }
            OperationKind::ProgramClosure => {
                Self::handle_program_closure(state, config, op, today, output)
            }
            OperationKind::Defrost => Self::handle_defrost(state, config, op, today, output),
            OperationKind::ExtraFeeWriteoff => {
                Self::handle_extra_fee_writeoff(state, config, op, today, output)
            }
            OperationKind::ProgramAccrual => {
                Self::handle_program_accrual(state, config, op, today, output)
            }
        }
    }

    /// No funds move yet; the gateway confirmation callback credits later.
    fn handle_replenishment(
        state: &mut LedgerState,
        op: &Operation,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let amount = required_amount(op)?;
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::WalletCredit,
            MessageType::ReplenishmentInitiated,
            json!({ "amount": amount.to_string() }),
            None,
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::ReplenishmentInitiated,
            insertion_data: json!({ "amount": amount.to_string() }),
        });
        Ok(false)
    }

    /// Debit now, pay out on admin approval.
    fn handle_withdrawal(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let amount = required_amount(op)?;
        let commission = op.commission.unwrap_or(Decimal::ZERO);
        let net = op.amount_net.unwrap_or(amount);
        state.update_balance(
            op.wallet,
            -amount,
            Decimal::ZERO,
            today,
            config.frozen.defrost_delay_days,
        )?;
        let request_id = state.next_id();
        state.withdrawal_requests.insert(
            request_id,
            WithdrawalRequest {
                id: request_id,
                operation: op.id,
                wallet: op.wallet,
                original_amount: amount,
                commission,
                amount: net,
                status: WithdrawalStatus::Pending,
                done_at: None,
            },
        );
        state.commissions.post(op.id, op.kind, commission);
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::WalletDebit,
            MessageType::WithdrawalRequested,
            json!({ "amount": amount.to_string(), "net": net.to_string() }),
            None,
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::WithdrawalRequested,
            insertion_data: json!({ "amount": amount.to_string() }),
        });
        Ok(false)
    }

    /// Receiver is credited before the sender's commission entry is written.
    fn handle_transfer(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let sender = op.sender.ok_or_else(|| missing_field(op, "sender"))?;
        let receiver = op.receiver.ok_or_else(|| missing_field(op, "receiver"))?;
        let amount_free = op.amount_free.unwrap_or(Decimal::ZERO);
        let amount_frozen = op.amount_frozen.unwrap_or(Decimal::ZERO);
        let commission = op.commission.unwrap_or(Decimal::ZERO);
        let (debit_free, debit_frozen) = transfer_debits(amount_free, amount_frozen, commission);
        let delay = config.frozen.defrost_delay_days;

        state.update_balance(receiver, amount_free, amount_frozen, today, delay)?;
        state.update_balance(sender, -debit_free, -debit_frozen, today, delay)?;
        state.commissions.post(op.id, op.kind, commission);

        let total = amount_free + amount_frozen;
        state.operation_history.push(OperationHistory::new(
            receiver,
            HistoryKind::WalletCredit,
            MessageType::TransferReceived,
            json!({ "amount": total.to_string() }),
            None,
            Some(total),
        ));
        state.operation_history.push(OperationHistory::new(
            sender,
            HistoryKind::WalletDebit,
            MessageType::TransferSent,
            json!({ "amount": total.to_string() }),
            None,
            Some(total),
        ));
        state.operation_history.push(OperationHistory::new(
            sender,
            HistoryKind::Commission,
            MessageType::CommissionCharged,
            json!({ "amount": commission.to_string() }),
            None,
            Some(commission),
        ));
        output.notifications.push(Notification {
            wallet: receiver,
            message_type: MessageType::TransferReceived,
            insertion_data: json!({ "amount": total.to_string() }),
        });
        output.notifications.push(Notification {
            wallet: sender,
            message_type: MessageType::TransferSent,
            insertion_data: json!({ "amount": total.to_string() }),
        });
        Ok(true)
    }

    fn handle_program_start(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let program_id = op.program.ok_or_else(|| missing_field(op, "program"))?;
        let amount_free = op.amount_free.unwrap_or(Decimal::ZERO);
        let amount_frozen = op.amount_frozen.unwrap_or(Decimal::ZERO);
        let deposit = amount_free + amount_frozen;

        state.update_balance(
            op.wallet,
            -amount_free,
            -amount_frozen,
            today,
            config.frozen.defrost_delay_days,
        )?;
        let template = state.program(program_id)?.clone();
        let name = derive_run_name(&template.name, state.run_count(op.wallet, program_id));
        let up_id = state.next_id();
        let mut run =
            UserProgram::new(up_id, op.wallet, &template, name.clone(), deposit, today, Utc::now());
        run.activate();
        state.user_programs.insert(up_id, run);
        state.operation_mut(op.id)?.user_program = Some(up_id);
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::Program,
            MessageType::ProgramStarted,
            json!({ "amount": deposit.to_string(), "name": name.clone() }),
            Some(name.clone()),
            Some(deposit),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::ProgramStarted,
            insertion_data: json!({ "amount": deposit.to_string(), "name": name }),
        });
        Ok(true)
    }

    /// The top-up is debited now and applied to the deposit by the
    /// scheduler once the apply date arrives.
    fn handle_program_replenishment(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let up_id = op
            .user_program
            .ok_or_else(|| missing_field(op, "user_program"))?;
        let amount = required_amount(op)?;
        state.update_balance(
            op.wallet,
            -amount,
            Decimal::ZERO,
            today,
            config.frozen.defrost_delay_days,
        )?;
        let repl_id = state.next_id();
        state.replenishments.insert(
            repl_id,
            UserProgramReplenishment::new(
                repl_id,
                up_id,
                amount,
                today,
                config.replenishment.apply_delay_business_days,
            ),
        );
        state.operation_mut(op.id)?.replenishment = Some(repl_id);
        let name = state.user_program(up_id)?.name.clone();
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::Program,
            MessageType::ProgramReplenishmentPending,
            json!({ "amount": amount.to_string(), "name": name.clone() }),
            Some(name.clone()),
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::ProgramReplenishmentPending,
            insertion_data: json!({ "amount": amount.to_string(), "name": name }),
        });
        Ok(false)
    }

    /// Refund goes to frozen, honoring the defrost delay.
    fn handle_replenishment_cancel(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let repl_id = op
            .replenishment
            .ok_or_else(|| missing_field(op, "replenishment"))?;
        let amount = required_amount(op)?;
        if op.partial {
            state.replenishment_mut(repl_id)?.decrease(amount);
        } else {
            state.replenishment_mut(repl_id)?.status = ReplenishmentStatus::Canceled;
        }
        state.update_balance(
            op.wallet,
            Decimal::ZERO,
            amount,
            today,
            config.frozen.defrost_delay_days,
        )?;
        let name = op
            .user_program
            .and_then(|id| state.user_programs.get(&id))
            .map(|up| up.name.clone());
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::Program,
            MessageType::ProgramReplenishmentCanceled,
            json!({ "amount": amount.to_string() }),
            name,
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::ProgramReplenishmentCanceled,
            insertion_data: json!({ "amount": amount.to_string() }),
        });
        Ok(true)
    }

    /// Partial closure shrinks the deposit; full closure finishes the run,
    /// pays out remaining funds and cancels still-pending top-ups.
    fn handle_program_closure(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let up_id = op
            .user_program
            .ok_or_else(|| missing_field(op, "user_program"))?;
        let amount = required_amount(op)?;
        let delay = config.frozen.defrost_delay_days;

        let (payout, message_type, name) = if op.partial {
            let up = state.user_program_mut(up_id)?;
            up.deposit = quantize(up.deposit - amount);
            (amount, MessageType::ProgramPartiallyClosed, up.name.clone())
        } else {
            let pays_daily = {
                let up = state.user_program(up_id)?;
                matches!(
                    state.program(up.program)?.withdrawal_type,
                    WithdrawalType::Daily
                )
            };
            let up = state.user_program_mut(up_id)?;
            // Daily-payout programs already paid positive profit to the
            // wallet at accrual time; only losses remain in the run.
            // After-finish programs pay the whole profit here.
            let retained_profit = if pays_daily {
                up.profit.min(Decimal::ZERO)
            } else {
                up.profit
            };
            let payout = quantize(up.deposit + retained_profit).max(Decimal::ZERO);
            up.status = UserProgramStatus::Finished;
            up.close_date = Some(today);
            let name = up.name.clone();

            // Pending top-ups cannot apply to a finished run; spawn their
            // cancel operations in the same transaction.
            let pending: Vec<(ReplenishmentId, Decimal)> = state
                .replenishments
                .values()
                .filter(|r| r.user_program == up_id && r.is_pending())
                .map(|r| (r.id, r.amount))
                .collect();
            for (repl_id, repl_amount) in pending {
                Self::spawn_in_stage(
                    state,
                    config,
                    OperationParams::ProgramReplenishmentCancel {
                        wallet: op.wallet,
                        replenishment: repl_id,
                        amount: repl_amount,
                    },
                    today,
                    output,
                )?;
            }
            (payout, MessageType::ProgramClosed, name)
        };

        state.update_balance(op.wallet, Decimal::ZERO, payout, today, delay)?;
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::Program,
            message_type,
            json!({
                "amount": payout.to_string(),
                "name": name.clone(),
                "early": op.early_closure,
            }),
            Some(name.clone()),
            Some(payout),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type,
            insertion_data: json!({ "amount": payout.to_string(), "name": name }),
        });
        Ok(true)
    }

    /// Release one parcel into free balance; a forced release also charges
    /// the early-defrost penalty as a paired write-off.
    fn handle_defrost(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let item_id = op
            .frozen_item
            .ok_or_else(|| missing_field(op, "frozen_item"))?;
        let amount = state.release_frozen_item(item_id, op.wallet)?;
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::WalletCredit,
            MessageType::FundsDefrosted,
            json!({ "amount": amount.to_string(), "forced": op.forced }),
            None,
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::FundsDefrosted,
            insertion_data: json!({ "amount": amount.to_string() }),
        });
        if op.forced {
            let settings = Self::resolved_settings(state, config, op.wallet);
            let fee = quantize(pct_of(amount, settings.early_defrost_fee_pct));
            if fee > Decimal::ZERO {
                Self::spawn_in_stage(
                    state,
                    config,
                    OperationParams::ExtraFeeWriteoff {
                        wallet: op.wallet,
                        amount: fee,
                    },
                    today,
                    output,
                )?;
            }
        }
        Ok(true)
    }

    fn handle_extra_fee_writeoff(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let amount = required_amount(op)?;
        state.update_balance(
            op.wallet,
            -amount,
            Decimal::ZERO,
            today,
            config.frozen.defrost_delay_days,
        )?;
        state.commissions.post(op.id, op.kind, amount);
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::Commission,
            MessageType::ExtraFeeCharged,
            json!({ "amount": amount.to_string() }),
            None,
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::ExtraFeeCharged,
            insertion_data: json!({ "amount": amount.to_string() }),
        });
        Ok(true)
    }

    /// Profit lands on the program; daily-payout programs also credit the
    /// wallet for non-negative amounts. Losses only erode funds via profit.
    fn handle_program_accrual(
        state: &mut LedgerState,
        config: &AppConfig,
        op: &Operation,
        today: NaiveDate,
        output: &mut TxnOutput,
    ) -> Result<bool, LedgerError> {
        let up_id = op
            .user_program
            .ok_or_else(|| missing_field(op, "user_program"))?;
        let amount = op.amount.ok_or_else(|| missing_field(op, "amount"))?;

        let up = state.user_program_mut(up_id)?;
        up.profit = quantize(up.profit + amount);
        let name = up.name.clone();
        let program_id = up.program;

        let pays_daily = matches!(
            state.program(program_id)?.withdrawal_type,
            WithdrawalType::Daily
        );
        if pays_daily && amount >= Decimal::ZERO {
            state.update_balance(
                op.wallet,
                amount,
                Decimal::ZERO,
                today,
                config.frozen.defrost_delay_days,
            )?;
        }
        state.operation_history.push(OperationHistory::new(
            op.wallet,
            HistoryKind::Program,
            MessageType::ProgramAccrued,
            json!({ "amount": amount.to_string(), "name": name.clone() }),
            Some(name.clone()),
            Some(amount),
        ));
        output.notifications.push(Notification {
            wallet: op.wallet,
            message_type: MessageType::ProgramAccrued,
            insertion_data: json!({ "amount": amount.to_string(), "name": name }),
        });
        Ok(true)
    }
}

/// Split a transfer's commission across the free/frozen components so the
/// sender's total debit is exactly `amount + commission`.
fn transfer_debits(
    amount_free: Decimal,
    amount_frozen: Decimal,
    commission: Decimal,
) -> (Decimal, Decimal) {
    let total = amount_free + amount_frozen;
    let free_share = quantize(commission * safe_zero_div(amount_free, total));
    let frozen_share = commission - free_share;
    (
        quantize(amount_free + free_share),
        quantize(amount_frozen + frozen_share),
    )
}

fn require_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn required_amount(op: &Operation) -> Result<Decimal, LedgerError> {
    op.amount.ok_or_else(|| missing_field(op, "amount"))
}

fn missing_field(op: &Operation, field: &str) -> LedgerError {
    LedgerError::InvalidStatus(format!(
        "operation {} ({}) is missing {}",
        op.id, op.kind, field
    ))
}

/// Program template fields for `Ledger::create_program`.
#[derive(Debug, Clone)]
pub struct ProgramTemplate {
    pub name: String,
    pub min_deposit: Decimal,
    pub min_replenishment: Option<Decimal>,
    pub duration_months: Option<u32>,
    pub accrual_type: crate::program::AccrualType,
    pub withdrawal_type: crate::program::WithdrawalType,
}
