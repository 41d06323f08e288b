//! Scheduled jobs.
//!
//! Each job takes an explicit `as_of` date and processes one unit of work
//! per transaction, so one bad record never blocks the rest of the day's
//! run. The intended daily order is accrual, due top-ups, scheduled
//! defrost, then snapshots.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::accrual::{UserProgramAccrual, compute_accrual};
use crate::core_types::{FrozenItemId, ReplenishmentId, UserProgramId, WalletId};
use crate::engine::{Ledger, TxnOutput};
use crate::error::LedgerError;
use crate::history::{UserProgramHistory, WalletHistory};
use crate::money::quantize;
use crate::notifier::Notification;
use crate::operation::history::{HistoryKind, MessageType, OperationHistory};
use crate::operation::types::{OperationKind, OperationParams, OperationState};
use crate::program::ReplenishmentStatus;

impl Ledger {
    /// Post one day's accrual to every running program at the fund-wide
    /// daily result rate. Holidays are skipped outright; a program that
    /// already has a row for `as_of` is skipped, so the job is safe to
    /// rerun after a partial failure.
    pub fn run_daily_accrual(
        &mut self,
        as_of: NaiveDate,
        daily_result_pct: Decimal,
    ) -> Result<usize, LedgerError> {
        if self.config().accrual.is_holiday(as_of) {
            info!(date = %as_of, "holiday, accrual skipped");
            return Ok(0);
        }

        let candidates: Vec<UserProgramId> = self
            .state()
            .user_programs
            .values()
            .filter(|up| up.is_running())
            .map(|up| up.id)
            .collect();

        let mut posted = 0;
        for up_id in candidates {
            if self.state().has_accrual(up_id, as_of) {
                continue;
            }
            let result = self.transact(|state, config| {
                let mut output = TxnOutput::default();
                let up = state.user_program(up_id)?.clone();
                let settings = Ledger::resolved_settings(state, config, up.wallet);
                let breakdown = compute_accrual(
                    up.funds(),
                    up.deposit,
                    daily_result_pct,
                    settings.success_fee_pct,
                    settings.management_fee_pct,
                );

                let accrual_id = state.next_id();
                state.accruals.insert(
                    accrual_id,
                    UserProgramAccrual {
                        id: accrual_id,
                        user_program: up_id,
                        date: as_of,
                        amount: breakdown.amount,
                        percent_amount: breakdown.percent_amount,
                        success_fee: breakdown.success_fee,
                        management_fee: breakdown.management_fee,
                    },
                );

                let op = Ledger::build_operation(
                    state,
                    config,
                    &OperationParams::ProgramAccrual {
                        wallet: up.wallet,
                        user_program: up_id,
                        amount: breakdown.amount,
                    },
                )?;
                let op_id = op.id;
                state.operations.insert(op_id, op);
                state.operation_mut(op_id)?.state = OperationState::Confirmed;
                Ledger::apply_in_stage(state, config, op_id, as_of, &mut output)?;

                state.commissions.post(
                    op_id,
                    OperationKind::ProgramAccrual,
                    quantize(breakdown.success_fee + breakdown.management_fee),
                );
                Ok(output.notifications)
            });
            match result {
                Ok(notifications) => {
                    self.dispatch_notifications(notifications);
                    posted += 1;
                }
                Err(e) => {
                    warn!(user_program = up_id, error = %e, "accrual failed, continuing");
                }
            }
        }
        Ok(posted)
    }

    /// Fold pending program top-ups whose apply date has arrived into their
    /// program's deposit.
    pub fn apply_due_replenishments(&mut self, as_of: NaiveDate) -> Result<usize, LedgerError> {
        let due: Vec<ReplenishmentId> = self
            .state()
            .replenishments
            .values()
            .filter(|r| r.is_pending() && r.apply_date <= as_of)
            .map(|r| r.id)
            .collect();

        let mut applied = 0;
        for repl_id in due {
            let result = self.transact(|state, _config| {
                let repl = state.replenishment(repl_id)?.clone();
                let up = state.user_program_mut(repl.user_program)?;
                if !up.is_running() {
                    // Closure should have canceled this; absorb the race.
                    warn!(
                        replenishment = repl_id,
                        user_program = repl.user_program,
                        "top-up due on a non-running program, canceling"
                    );
                    state.replenishment_mut(repl_id)?.status = ReplenishmentStatus::Canceled;
                    return Ok(Vec::new());
                }
                up.deposit = quantize(up.deposit + repl.amount);
                let (wallet, name) = (up.wallet, up.name.clone());
                state.replenishment_mut(repl_id)?.status = ReplenishmentStatus::Done;
                state.operation_history.push(OperationHistory::new(
                    wallet,
                    HistoryKind::Program,
                    MessageType::ProgramReplenished,
                    json!({ "amount": repl.amount.to_string(), "name": name.clone() }),
                    Some(name.clone()),
                    Some(repl.amount),
                ));
                Ok(vec![Notification {
                    wallet,
                    message_type: MessageType::ProgramReplenished,
                    insertion_data: json!({ "amount": repl.amount.to_string(), "name": name }),
                }])
            });
            match result {
                Ok(notifications) => {
                    self.dispatch_notifications(notifications);
                    applied += 1;
                }
                Err(e) => {
                    warn!(replenishment = repl_id, error = %e, "top-up apply failed, continuing");
                }
            }
        }
        Ok(applied)
    }

    /// Release every parcel whose defrost date has arrived. Releases go
    /// through the operation engine so each one leaves an audit trail.
    pub fn run_scheduled_defrost(&mut self, as_of: NaiveDate) -> Result<usize, LedgerError> {
        let due: Vec<(WalletId, FrozenItemId)> = self
            .state()
            .frozen_items
            .values()
            .filter(|i| i.is_live() && i.defrost_date <= as_of)
            .map(|i| (i.wallet, i.id))
            .collect();

        let mut released = 0;
        for (wallet, frozen_item) in due {
            match self.create_operation(OperationParams::Defrost {
                wallet,
                frozen_item,
                forced: false,
            }) {
                Ok(_) => released += 1,
                Err(e) => {
                    warn!(item = frozen_item, error = %e, "scheduled defrost failed, continuing");
                }
            }
        }
        Ok(released)
    }

    /// Append the daily denormalized snapshots, once per (entity, date).
    /// Runs after accrual so rows reflect post-accrual state.
    pub fn run_daily_snapshots(&mut self, as_of: NaiveDate) -> Result<usize, LedgerError> {
        self.transact(|state, _config| {
            let mut written = 0;

            let wallet_rows: Vec<WalletHistory> = state
                .wallets
                .values()
                .filter(|w| {
                    !state
                        .wallet_history
                        .iter()
                        .any(|h| h.wallet == w.id() && h.date == as_of)
                })
                .map(|w| WalletHistory {
                    wallet: w.id(),
                    date: as_of,
                    free: w.free(),
                    frozen: w.frozen(),
                    invested: state.invested_funds(w.id()),
                })
                .collect();
            written += wallet_rows.len();
            state.wallet_history.extend(wallet_rows);

            let program_rows: Vec<UserProgramHistory> = state
                .user_programs
                .values()
                .filter(|up| {
                    !state
                        .user_program_history
                        .iter()
                        .any(|h| h.user_program == up.id && h.date == as_of)
                })
                .map(|up| UserProgramHistory {
                    user_program: up.id,
                    date: as_of,
                    status: up.status,
                    deposit: up.deposit,
                    funds: up.funds(),
                    profit: up.profit,
                })
                .collect();
            written += program_rows.len();
            state.user_program_history.extend(program_rows);

            Ok(written)
        })
    }

    /// Drop confirmation rows whose code expired more than a housekeeping
    /// pass ago. The gated operations stay pending until recreated.
    pub fn sweep_expired_confirmations(&mut self) -> Result<usize, LedgerError> {
        let now = chrono::Utc::now();
        self.transact(|state, config| {
            let expired: Vec<u64> = state
                .confirmations
                .values()
                .filter(|c| c.is_expired(now, config.confirmation.ttl_minutes))
                .map(|c| c.id)
                .collect();
            let swept = expired.len();
            for id in expired {
                state.confirmations.remove(&id);
            }
            Ok(swept)
        })
    }
}
