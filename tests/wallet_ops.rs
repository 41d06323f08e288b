//! Wallet-level operation flows: transfers, withdrawals, replenishments
//! and the confirmation gate.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fundcore::gateway::{AcceptingGateway, UnavailableGateway};
use fundcore::notifier::{NullNotifier, RecordingNotifier};
use fundcore::operation::confirmation::ConfirmationDestination;
use fundcore::operation::history::MessageType;
use fundcore::operation::types::{OperationParams, OperationState};
use fundcore::program::{AccrualType, WithdrawalType};
use fundcore::settings::WalletSettings;
use fundcore::{AppConfig, Ledger, LedgerError, ProgramTemplate};

fn ledger() -> Ledger {
    Ledger::new(
        AppConfig::default(),
        Arc::new(NullNotifier),
        Arc::new(AcceptingGateway),
    )
}

#[test]
fn transfer_conserves_balance_plus_commission() {
    let mut ledger = ledger();
    let alice = ledger.create_wallet(1);
    let bob = ledger.create_wallet(2);
    ledger.update_balance(alice, dec!(2000), Decimal::ZERO).unwrap();

    ledger
        .create_operation(OperationParams::Transfer {
            sender: alice,
            receiver: bob,
            amount_free: dec!(1000),
            amount_frozen: Decimal::ZERO,
        })
        .unwrap();

    // Sender pays 1000 plus the 3% fee on the grossed-up sum (30.90).
    assert_eq!(ledger.state().wallet(alice).unwrap().free(), dec!(969.10));
    assert_eq!(ledger.state().wallet(bob).unwrap().free(), dec!(1000.00));
    assert_eq!(ledger.state().commissions.total(), dec!(30.90));
}

#[test]
fn transfer_with_frozen_component_splits_commission() {
    let mut ledger = ledger();
    let alice = ledger.create_wallet(1);
    let bob = ledger.create_wallet(2);
    ledger.update_balance(alice, dec!(1000), dec!(500)).unwrap();

    ledger
        .create_operation(OperationParams::Transfer {
            sender: alice,
            receiver: bob,
            amount_free: dec!(600),
            amount_frozen: dec!(400),
        })
        .unwrap();

    let sender = ledger.state().wallet(alice).unwrap();
    let receiver = ledger.state().wallet(bob).unwrap();
    // Commission 30.90, split pro-rata: 18.54 from free, 12.36 from frozen.
    assert_eq!(sender.free(), dec!(381.46));
    assert_eq!(sender.frozen(), dec!(87.64));
    assert_eq!(receiver.free(), dec!(600.00));
    assert_eq!(receiver.frozen(), dec!(400.00));
    // The receiver's frozen credit is a fresh parcel.
    assert_eq!(ledger.state().live_frozen_items(bob).len(), 1);

    let sender_out = sender.free() + sender.frozen();
    let receiver_in = receiver.free() + receiver.frozen();
    assert_eq!(dec!(1500) - sender_out, receiver_in + dec!(30.90));
}

#[test]
fn transfer_rejections() {
    let mut ledger = ledger();
    let alice = ledger.create_wallet(1);
    let bob = ledger.create_wallet(2);
    ledger.update_balance(alice, dec!(100), Decimal::ZERO).unwrap();

    let err = ledger
        .create_operation(OperationParams::Transfer {
            sender: alice,
            receiver: alice,
            amount_free: dec!(10),
            amount_frozen: Decimal::ZERO,
        })
        .unwrap_err();
    assert_eq!(err, LedgerError::SelfTransfer);

    let err = ledger
        .create_operation(OperationParams::Transfer {
            sender: alice,
            receiver: bob,
            amount_free: dec!(100),
            amount_frozen: Decimal::ZERO,
        })
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_FUNDS");

    // Nothing moved on either rejection.
    assert_eq!(ledger.state().wallet(alice).unwrap().free(), dec!(100));
    assert!(ledger.state().operations.is_empty());
}

#[test]
fn withdrawal_debits_now_and_pays_on_approval() {
    let mut ledger = ledger();
    let w = ledger.create_wallet(1);
    ledger.update_balance(w, dec!(1000), Decimal::ZERO).unwrap();

    let op_id = ledger
        .create_operation(OperationParams::Withdrawal {
            wallet: w,
            amount: dec!(500),
        })
        .unwrap();

    // Funds leave immediately; the request waits for the admin.
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(500.00));
    let op = ledger.state().operation(op_id).unwrap();
    assert_eq!(op.state, OperationState::Applied);
    assert!(!op.done);

    let request = ledger
        .state()
        .withdrawal_requests
        .values()
        .next()
        .unwrap()
        .clone();
    assert_eq!(request.original_amount, dec!(500));
    assert_eq!(request.commission, dec!(10.00));
    assert_eq!(request.amount, dec!(490.00));
    assert!(request.is_pending());
    assert_eq!(ledger.state().commissions.total(), dec!(10.00));

    let day = chrono::NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
    ledger.approve_withdrawal(request.id, day).unwrap();
    let request = ledger.state().withdrawal_requests[&request.id].clone();
    assert!(!request.is_pending());
    assert_eq!(request.done_at, Some(day));
    assert!(ledger.state().operation(op_id).unwrap().done);

    // A second approval is rejected.
    assert!(ledger.approve_withdrawal(request.id, day).is_err());
}

#[test]
fn withdrawal_rejected_over_free_balance() {
    let mut ledger = ledger();
    let w = ledger.create_wallet(1);
    ledger.update_balance(w, dec!(100), dec!(400)).unwrap();

    // Frozen funds do not back a withdrawal.
    let err = ledger
        .create_operation(OperationParams::Withdrawal {
            wallet: w,
            amount: dec!(200),
        })
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(100));
}

#[test]
fn confirmation_gates_withdrawal_until_every_code_resolves() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut ledger = Ledger::new(
        AppConfig::default(),
        notifier.clone(),
        Arc::new(AcceptingGateway),
    );
    let w = ledger.create_wallet(1);
    ledger.update_balance(w, dec!(1000), Decimal::ZERO).unwrap();
    ledger.set_wallet_settings(
        w,
        WalletSettings {
            confirm_on_operation_email: Some(true),
            confirm_on_operation_telegram: Some(true),
            ..WalletSettings::default()
        },
    );

    let op_id = ledger
        .create_operation(OperationParams::Withdrawal {
            wallet: w,
            amount: dec!(500),
        })
        .unwrap();

    // Pending: nothing debited, one code per destination delivered.
    assert_eq!(
        ledger.state().operation(op_id).unwrap().state,
        OperationState::ConfirmationPending
    );
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(1000));
    let codes: Vec<(ConfirmationDestination, String)> = ledger
        .state()
        .confirmations_of(op_id)
        .iter()
        .map(|c| (c.destination, c.code.clone()))
        .collect();
    assert_eq!(codes.len(), 2);
    let code_messages = notifier
        .sent()
        .iter()
        .filter(|n| n.message_type == MessageType::ConfirmationCode)
        .count();
    assert_eq!(code_messages, 2);

    // Wrong code leaves the operation pending, row intact.
    let err = ledger
        .confirm(op_id, codes[0].0, "000000-not-a-code")
        .unwrap_err();
    assert_eq!(err, LedgerError::WrongCode);
    assert_eq!(ledger.state().confirmations_of(op_id).len(), 2);

    // First correct code: still pending on the other destination.
    let state = ledger.confirm(op_id, codes[0].0, &codes[0].1).unwrap();
    assert_eq!(state, OperationState::ConfirmationPending);
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(1000));

    // Last code applies the operation.
    let state = ledger.confirm(op_id, codes[1].0, &codes[1].1).unwrap();
    assert_eq!(state, OperationState::Applied);
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(500.00));

    // Replaying a code fails: the operation is no longer pending.
    let err = ledger.confirm(op_id, codes[1].0, &codes[1].1).unwrap_err();
    assert_eq!(err, LedgerError::NotAwaitingConfirmation);
}

#[test]
fn expired_code_cannot_confirm() {
    let mut config = AppConfig::default();
    config.confirmation.ttl_minutes = -1;
    let mut ledger = Ledger::new(config, Arc::new(NullNotifier), Arc::new(AcceptingGateway));
    let w = ledger.create_wallet(1);
    ledger.update_balance(w, dec!(1000), Decimal::ZERO).unwrap();
    ledger.set_wallet_settings(
        w,
        WalletSettings {
            confirm_on_operation_email: Some(true),
            ..WalletSettings::default()
        },
    );

    let op_id = ledger
        .create_operation(OperationParams::Withdrawal {
            wallet: w,
            amount: dec!(100),
        })
        .unwrap();
    let code = ledger.state().confirmations_of(op_id)[0].code.clone();
    let err = ledger
        .confirm(op_id, ConfirmationDestination::Email, &code)
        .unwrap_err();
    assert_eq!(err, LedgerError::CodeExpired);
    assert_eq!(
        ledger.state().operation(op_id).unwrap().state,
        OperationState::ConfirmationPending
    );

    // Housekeeping drops the expired row.
    assert_eq!(ledger.sweep_expired_confirmations().unwrap(), 1);
    assert!(ledger.state().confirmations_of(op_id).is_empty());
}

#[test]
fn transfer_honors_its_own_confirmation_toggle() {
    let mut ledger = ledger();
    let alice = ledger.create_wallet(1);
    let bob = ledger.create_wallet(2);
    ledger.update_balance(alice, dec!(2000), Decimal::ZERO).unwrap();
    ledger.set_wallet_settings(
        alice,
        WalletSettings {
            confirm_on_transfer_email: Some(true),
            ..WalletSettings::default()
        },
    );

    let op_id = ledger
        .create_operation(OperationParams::Transfer {
            sender: alice,
            receiver: bob,
            amount_free: dec!(1000),
            amount_frozen: Decimal::ZERO,
        })
        .unwrap();
    assert_eq!(
        ledger.state().operation(op_id).unwrap().state,
        OperationState::ConfirmationPending
    );

    let code = ledger.state().confirmations_of(op_id)[0].code.clone();
    ledger
        .confirm(op_id, ConfirmationDestination::Email, &code)
        .unwrap();
    assert_eq!(ledger.state().wallet(bob).unwrap().free(), dec!(1000.00));
}

#[test]
fn replenishment_credits_on_gateway_confirmation() {
    let mut ledger = ledger();
    let w = ledger.create_wallet(1);

    let op_id = ledger
        .create_operation(OperationParams::Replenishment {
            wallet: w,
            amount: dec!(1000),
        })
        .unwrap();

    // Applied but not done: the gateway still owes us the money.
    let op = ledger.state().operation(op_id).unwrap();
    assert_eq!(op.state, OperationState::Applied);
    assert!(!op.done);
    // Fee on top: the gateway collects 1030.
    assert_eq!(op.amount_net, Some(dec!(1030.00)));
    assert_eq!(ledger.state().wallet(w).unwrap().free(), Decimal::ZERO);

    ledger.confirm_replenishment(op_id, dec!(1030)).unwrap();
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(1000.00));
    assert_eq!(ledger.state().commissions.total(), dec!(30.00));
    assert!(ledger.state().operation(op_id).unwrap().done);

    // Gateway retries are idempotent.
    let err = ledger.confirm_replenishment(op_id, dec!(1030)).unwrap_err();
    assert!(err.is_idempotency_skip());
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(1000.00));
}

#[test]
fn replenishment_credits_what_was_actually_paid() {
    let mut ledger = ledger();
    let w = ledger.create_wallet(1);
    let op_id = ledger
        .create_operation(OperationParams::Replenishment {
            wallet: w,
            amount: dec!(1000),
        })
        .unwrap();

    // User paid less than expected: credit the fee-adjusted actual.
    ledger.confirm_replenishment(op_id, dec!(515)).unwrap();
    assert_eq!(ledger.state().wallet(w).unwrap().free(), dec!(500.00));
    assert_eq!(ledger.state().commissions.total(), dec!(15.00));
}

#[test]
fn gateway_failure_discards_the_operation() {
    let mut ledger = Ledger::new(
        AppConfig::default(),
        Arc::new(NullNotifier),
        Arc::new(UnavailableGateway),
    );
    let w = ledger.create_wallet(1);

    let err = ledger
        .create_operation(OperationParams::Replenishment {
            wallet: w,
            amount: dec!(1000),
        })
        .unwrap_err();
    assert_eq!(err.code(), "GATEWAY_UNAVAILABLE");
    assert!(ledger.state().operations.is_empty());
    assert!(ledger.state().operation_history.is_empty());
}

#[test]
fn forced_defrost_charges_the_penalty() {
    let mut ledger = ledger();
    let w = ledger.create_wallet(1);
    ledger.update_balance(w, Decimal::ZERO, dec!(100)).unwrap();
    let item_id = ledger.state().live_frozen_items(w)[0].id;

    ledger
        .create_operation(OperationParams::Defrost {
            wallet: w,
            frozen_item: item_id,
            forced: true,
        })
        .unwrap();

    let wallet = ledger.state().wallet(w).unwrap();
    // 100 released, 5% early-defrost fee written off.
    assert_eq!(wallet.free(), dec!(95.00));
    assert_eq!(wallet.frozen(), Decimal::ZERO);
    assert_eq!(ledger.state().commissions.total(), dec!(5.00));
    // The fee is its own audited operation.
    assert_eq!(ledger.state().operations.len(), 2);

    // A released parcel cannot defrost again.
    let err = ledger
        .create_operation(OperationParams::Defrost {
            wallet: w,
            frozen_item: item_id,
            forced: false,
        })
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
}

#[test]
fn wallet_override_changes_the_fee() {
    let mut ledger = ledger();
    let w = ledger.create_wallet(1);
    ledger.update_balance(w, dec!(1000), Decimal::ZERO).unwrap();
    ledger.set_wallet_settings(
        w,
        WalletSettings {
            withdrawal_fee_pct: Some(dec!(0.5)),
            ..WalletSettings::default()
        },
    );

    ledger
        .create_operation(OperationParams::Withdrawal {
            wallet: w,
            amount: dec!(500),
        })
        .unwrap();
    let request = ledger.state().withdrawal_requests.values().next().unwrap();
    assert_eq!(request.commission, dec!(2.50));
    assert_eq!(request.amount, dec!(497.50));
}

#[test]
fn random_operation_sequences_never_drive_balances_negative() {
    let mut rng = StdRng::seed_from_u64(0x0ff1ce);
    let mut ledger = ledger();
    let wallets: Vec<u64> = (1..=3).map(|u| ledger.create_wallet(u)).collect();
    for &w in &wallets {
        ledger.update_balance(w, dec!(5000), dec!(1000)).unwrap();
    }
    let program = ledger.create_program(ProgramTemplate {
        name: "Balanced".to_string(),
        min_deposit: dec!(100),
        min_replenishment: None,
        duration_months: Some(6),
        accrual_type: AccrualType::Daily,
        withdrawal_type: WithdrawalType::AfterFinish,
    });
    let mut runs: Vec<u64> = Vec::new();
    let mut applied = 0usize;

    for _ in 0..400 {
        let w = wallets[rng.gen_range(0..wallets.len())];
        // Individual operations are free to fail validation (insufficient
        // funds, self transfer, finished run); a rejection must leave the
        // ledger exactly as it was, which the checks below also cover.
        match rng.gen_range(0..7) {
            0 => {
                let to = wallets[rng.gen_range(0..wallets.len())];
                let ok = ledger
                    .create_operation(OperationParams::Transfer {
                        sender: w,
                        receiver: to,
                        amount_free: Decimal::from(rng.gen_range(1..3000)),
                        amount_frozen: Decimal::from(rng.gen_range(0..800)),
                    })
                    .is_ok();
                applied += ok as usize;
            }
            1 => {
                let ok = ledger
                    .create_operation(OperationParams::Withdrawal {
                        wallet: w,
                        amount: Decimal::from(rng.gen_range(1..2500)),
                    })
                    .is_ok();
                applied += ok as usize;
            }
            2 => {
                if let Ok(op_id) = ledger.create_operation(OperationParams::ProgramStart {
                    wallet: w,
                    program,
                    amount_free: Decimal::from(rng.gen_range(100..2000)),
                    amount_frozen: Decimal::ZERO,
                }) {
                    applied += 1;
                    runs.push(ledger.state().operation(op_id).unwrap().user_program.unwrap());
                }
            }
            3 => {
                if !runs.is_empty() {
                    let up_id = runs[rng.gen_range(0..runs.len())];
                    let up = ledger.state().user_program(up_id).unwrap().clone();
                    let amount = if rng.gen_bool(0.5) || up.deposit < dec!(2) {
                        up.deposit
                    } else {
                        (up.deposit / dec!(2)).round_dp(2)
                    };
                    let ok = ledger
                        .create_operation(OperationParams::ProgramClosure {
                            wallet: up.wallet,
                            user_program: up_id,
                            amount,
                            early: true,
                        })
                        .is_ok();
                    applied += ok as usize;
                }
            }
            4 => {
                let item = ledger.state().live_frozen_items(w).first().map(|i| i.id);
                if let Some(item) = item {
                    let ok = ledger
                        .create_operation(OperationParams::Defrost {
                            wallet: w,
                            frozen_item: item,
                            forced: true,
                        })
                        .is_ok();
                    applied += ok as usize;
                }
            }
            5 => {
                ledger
                    .update_balance(w, Decimal::from(rng.gen_range(1..500)), Decimal::ZERO)
                    .unwrap();
                applied += 1;
            }
            _ => {
                ledger
                    .update_balance(w, Decimal::ZERO, Decimal::from(rng.gen_range(1..500)))
                    .unwrap();
                applied += 1;
            }
        }

        for &w in &wallets {
            let wallet = ledger.state().wallet(w).unwrap();
            assert!(wallet.free() >= Decimal::ZERO, "free went negative: {}", wallet.free());
            assert!(wallet.frozen() >= Decimal::ZERO, "frozen went negative: {}", wallet.frozen());
            // The frozen column always reconciles with its live parcels.
            let parcels: Decimal = ledger
                .state()
                .live_frozen_items(w)
                .iter()
                .map(|i| i.amount)
                .sum();
            assert_eq!(wallet.frozen(), parcels);
        }
    }

    // The sequence must have actually exercised the ledger.
    assert!(applied > 100, "only {applied} operations applied");
}
