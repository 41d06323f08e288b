//! Operation records: the typed, auditable financial transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core_types::{
    FrozenItemId, OperationId, ProgramId, ReplenishmentId, UserProgramId, WalletId,
};

/// Closed set of operation types. Dispatch in the engine is an exhaustive
/// match over this enum; adding a variant will not compile until every
/// handler site is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Replenishment,
    Withdrawal,
    Transfer,
    ProgramStart,
    ProgramReplenishment,
    ProgramReplenishmentCancel,
    ProgramClosure,
    Defrost,
    ExtraFeeWriteoff,
    ProgramAccrual,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Replenishment => "REPLENISHMENT",
            OperationKind::Withdrawal => "WITHDRAWAL",
            OperationKind::Transfer => "TRANSFER",
            OperationKind::ProgramStart => "PROGRAM_START",
            OperationKind::ProgramReplenishment => "PROGRAM_REPLENISHMENT",
            OperationKind::ProgramReplenishmentCancel => "PROGRAM_REPLENISHMENT_CANCEL",
            OperationKind::ProgramClosure => "PROGRAM_CLOSURE",
            OperationKind::Defrost => "DEFROST",
            OperationKind::ExtraFeeWriteoff => "EXTRA_FEE_WRITEOFF",
            OperationKind::ProgramAccrual => "PROGRAM_ACCRUAL",
        }
    }

    /// Kinds gated behind the wallet owner's "confirm on operation" 2FA
    /// setting. Transfer is gated by its own separate setting.
    pub fn requires_operation_confirmation(&self) -> bool {
        matches!(
            self,
            OperationKind::Withdrawal
                | OperationKind::ProgramReplenishmentCancel
                | OperationKind::ProgramClosure
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation lifecycle.
///
/// `Created -> ConfirmationPending -> Confirmed -> Applied`, with the
/// pending stage skipped when no 2FA destination is enabled. Applied is
/// terminal; `done` is a separate business flag (a withdrawal is Applied
/// but not done until admin approval).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum OperationState {
    Created = 0,
    ConfirmationPending = 10,
    Confirmed = 20,
    Applied = 30,
}

impl OperationState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Applied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Created => "CREATED",
            OperationState::ConfirmationPending => "CONFIRMATION_PENDING",
            OperationState::Confirmed => "CONFIRMED",
            OperationState::Applied => "APPLIED",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed creation parameters, one variant per operation kind. The engine
/// derives the amount fields and links from these.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationParams {
    Replenishment {
        wallet: WalletId,
        amount: Decimal,
    },
    Withdrawal {
        wallet: WalletId,
        amount: Decimal,
    },
    Transfer {
        sender: WalletId,
        receiver: WalletId,
        amount_free: Decimal,
        amount_frozen: Decimal,
    },
    ProgramStart {
        wallet: WalletId,
        program: ProgramId,
        amount_free: Decimal,
        amount_frozen: Decimal,
    },
    ProgramReplenishment {
        wallet: WalletId,
        user_program: UserProgramId,
        amount: Decimal,
    },
    ProgramReplenishmentCancel {
        wallet: WalletId,
        replenishment: ReplenishmentId,
        amount: Decimal,
    },
    ProgramClosure {
        wallet: WalletId,
        user_program: UserProgramId,
        amount: Decimal,
        early: bool,
    },
    Defrost {
        wallet: WalletId,
        frozen_item: FrozenItemId,
        forced: bool,
    },
    ExtraFeeWriteoff {
        wallet: WalletId,
        amount: Decimal,
    },
    ProgramAccrual {
        wallet: WalletId,
        user_program: UserProgramId,
        amount: Decimal,
    },
}

impl OperationParams {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationParams::Replenishment { .. } => OperationKind::Replenishment,
            OperationParams::Withdrawal { .. } => OperationKind::Withdrawal,
            OperationParams::Transfer { .. } => OperationKind::Transfer,
            OperationParams::ProgramStart { .. } => OperationKind::ProgramStart,
            OperationParams::ProgramReplenishment { .. } => OperationKind::ProgramReplenishment,
            OperationParams::ProgramReplenishmentCancel { .. } => {
                OperationKind::ProgramReplenishmentCancel
            }
            OperationParams::ProgramClosure { .. } => OperationKind::ProgramClosure,
            OperationParams::Defrost { .. } => OperationKind::Defrost,
            OperationParams::ExtraFeeWriteoff { .. } => OperationKind::ExtraFeeWriteoff,
            OperationParams::ProgramAccrual { .. } => OperationKind::ProgramAccrual,
        }
    }

    /// The wallet that owns the operation (the sender, for transfers).
    pub fn wallet(&self) -> WalletId {
        match *self {
            OperationParams::Replenishment { wallet, .. }
            | OperationParams::Withdrawal { wallet, .. }
            | OperationParams::ProgramStart { wallet, .. }
            | OperationParams::ProgramReplenishment { wallet, .. }
            | OperationParams::ProgramReplenishmentCancel { wallet, .. }
            | OperationParams::ProgramClosure { wallet, .. }
            | OperationParams::Defrost { wallet, .. }
            | OperationParams::ExtraFeeWriteoff { wallet, .. }
            | OperationParams::ProgramAccrual { wallet, .. } => wallet,
            OperationParams::Transfer { sender, .. } => sender,
        }
    }
}

/// A persisted operation. Which amount fields are populated depends on the
/// kind; `done` flips false -> true at most once, inside `apply()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: OperationId,
    /// External correlation id.
    pub uuid: Uuid,
    pub kind: OperationKind,
    pub wallet: WalletId,
    pub state: OperationState,
    pub done: bool,

    pub amount: Option<Decimal>,
    pub amount_free: Option<Decimal>,
    pub amount_frozen: Option<Decimal>,
    pub amount_net: Option<Decimal>,
    pub commission: Option<Decimal>,

    pub program: Option<ProgramId>,
    pub user_program: Option<UserProgramId>,
    pub replenishment: Option<ReplenishmentId>,
    pub frozen_item: Option<FrozenItemId>,
    pub sender: Option<WalletId>,
    pub receiver: Option<WalletId>,

    pub early_closure: bool,
    pub partial: bool,
    pub forced: bool,

    pub created_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(id: OperationId, kind: OperationKind, wallet: WalletId) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            kind,
            wallet,
            state: OperationState::Created,
            done: false,
            amount: None,
            amount_free: None,
            amount_frozen: None,
            amount_net: None,
            commission: None,
            program: None,
            user_program: None,
            replenishment: None,
            frozen_item: None,
            sender: None,
            receiver: None,
            early_closure: false,
            partial: false,
            forced: false,
            created_at: Utc::now(),
        }
    }
}
