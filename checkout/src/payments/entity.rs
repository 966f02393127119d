//! Payment and attempt entities with their lifecycle state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, no attempt built yet.
    New,
    /// At least one attempt is in flight.
    Pending,
    /// An attempt landed and validated on chain. Terminal.
    Completed,
    /// Explicitly failed. Terminal.
    Failed,
    /// Canceled by the merchant. Terminal.
    Canceled,
    /// Deadline passed without a completed attempt. Terminal.
    Expired,
}

impl PaymentStatus {
    /// All statuses a payment may move to `self` from. Empty for states
    /// that are never entered by a transition (only `new` qualifies).
    #[must_use]
    pub const fn allowed_from(self) -> &'static [Self] {
        match self {
            Self::New => &[],
            Self::Pending => &[Self::New],
            Self::Completed | Self::Canceled | Self::Expired => &[Self::New, Self::Pending],
            Self::Failed => &[Self::Pending],
        }
    }

    /// Whether the status has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Expired
        )
    }

    /// Whether a transition from `self` to `next` is legal. A no-op
    /// transition to the current status is tolerated (idempotent updates).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next || next.allowed_from().contains(&self)
    }

    /// Stable string form, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown payment status {other}")),
        }
    }
}

/// Lifecycle status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Built and handed to the buyer, not observed on chain yet.
    Pending,
    /// Observed and validated on chain. Terminal.
    Completed,
    /// Observed as failed. Terminal.
    Failed,
    /// Never observed before the parent's deadline. Terminal.
    Expired,
}

impl AttemptStatus {
    /// All statuses an attempt may move to `self` from. Every terminal
    /// status is reached from `pending` only; `pending` is never entered
    /// by a transition.
    #[must_use]
    pub const fn allowed_from(self) -> &'static [Self] {
        match self {
            Self::Pending => &[],
            Self::Completed | Self::Failed | Self::Expired => &[Self::Pending],
        }
    }

    /// Whether a transition from `self` to `next` is legal. A no-op
    /// transition to the current status is tolerated (idempotent updates).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next || next.allowed_from().contains(&self)
    }

    /// Stable string form, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Whether the status has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown attempt status {other}")),
        }
    }
}

/// A merchant-initiated payment intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Server-assigned identity.
    pub id: Uuid,
    /// Optional merchant-scoped unique id (order number etc).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Base58 wallet receiving the funds.
    pub destination_wallet: String,
    /// Base58 mint of the target currency (native mint for SOL).
    pub destination_mint: String,
    /// Amount in minimal units of the target currency.
    pub amount: u64,
    /// Current lifecycle status.
    pub status: PaymentStatus,
    /// Optional human-readable note shown to the buyer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Absolute deadline after which the payment expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Inputs for creating a payment; defaults are filled by the service.
#[derive(Debug, Clone, Default)]
pub struct NewPayment {
    /// Optional merchant-scoped unique id.
    pub external_id: Option<String>,
    /// Base58 wallet receiving the funds; merchant default when unset.
    pub destination_wallet: Option<String>,
    /// Target currency; merchant default when unset.
    pub destination_mint: Option<String>,
    /// Amount in minimal units. Must be greater than zero.
    pub amount: u64,
    /// Optional note shown to the buyer.
    pub message: Option<String>,
    /// Deadline; `now + PAYMENT_TTL` when unset.
    pub expires_at: Option<DateTime<Utc>>,
}

/// One buyer-signed submission toward a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Identity of the attempt.
    pub id: Uuid,
    /// The payment this attempt belongs to.
    pub payment_id: Uuid,
    /// Reference key: a fresh base58 address embedded in the transfer so
    /// the ledger can be scanned for it. Globally unique, never reused.
    pub reference: String,
    /// Buyer wallet funding the attempt.
    pub source_wallet: String,
    /// Currency the buyer pays with (swapped when it differs from the
    /// destination mint).
    pub source_mint: String,
    /// Wallet receiving the funds (snapshot of the payment's).
    pub destination_wallet: String,
    /// Target currency (snapshot of the payment's).
    pub destination_mint: String,
    /// Payment amount in minimal units of the destination currency.
    pub amount: u64,
    /// Bonus burned in exchange for a discount.
    pub discount_amount: u64,
    /// What the buyer actually transfers: `amount - discount_amount`.
    pub total_amount: u64,
    /// Bonus minted to the buyer on success.
    pub accrued_bonus_amount: u64,
    /// Note inherited from the payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Attested memo (the payment's external id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Whether the buyer asked to apply their bonus balance.
    pub apply_bonus: bool,
    /// Transaction signature once observed on chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
    /// Current lifecycle status.
    pub status: AttemptStatus,
}

/// Buyer inputs for building an attempt.
#[derive(Debug, Clone)]
pub struct AttemptDraft {
    /// The payment to pay.
    pub payment_id: Uuid,
    /// Base58 wallet of the buyer.
    pub source_wallet: String,
    /// Currency the buyer wants to pay with; destination mint when unset.
    pub source_mint: Option<String>,
    /// Whether to burn available bonus for a discount.
    pub apply_bonus: bool,
}

/// A built attempt together with its serialized transaction.
#[derive(Debug, Clone, Serialize)]
pub struct BuiltAttempt {
    /// The persisted attempt record.
    pub attempt: Attempt,
    /// Base64-encoded partially signed transaction for the buyer to sign.
    pub transaction: String,
}
