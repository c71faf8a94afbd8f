//! Payment intents and their outcomes
//!
//! An intent is a request to pay one payee one amount. The orchestrator
//! turns it into exactly one [`PaymentOutcome`]: approved with a
//! transaction reference, or denied with a [`DenialReason`].

use crate::{Amount, Currency, IntentId, OwnerId, PayeeId, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference returned by the payment executor (a tx hash, a relay id)
pub type TransactionReference = String;

/// A request to pay a supplier, funded by the owner's session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Dedupe key
    #[serde(default)]
    pub intent_id: IntentId,
    /// Whose session funds the payment
    pub owner_id: OwnerId,
    pub product_id: ProductId,
    pub payee_id: PayeeId,
    pub amount: Amount,
    pub currency: Currency,
    #[serde(default = "crate::now")]
    pub requested_at: DateTime<Utc>,
    /// Free-form purpose, e.g. `"restock"`
    #[serde(default)]
    pub purpose: String,
    /// Units ordered (informational)
    #[serde(default)]
    pub quantity: u64,
}

impl PaymentIntent {
    /// Create an intent with a fresh ID
    pub fn new(
        owner_id: OwnerId,
        product_id: ProductId,
        payee_id: PayeeId,
        amount: Amount,
        currency: Currency,
    ) -> Self {
        Self {
            intent_id: IntentId::new(),
            owner_id,
            product_id,
            payee_id,
            amount,
            currency,
            requested_at: Utc::now(),
            purpose: String::new(),
            quantity: 0,
        }
    }

    pub fn with_intent_id(mut self, id: IntentId) -> Self {
        self.intent_id = id;
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = at;
        self
    }
}

/// Why a payment was not made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    NoActiveSession,
    SessionExpired,
    SessionRevoked,
    PayeeNotAllowlisted,
    InvalidAmount,
    CurrencyMismatch,
    PerTransactionLimitExceeded,
    DailyLimitExceeded,
    MonthlyLimitExceeded,
    ExecutorFailure,
    StoreConflict,
    DuplicateIntent,
    /// The policy store failed (I/O, corrupt record); not a contention issue
    StoreUnavailable,
}

impl DenialReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::PayeeNotAllowlisted => "PAYEE_NOT_ALLOWLISTED",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::CurrencyMismatch => "CURRENCY_MISMATCH",
            Self::PerTransactionLimitExceeded => "PER_TRANSACTION_LIMIT_EXCEEDED",
            Self::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
            Self::MonthlyLimitExceeded => "MONTHLY_LIMIT_EXCEEDED",
            Self::ExecutorFailure => "EXECUTOR_FAILURE",
            Self::StoreConflict => "STORE_CONFLICT",
            Self::DuplicateIntent => "DUPLICATE_INTENT",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Only store conflicts are worth retrying
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StoreConflict)
    }

    fn message(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "No active session",
            Self::SessionExpired => "Session expired",
            Self::SessionRevoked => "Session revoked",
            Self::PayeeNotAllowlisted => "Supplier not in allowlist",
            Self::InvalidAmount => "Invalid amount",
            Self::CurrencyMismatch => "Currency does not match session",
            Self::PerTransactionLimitExceeded => "Exceeds per-transaction limit",
            Self::DailyLimitExceeded => "Exceeds daily limit",
            Self::MonthlyLimitExceeded => "Exceeds monthly budget",
            Self::ExecutorFailure => "Payment execution failed",
            Self::StoreConflict => "Too much concurrent spending, try again",
            Self::DuplicateIntent => "Payment already in progress",
            Self::StoreUnavailable => "Spending policy unavailable",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blocked: {}", self.message())
    }
}

/// Result of executing one intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub intent_id: IntentId,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<TransactionReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
    /// Amount that stays committed against the session (zero when denied)
    pub committed_amount: Amount,
    /// Human-readable detail, e.g. executor error text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PaymentOutcome {
    pub fn approved(intent_id: IntentId, amount: Amount, reference: TransactionReference) -> Self {
        Self {
            intent_id,
            approved: true,
            transaction_reference: Some(reference),
            denial_reason: None,
            committed_amount: amount,
            detail: None,
        }
    }

    pub fn denied(intent_id: IntentId, reason: DenialReason) -> Self {
        Self {
            intent_id,
            approved: false,
            transaction_reference: None,
            denial_reason: Some(reason),
            committed_amount: Amount::ZERO,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// User-facing message for a denial
    pub fn error_message(&self) -> Option<String> {
        self.denial_reason.map(|reason| match &self.detail {
            Some(detail) => format!("{}: {}", reason, detail),
            None => reason.to_string(),
        })
    }
}
