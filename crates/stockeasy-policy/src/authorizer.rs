//! Spending authorizer
//!
//! Checks are evaluated in a fixed order and the first failure wins:
//!
//! 1. session status and expiry
//! 2. payee allowlist
//! 3. amount is non-zero
//! 4. currency matches the session
//! 5. per-transaction limit
//! 6. daily limit
//! 7. monthly limit
//!
//! Counters are rolled forward to `now` before the limit checks, so a
//! session last used yesterday starts today with a clean daily window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockeasy_types::{
    Amount, AuthorizationSession, DenialReason, PaymentIntent, SessionStatus, SpendCounters,
};

/// Result of evaluating one intent against one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The intent fits; `counters` is what the store should commit
    Approved {
        new_daily_spent: Amount,
        new_monthly_spent: Amount,
        counters: SpendCounters,
    },
    Denied { reason: DenialReason },
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::Approved { .. } => None,
            Self::Denied { reason } => Some(*reason),
        }
    }

    fn deny(reason: DenialReason) -> Self {
        Self::Denied { reason }
    }
}

/// Decide whether `session` may fund `intent` at `now`
pub fn authorize(
    intent: &PaymentIntent,
    session: &AuthorizationSession,
    now: DateTime<Utc>,
) -> Decision {
    match session.status {
        SessionStatus::Revoked => return Decision::deny(DenialReason::SessionRevoked),
        SessionStatus::Expired => return Decision::deny(DenialReason::SessionExpired),
        SessionStatus::Active if session.is_expired_at(now) => {
            return Decision::deny(DenialReason::SessionExpired)
        }
        SessionStatus::Active => {}
    }

    if !session.allows_payee(&intent.payee_id) {
        return Decision::deny(DenialReason::PayeeNotAllowlisted);
    }

    if intent.amount.is_zero() {
        return Decision::deny(DenialReason::InvalidAmount);
    }

    if intent.currency != session.currency {
        return Decision::deny(DenialReason::CurrencyMismatch);
    }

    if intent.amount > session.per_transaction_limit {
        return Decision::deny(DenialReason::PerTransactionLimitExceeded);
    }

    let current = session.counters.rolled_forward(now);

    let new_daily_spent = match current.spent_today.checked_add(intent.amount) {
        Some(total) if total <= session.daily_limit => total,
        _ => return Decision::deny(DenialReason::DailyLimitExceeded),
    };

    let new_monthly_spent = match current.spent_this_month.checked_add(intent.amount) {
        Some(total) if total <= session.monthly_limit => total,
        _ => return Decision::deny(DenialReason::MonthlyLimitExceeded),
    };

    Decision::Approved {
        new_daily_spent,
        new_monthly_spent,
        counters: SpendCounters {
            spent_today: new_daily_spent,
            spent_this_month: new_monthly_spent,
            window_day: current.window_day,
        },
    }
}
