//! Authorization sessions
//!
//! A session is a time- and scope-limited delegation of payment authority
//! from a merchant's master key to an agent key. It carries the limits the
//! agent must respect and the running counters of what it already spent.
//!
//! Budget windows are calendar UTC days and months, reset lazily: the
//! counters remember the day they belong to ([`SpendCounters::window_day`])
//! and are rolled forward before every evaluation.

use crate::{Amount, Currency, OwnerId, PayeeId, Result, SessionId, StockEasyError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle status of a session
///
/// Only `Active -> Expired` and `Active -> Revoked` exist; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Expired => f.write_str("expired"),
            Self::Revoked => f.write_str("revoked"),
        }
    }
}

/// Running spend totals for the current day and month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendCounters {
    /// Spent in the UTC day `window_day`
    pub spent_today: Amount,
    /// Spent in the UTC month containing `window_day`
    pub spent_this_month: Amount,
    /// Day the counters belong to
    pub window_day: NaiveDate,
}

impl SpendCounters {
    /// Zeroed counters anchored at `now`
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            spent_today: Amount::ZERO,
            spent_this_month: Amount::ZERO,
            window_day: now.date_naive(),
        }
    }

    /// Counters as they stand at `now`, with elapsed windows reset
    ///
    /// A clock that runs backwards never resets anything.
    pub fn rolled_forward(&self, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        if today <= self.window_day {
            return *self;
        }
        let spent_this_month = if same_month(today, self.window_day) {
            self.spent_this_month
        } else {
            Amount::ZERO
        };
        Self {
            spent_today: Amount::ZERO,
            spent_this_month,
            window_day: today,
        }
    }

    /// Counters with `amount` added to both windows, `None` on overflow
    pub fn reserve(&self, amount: Amount) -> Option<Self> {
        Some(Self {
            spent_today: self.spent_today.checked_add(amount)?,
            spent_this_month: self.spent_this_month.checked_add(amount)?,
            window_day: self.window_day,
        })
    }

    /// Undo a reservation of `amount` made in the window of `reserved_day`
    ///
    /// Only windows that still contain `reserved_day` are decremented; a
    /// window that has rolled over since the reservation already forgot it.
    pub fn release(&self, amount: Amount, reserved_day: NaiveDate) -> Self {
        let mut released = *self;
        if self.window_day == reserved_day {
            released.spent_today = self.spent_today.saturating_sub(amount);
        }
        if same_month(self.window_day, reserved_day) {
            released.spent_this_month = self.spent_this_month.saturating_sub(amount);
        }
        released
    }
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// A delegated spending authority held by an agent on behalf of an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSession {
    /// Session ID (one per agent key)
    pub session_id: SessionId,
    /// Merchant whose master key delegated the authority
    pub owner_id: OwnerId,
    /// Opaque agent signing identity
    pub agent_key: String,
    /// Payees this session may pay
    pub merchant_allowlist: BTreeSet<PayeeId>,
    /// Unit of all limits and counters
    pub currency: Currency,
    /// Maximum amount of a single payment
    pub per_transaction_limit: Amount,
    /// Ceiling for one UTC day
    pub daily_limit: Amount,
    /// Ceiling for one UTC month
    pub monthly_limit: Amount,
    /// Spend so far
    pub counters: SpendCounters,
    /// No payment is valid at or after this instant
    pub expires_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Bumped on every write, compared on commit
    #[serde(default)]
    pub version: u64,
    /// When delegated
    pub created_at: DateTime<Utc>,
}

impl AuthorizationSession {
    /// Whether the payee is on the allowlist
    pub fn allows_payee(&self, payee: &PayeeId) -> bool {
        self.merchant_allowlist.contains(payee)
    }

    /// Whether `now` is at or past `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Budget left in the current day and month windows at `now`
    pub fn remaining_at(&self, now: DateTime<Utc>) -> (Amount, Amount) {
        let counters = self.counters.rolled_forward(now);
        (
            self.daily_limit.saturating_sub(counters.spent_today),
            self.monthly_limit.saturating_sub(counters.spent_this_month),
        )
    }

    /// Reject sessions an admin should never be able to store
    pub fn validate(&self) -> Result<()> {
        if self.currency.code().is_empty() {
            return Err(StockEasyError::invalid_input("currency", "must not be empty"));
        }
        if self.per_transaction_limit.is_zero() {
            return Err(StockEasyError::invalid_input(
                "per_transaction_limit",
                "must be greater than zero",
            ));
        }
        if self.daily_limit > self.monthly_limit {
            return Err(StockEasyError::invalid_input(
                "daily_limit",
                "must not exceed monthly_limit",
            ));
        }
        if self.expires_at <= self.created_at {
            return Err(StockEasyError::invalid_input(
                "expires_at",
                "must be after created_at",
            ));
        }
        Ok(())
    }
}

/// Builder for creating sessions
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    owner_id: OwnerId,
    session_id: SessionId,
    agent_key: String,
    allowlist: BTreeSet<PayeeId>,
    currency: Currency,
    per_transaction_limit: Amount,
    daily_limit: Amount,
    monthly_limit: Amount,
    counters: Option<SpendCounters>,
    valid_for: Duration,
    now: DateTime<Utc>,
}

impl SessionBuilder {
    /// Start a session for `owner` in `currency`, valid for 24 hours
    pub fn new(owner_id: OwnerId, currency: Currency) -> Self {
        Self {
            owner_id,
            session_id: SessionId::new(),
            agent_key: String::new(),
            allowlist: BTreeSet::new(),
            currency,
            per_transaction_limit: Amount::ZERO,
            daily_limit: Amount::ZERO,
            monthly_limit: Amount::ZERO,
            counters: None,
            valid_for: Duration::hours(24),
            now: Utc::now(),
        }
    }

    pub fn session_id(mut self, id: SessionId) -> Self {
        self.session_id = id;
        self
    }

    pub fn agent_key(mut self, key: impl Into<String>) -> Self {
        self.agent_key = key.into();
        self
    }

    pub fn allow(mut self, payee: impl Into<PayeeId>) -> Self {
        self.allowlist.insert(payee.into());
        self
    }

    pub fn per_transaction_limit(mut self, limit: u64) -> Self {
        self.per_transaction_limit = Amount::new(limit);
        self
    }

    pub fn daily_limit(mut self, limit: u64) -> Self {
        self.daily_limit = Amount::new(limit);
        self
    }

    pub fn monthly_limit(mut self, limit: u64) -> Self {
        self.monthly_limit = Amount::new(limit);
        self
    }

    /// Seed the counters (for imported sessions and tests)
    pub fn spent(mut self, today: u64, this_month: u64) -> Self {
        self.counters = Some(SpendCounters {
            spent_today: Amount::new(today),
            spent_this_month: Amount::new(this_month),
            window_day: self.now.date_naive(),
        });
        self
    }

    pub fn valid_for(mut self, duration: Duration) -> Self {
        self.valid_for = duration;
        self
    }

    /// Anchor creation time (defaults to the wall clock)
    pub fn created_at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        if let Some(counters) = self.counters.as_mut() {
            counters.window_day = now.date_naive();
        }
        self
    }

    pub fn build(self) -> AuthorizationSession {
        AuthorizationSession {
            session_id: self.session_id,
            owner_id: self.owner_id,
            agent_key: self.agent_key,
            merchant_allowlist: self.allowlist,
            currency: self.currency,
            per_transaction_limit: self.per_transaction_limit,
            daily_limit: self.daily_limit,
            monthly_limit: self.monthly_limit,
            counters: self.counters.unwrap_or_else(|| SpendCounters::fresh(self.now)),
            expires_at: self.now + self.valid_for,
            status: SessionStatus::Active,
            version: 0,
            created_at: self.now,
        }
    }
}
