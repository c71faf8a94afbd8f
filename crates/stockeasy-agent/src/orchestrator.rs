//! Payment orchestrator
//!
//! The budget is reserved before the executor is called (optimistic
//! commit) and released again if the call fails. The only critical section
//! is the store's compare-and-swap; the executor runs with no lock held.
//!
//! Each `execute` runs in its own spawned task. Dropping the caller's
//! future does not cancel that task, so a reservation always ends in either
//! a completed payment attempt or a rollback.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stockeasy_policy::{authorize, CommitResult, Decision, PolicyStore, StoreError};
use stockeasy_types::{
    Amount, DenialReason, IntentId, OwnerId, PaymentIntent, PaymentOutcome, SessionId,
    SessionStatus,
};

use crate::executor::{ExecutorError, PaymentExecutor, PaymentRequest};
use crate::journal::{JournalEntry, PaymentJournal};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Upper bound on rollback compare-and-swap attempts
const MAX_ROLLBACK_ATTEMPTS: u32 = 64;

/// Largest backoff multiplier (2^6 times the base delay)
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Default bound on one executor call
    pub executor_timeout_ms: u64,
    /// Commit attempts before giving up with `StoreConflict`
    pub max_commit_attempts: u32,
    /// First backoff delay after a conflict, doubled each retry
    pub backoff_base_ms: u64,
    /// Outcomes kept in the journal
    pub journal_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            executor_timeout_ms: 10_000,
            max_commit_attempts: 8,
            backoff_base_ms: 5,
            journal_size: 1000,
        }
    }
}

impl OrchestratorConfig {
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << shift))
    }
}

/// Budget held against a session while the executor runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub owner_id: OwnerId,
    pub session_id: SessionId,
    pub amount: Amount,
    /// Window the amount was counted in
    pub window_day: NaiveDate,
    /// Session version right after the reservation
    pub version: u64,
    /// What the executor will be asked to send
    pub request: PaymentRequest,
}

/// Result of one load-authorize-commit pass
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveAttempt {
    Reserved(Reservation),
    Denied(DenialReason),
    /// The session changed between load and commit
    Conflict { current_version: u64 },
}

/// Removes the intent from the in-flight set when dropped
struct InFlight {
    intents: Arc<DashMap<IntentId, ()>>,
    intent_id: IntentId,
}

impl InFlight {
    fn acquire(intents: &Arc<DashMap<IntentId, ()>>, intent_id: &IntentId) -> Option<Self> {
        match intents.entry(intent_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(Self {
                    intents: intents.clone(),
                    intent_id: intent_id.clone(),
                })
            }
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.intents.remove(&self.intent_id);
    }
}

/// Executes payment intents against the owner's session
#[derive(Clone)]
pub struct PaymentOrchestrator {
    store: Arc<dyn PolicyStore>,
    executor: Arc<dyn PaymentExecutor>,
    clock: Clock,
    config: OrchestratorConfig,
    journal: PaymentJournal,
    in_flight: Arc<DashMap<IntentId, ()>>,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        executor: Arc<dyn PaymentExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let journal = PaymentJournal::new(config.journal_size);
        Self {
            store,
            executor,
            clock: system_clock(),
            config,
            journal,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Replace the wall clock (tests, replay)
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn journal(&self) -> &PaymentJournal {
        &self.journal
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute with the configured executor timeout
    pub async fn execute(&self, intent: PaymentIntent) -> PaymentOutcome {
        let timeout = self.config.executor_timeout();
        self.execute_with_timeout(intent, timeout).await
    }

    /// Execute with an explicit bound on the executor call
    pub async fn execute_with_timeout(
        &self,
        intent: PaymentIntent,
        timeout: Duration,
    ) -> PaymentOutcome {
        let intent_id = intent.intent_id.clone();
        let this = self.clone();
        match tokio::spawn(async move { this.settle(intent, timeout).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(intent = %intent_id, error = %e, "payment task failed");
                PaymentOutcome::denied(intent_id, DenialReason::ExecutorFailure)
                    .with_detail(e.to_string())
            }
        }
    }

    async fn settle(&self, intent: PaymentIntent, timeout: Duration) -> PaymentOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight, &intent.intent_id) else {
            tracing::warn!(intent = %intent.intent_id, "intent already in flight");
            return PaymentOutcome::denied(intent.intent_id, DenialReason::DuplicateIntent);
        };

        if let Some(previous) = self.journal.approved_entry(&intent.intent_id).await {
            if previous.same_payment(&intent) {
                tracing::info!(intent = %intent.intent_id, "intent already paid, replaying outcome");
                return previous.outcome;
            }
            tracing::warn!(
                intent = %intent.intent_id,
                owner = %intent.owner_id,
                payee = %intent.payee_id,
                "intent id reused for a different payment"
            );
            return PaymentOutcome::denied(intent.intent_id, DenialReason::DuplicateIntent)
                .with_detail("intent id already used for a different payment");
        }

        let outcome = self.process(&intent, timeout).await;
        self.journal
            .record(JournalEntry::new(&intent, &outcome, (self.clock)()))
            .await;
        outcome
    }

    async fn process(&self, intent: &PaymentIntent, timeout: Duration) -> PaymentOutcome {
        let reservation = match self.reserve(intent).await {
            Ok(reservation) => reservation,
            Err(outcome) => return outcome,
        };

        let sent = match tokio::time::timeout(timeout, self.executor.send(&reservation.request)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout {
                millis: timeout.as_millis() as u64,
            }),
        };

        match sent {
            Ok(reference) => {
                tracing::info!(
                    intent = %intent.intent_id,
                    owner = %intent.owner_id,
                    payee = %intent.payee_id,
                    amount = %intent.amount,
                    reference = %reference,
                    "payment approved"
                );
                PaymentOutcome::approved(intent.intent_id.clone(), intent.amount, reference)
            }
            Err(e) => {
                tracing::warn!(
                    intent = %intent.intent_id,
                    owner = %intent.owner_id,
                    error = %e,
                    code = e.error_code(),
                    "executor failed, rolling back"
                );
                let mut detail = e.to_string();
                if let Err(rollback) = self.rollback(&reservation).await {
                    detail = format!("{}; rollback failed: {}", detail, rollback);
                }
                PaymentOutcome::denied(intent.intent_id.clone(), DenialReason::ExecutorFailure)
                    .with_detail(detail)
            }
        }
    }

    /// Reserve the intent's amount, retrying conflicts with backoff
    async fn reserve(&self, intent: &PaymentIntent) -> Result<Reservation, PaymentOutcome> {
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_reserve(intent).await {
                Ok(ReserveAttempt::Reserved(reservation)) => {
                    tracing::debug!(
                        intent = %intent.intent_id,
                        version = reservation.version,
                        attempt,
                        "budget reserved"
                    );
                    return Ok(reservation);
                }
                Ok(ReserveAttempt::Denied(reason)) => {
                    tracing::info!(
                        intent = %intent.intent_id,
                        owner = %intent.owner_id,
                        code = reason.code(),
                        "payment denied"
                    );
                    return Err(PaymentOutcome::denied(intent.intent_id.clone(), reason));
                }
                Ok(ReserveAttempt::Conflict { current_version }) => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            intent = %intent.intent_id,
                            attempts = attempt,
                            "commit retries exhausted"
                        );
                        return Err(PaymentOutcome::denied(
                            intent.intent_id.clone(),
                            DenialReason::StoreConflict,
                        ));
                    }
                    tracing::debug!(
                        intent = %intent.intent_id,
                        current_version,
                        attempt,
                        "commit conflict, retrying"
                    );
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
                Err(StoreError::NotFound { .. }) => {
                    return Err(PaymentOutcome::denied(
                        intent.intent_id.clone(),
                        DenialReason::NoActiveSession,
                    ));
                }
                Err(e) => {
                    tracing::error!(
                        intent = %intent.intent_id,
                        error = %e,
                        code = e.error_code(),
                        "policy store failed"
                    );
                    return Err(PaymentOutcome::denied(
                        intent.intent_id.clone(),
                        DenialReason::StoreUnavailable,
                    )
                    .with_detail(e.to_string()));
                }
            }
        }
    }

    /// One load, authorize and compare-and-swap pass
    pub async fn try_reserve(&self, intent: &PaymentIntent) -> Result<ReserveAttempt, StoreError> {
        let session = self.store.get(&intent.owner_id).await?;
        let now = (self.clock)();

        match authorize(intent, &session, now) {
            Decision::Denied { reason } => {
                if reason == DenialReason::SessionExpired && session.status == SessionStatus::Active {
                    if let Err(e) = self.store.expire(&intent.owner_id).await {
                        tracing::warn!(owner = %intent.owner_id, error = %e, "could not mark session expired");
                    }
                }
                Ok(ReserveAttempt::Denied(reason))
            }
            Decision::Approved { counters, .. } => {
                let request = PaymentRequest::for_intent(intent, &session);
                match self
                    .store
                    .commit(&intent.owner_id, session.version, counters)
                    .await?
                {
                    CommitResult::Committed { version } => Ok(ReserveAttempt::Reserved(Reservation {
                        owner_id: intent.owner_id.clone(),
                        session_id: session.session_id,
                        amount: intent.amount,
                        window_day: counters.window_day,
                        version,
                        request,
                    })),
                    CommitResult::Conflict { current_version } => {
                        Ok(ReserveAttempt::Conflict { current_version })
                    }
                }
            }
        }
    }

    /// Subtract the reserved amount from the counters it was added to
    async fn rollback(&self, reservation: &Reservation) -> Result<(), StoreError> {
        for attempt in 1..=MAX_ROLLBACK_ATTEMPTS {
            let session = self.store.get(&reservation.owner_id).await?;
            if session.session_id != reservation.session_id {
                tracing::info!(
                    owner = %reservation.owner_id,
                    "session replaced since reservation, nothing to release"
                );
                return Ok(());
            }
            let counters = session
                .counters
                .release(reservation.amount, reservation.window_day);
            match self
                .store
                .commit(&reservation.owner_id, session.version, counters)
                .await?
            {
                CommitResult::Committed { .. } => {
                    tracing::info!(
                        owner = %reservation.owner_id,
                        amount = %reservation.amount,
                        attempt,
                        "reservation rolled back"
                    );
                    return Ok(());
                }
                CommitResult::Conflict { .. } => {
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
            }
        }
        Err(StoreError::Backend(format!(
            "rollback of {} for {} did not land after {} attempts",
            reservation.amount, reservation.owner_id, MAX_ROLLBACK_ATTEMPTS
        )))
    }
}
