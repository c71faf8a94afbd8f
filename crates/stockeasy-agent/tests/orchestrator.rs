use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stockeasy_agent::{
    ExecutorError, OrchestratorConfig, PaymentExecutor, PaymentOrchestrator, PaymentRequest,
    SimulatedExecutor,
};
use stockeasy_policy::{CommitResult, InMemoryPolicyStore, PolicyStore, StoreError};
use stockeasy_types::{
    Amount, AuthorizationSession, Currency, DenialReason, IntentId, OwnerId, PayeeId,
    PaymentIntent, ProductId, SessionBuilder, SessionStatus, SpendCounters,
    TransactionReference,
};

/// Fails every call after an optional delay
struct FailingExecutor {
    delay: Duration,
    calls: AtomicUsize,
}

impl FailingExecutor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentExecutor for FailingExecutor {
    async fn send(&self, _request: &PaymentRequest) -> Result<TransactionReference, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Err(ExecutorError::Rejected {
            reason: "insufficient gas".to_string(),
        })
    }
}

/// How [`ScriptedStore`] misbehaves
#[derive(Clone, Copy)]
enum Fault {
    /// Every commit loses the race
    AlwaysConflict,
    /// Every read fails in the backend
    BrokenBackend,
}

/// In-memory store with an injected fault
struct ScriptedStore {
    inner: InMemoryPolicyStore,
    fault: Fault,
    commits: AtomicUsize,
}

impl ScriptedStore {
    fn new(fault: Fault) -> Self {
        Self {
            inner: InMemoryPolicyStore::new(),
            fault,
            commits: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PolicyStore for ScriptedStore {
    async fn get(&self, owner: &OwnerId) -> stockeasy_policy::Result<AuthorizationSession> {
        match self.fault {
            Fault::BrokenBackend => Err(StoreError::Backend("disk unavailable".to_string())),
            Fault::AlwaysConflict => self.inner.get(owner).await,
        }
    }

    async fn put(
        &self,
        session: AuthorizationSession,
    ) -> stockeasy_policy::Result<AuthorizationSession> {
        self.inner.put(session).await
    }

    async fn commit(
        &self,
        owner: &OwnerId,
        expected_version: u64,
        counters: SpendCounters,
    ) -> stockeasy_policy::Result<CommitResult> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::AlwaysConflict => Ok(CommitResult::Conflict {
                current_version: expected_version + 1,
            }),
            Fault::BrokenBackend => self.inner.commit(owner, expected_version, counters).await,
        }
    }

    async fn revoke(&self, owner: &OwnerId) -> stockeasy_policy::Result<SessionStatus> {
        self.inner.revoke(owner).await
    }

    async fn expire(&self, owner: &OwnerId) -> stockeasy_policy::Result<SessionStatus> {
        self.inner.expire(owner).await
    }

    async fn list(&self) -> stockeasy_policy::Result<Vec<AuthorizationSession>> {
        self.inner.list().await
    }
}

fn owner() -> OwnerId {
    OwnerId::from("shop-1")
}

fn session(daily_limit: u64, spent_today: u64) -> AuthorizationSession {
    SessionBuilder::new(owner(), Currency::from("INR"))
        .agent_key("agent-key-1")
        .allow("SUP1")
        .per_transaction_limit(200)
        .daily_limit(daily_limit)
        .monthly_limit(50_000)
        .spent(spent_today, spent_today)
        .build()
}

fn intent(payee: &str, amount: u64) -> PaymentIntent {
    PaymentIntent::new(
        owner(),
        ProductId::from("Milk"),
        PayeeId::from(payee),
        Amount::new(amount),
        Currency::from("INR"),
    )
    .with_purpose("restock")
}

async fn setup(
    session: AuthorizationSession,
    executor: Arc<dyn PaymentExecutor>,
    config: OrchestratorConfig,
) -> (Arc<InMemoryPolicyStore>, PaymentOrchestrator) {
    let store = Arc::new(InMemoryPolicyStore::new());
    store.put(session).await.unwrap();
    let orchestrator = PaymentOrchestrator::new(store.clone(), executor, config);
    (store, orchestrator)
}

#[tokio::test]
async fn test_approved_payment_commits_counters() {
    let executor = Arc::new(SimulatedExecutor::new());
    let (store, orchestrator) =
        setup(session(2000, 0), executor.clone(), OrchestratorConfig::default()).await;

    let i = intent("SUP1", 150);
    let outcome = orchestrator.execute(i.clone()).await;

    assert!(outcome.approved);
    assert_eq!(outcome.committed_amount, Amount::new(150));
    assert_eq!(
        outcome.transaction_reference,
        Some(SimulatedExecutor::reference_for(&i.intent_id))
    );
    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::new(150));
    assert_eq!(stored.counters.spent_this_month, Amount::new(150));
    assert_eq!(orchestrator.journal().len().await, 1);
}

#[tokio::test]
async fn test_denials_leave_counters_untouched() {
    let executor = Arc::new(SimulatedExecutor::new());
    let (store, orchestrator) =
        setup(session(2000, 1950), executor.clone(), OrchestratorConfig::default()).await;

    let cases = [
        (intent("SUP2", 100), DenialReason::PayeeNotAllowlisted),
        (intent("SUP1", 250), DenialReason::PerTransactionLimitExceeded),
        (intent("SUP1", 100), DenialReason::DailyLimitExceeded),
    ];
    for (i, expected) in cases {
        let outcome = orchestrator.execute(i).await;
        assert!(!outcome.approved);
        assert_eq!(outcome.denial_reason, Some(expected));
        assert_eq!(outcome.committed_amount, Amount::ZERO);
    }

    assert_eq!(executor.sent_count(), 0);
    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::new(1950));
}

#[tokio::test]
async fn test_missing_session_is_no_active_session() {
    let store = Arc::new(InMemoryPolicyStore::new());
    let orchestrator = PaymentOrchestrator::new(
        store,
        Arc::new(SimulatedExecutor::new()),
        OrchestratorConfig::default(),
    );
    let outcome = orchestrator.execute(intent("SUP1", 10)).await;
    assert_eq!(outcome.denial_reason, Some(DenialReason::NoActiveSession));
}

#[tokio::test]
async fn test_executor_timeout_rolls_back() {
    let executor = Arc::new(SimulatedExecutor::new().with_latency(Duration::from_secs(5)));
    let (store, orchestrator) =
        setup(session(2000, 300), executor, OrchestratorConfig::default()).await;
    let before = store.get(&owner()).await.unwrap().counters;

    let outcome = orchestrator
        .execute_with_timeout(intent("SUP1", 150), Duration::from_millis(50))
        .await;

    assert!(!outcome.approved);
    assert_eq!(outcome.denial_reason, Some(DenialReason::ExecutorFailure));
    assert!(outcome.transaction_reference.is_none());
    assert!(outcome.detail.unwrap().contains("timed out"));

    let after = store.get(&owner()).await.unwrap().counters;
    assert_eq!(after.spent_today, before.spent_today);
    assert_eq!(after.spent_this_month, before.spent_this_month);
}

#[tokio::test]
async fn test_executor_error_rolls_back_exactly() {
    let executor = Arc::new(FailingExecutor::new(Duration::ZERO));
    let (store, orchestrator) =
        setup(session(2000, 700), executor.clone(), OrchestratorConfig::default()).await;

    let outcome = orchestrator.execute(intent("SUP1", 200)).await;
    assert_eq!(outcome.denial_reason, Some(DenialReason::ExecutorFailure));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::new(700));
    assert_eq!(stored.counters.spent_this_month, Amount::new(700));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payments_never_exceed_daily_limit() {
    let config = OrchestratorConfig {
        max_commit_attempts: 64,
        backoff_base_ms: 1,
        ..OrchestratorConfig::default()
    };
    let (store, orchestrator) =
        setup(session(1000, 0), Arc::new(SimulatedExecutor::new()), config).await;

    let tasks = (0..20).map(|_| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.execute(intent("SUP1", 100)).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let approved = outcomes.iter().filter(|o| o.approved).count();
    assert_eq!(approved, 10);
    assert!(outcomes
        .iter()
        .filter(|o| !o.approved)
        .all(|o| o.denial_reason == Some(DenialReason::DailyLimitExceeded)));

    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::new(1000));
}

#[tokio::test]
async fn test_paid_intent_is_not_paid_twice() {
    let executor = Arc::new(SimulatedExecutor::new());
    let (store, orchestrator) =
        setup(session(2000, 0), executor.clone(), OrchestratorConfig::default()).await;

    let i = intent("SUP1", 150);
    let first = orchestrator.execute(i.clone()).await;
    let second = orchestrator.execute(i).await;

    assert_eq!(first, second);
    assert_eq!(executor.sent_count(), 1);
    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::new(150));
}

#[tokio::test]
async fn test_in_flight_intent_is_duplicate() {
    let executor = Arc::new(SimulatedExecutor::new().with_latency(Duration::from_millis(200)));
    let (_store, orchestrator) =
        setup(session(2000, 0), executor, OrchestratorConfig::default()).await;

    let i = intent("SUP1", 150).with_intent_id(IntentId::from("intent-fixed"));
    let first = {
        let orchestrator = orchestrator.clone();
        let i = i.clone();
        tokio::spawn(async move { orchestrator.execute(i).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = orchestrator.execute(i).await;

    assert_eq!(second.denial_reason, Some(DenialReason::DuplicateIntent));
    assert!(first.await.unwrap().approved);
}

#[tokio::test]
async fn test_cancelled_caller_still_rolls_back() {
    let executor = Arc::new(FailingExecutor::new(Duration::from_millis(100)));
    let (store, orchestrator) =
        setup(session(2000, 0), executor.clone(), OrchestratorConfig::default()).await;

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), orchestrator.execute(intent("SUP1", 150)))
            .await;
    assert!(cancelled.is_err());

    // The spawned task keeps going and settles on its own
    for _ in 0..50 {
        if orchestrator.journal().len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(orchestrator.journal().len().await, 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::ZERO);
}

#[tokio::test]
async fn test_expiry_is_persisted() {
    let start = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let s = SessionBuilder::new(owner(), Currency::from("INR"))
        .allow("SUP1")
        .per_transaction_limit(200)
        .daily_limit(2000)
        .monthly_limit(20000)
        .created_at(start)
        .valid_for(ChronoDuration::hours(1))
        .build();
    let later = start + ChronoDuration::hours(2);

    let (store, orchestrator) =
        setup(s, Arc::new(SimulatedExecutor::new()), OrchestratorConfig::default()).await;
    let orchestrator = orchestrator.with_clock(Arc::new(move || later));

    let outcome = orchestrator.execute(intent("SUP1", 10)).await;
    assert_eq!(outcome.denial_reason, Some(DenialReason::SessionExpired));
    assert_eq!(
        store.get(&owner()).await.unwrap().status,
        SessionStatus::Expired
    );
}

#[tokio::test]
async fn test_revoked_session_denies() {
    let (store, orchestrator) = setup(
        session(2000, 0),
        Arc::new(SimulatedExecutor::new()),
        OrchestratorConfig::default(),
    )
    .await;
    store.revoke(&owner()).await.unwrap();

    let outcome = orchestrator.execute(intent("SUP1", 10)).await;
    assert_eq!(outcome.denial_reason, Some(DenialReason::SessionRevoked));
}

#[tokio::test]
async fn test_reused_intent_id_for_other_payment_is_denied() {
    let executor = Arc::new(SimulatedExecutor::new());
    let (store, orchestrator) =
        setup(session(2000, 0), executor.clone(), OrchestratorConfig::default()).await;

    let id = IntentId::from("order-1");
    let first = orchestrator
        .execute(intent("SUP1", 150).with_intent_id(id.clone()))
        .await;
    assert!(first.approved);

    // Same id, different payee (not allowlisted) and amount
    let second = orchestrator
        .execute(intent("SUP2", 9999).with_intent_id(id.clone()))
        .await;
    assert!(!second.approved);
    assert_eq!(second.denial_reason, Some(DenialReason::DuplicateIntent));
    assert_eq!(second.transaction_reference, None);
    assert_eq!(second.committed_amount, Amount::ZERO);

    // Same id, same payee, different amount
    let third = orchestrator
        .execute(intent("SUP1", 10).with_intent_id(id))
        .await;
    assert_eq!(third.denial_reason, Some(DenialReason::DuplicateIntent));

    assert_eq!(executor.sent_count(), 1);
    let stored = store.get(&owner()).await.unwrap();
    assert_eq!(stored.counters.spent_today, Amount::new(150));
}

#[tokio::test]
async fn test_commit_conflicts_exhaust_retries() {
    let store = Arc::new(ScriptedStore::new(Fault::AlwaysConflict));
    store.put(session(2000, 0)).await.unwrap();
    let executor = Arc::new(SimulatedExecutor::new());
    let config = OrchestratorConfig {
        max_commit_attempts: 3,
        backoff_base_ms: 1,
        ..OrchestratorConfig::default()
    };
    let orchestrator = PaymentOrchestrator::new(store.clone(), executor.clone(), config);

    let outcome = orchestrator.execute(intent("SUP1", 150)).await;

    assert!(!outcome.approved);
    assert_eq!(outcome.denial_reason, Some(DenialReason::StoreConflict));
    assert!(outcome.denial_reason.unwrap().is_retriable());
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    assert_eq!(executor.sent_count(), 0);
}

#[tokio::test]
async fn test_store_failure_is_not_retriable() {
    let store = Arc::new(ScriptedStore::new(Fault::BrokenBackend));
    let executor = Arc::new(SimulatedExecutor::new());
    let orchestrator =
        PaymentOrchestrator::new(store.clone(), executor.clone(), OrchestratorConfig::default());

    let outcome = orchestrator.execute(intent("SUP1", 150)).await;

    assert_eq!(outcome.denial_reason, Some(DenialReason::StoreUnavailable));
    assert!(!outcome.denial_reason.unwrap().is_retriable());
    assert!(outcome.detail.unwrap().contains("disk unavailable"));
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);
    assert_eq!(executor.sent_count(), 0);
}
