//! Store behaviour shared by every PolicyStore implementation

use std::sync::Arc;
use stockeasy_policy::{
    authorize, CommitResult, Decision, InMemoryPolicyStore, PolicyStore, SledPolicyStore,
};
use stockeasy_types::{
    Amount, AuthorizationSession, Currency, OwnerId, PayeeId, PaymentIntent, ProductId,
    SessionBuilder,
};

fn session() -> AuthorizationSession {
    SessionBuilder::new(OwnerId::from("shop-1"), Currency::from("INR"))
        .allow("SUP1")
        .per_transaction_limit(200)
        .daily_limit(1000)
        .monthly_limit(20000)
        .build()
}

fn intent(amount: u64) -> PaymentIntent {
    PaymentIntent::new(
        OwnerId::from("shop-1"),
        ProductId::from("Milk"),
        PayeeId::from("SUP1"),
        Amount::new(amount),
        Currency::from("INR"),
    )
}

/// Every task reads the same version; exactly one commit may land
async fn race_same_version(store: Arc<dyn PolicyStore>) {
    let stored = store.put(session()).await.unwrap();
    let owner = stored.owner_id.clone();
    let now = chrono::Utc::now();

    let tasks = (0..8).map(|_| {
        let store = store.clone();
        let owner = owner.clone();
        let snapshot = stored.clone();
        tokio::spawn(async move {
            let counters = match authorize(&intent(100), &snapshot, now) {
                Decision::Approved { counters, .. } => counters,
                other => panic!("unexpected {:?}", other),
            };
            store.commit(&owner, snapshot.version, counters).await.unwrap()
        })
    });

    let results = futures::future::join_all(tasks).await;
    let committed = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| matches!(r, CommitResult::Committed { .. }))
        .count();
    assert_eq!(committed, 1);

    let loaded = store.get(&owner).await.unwrap();
    assert_eq!(loaded.counters.spent_today, Amount::new(100));
    assert_eq!(loaded.version, stored.version + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_memory_store_single_winner() {
    race_same_version(Arc::new(InMemoryPolicyStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sled_store_single_winner() {
    race_same_version(Arc::new(SledPolicyStore::temporary().unwrap())).await;
}

#[tokio::test]
async fn test_sled_store_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("stockeasy-policy-{}", uuid::Uuid::new_v4()));

    let version = {
        let store = SledPolicyStore::open(&dir).unwrap();
        let stored = store.put(session()).await.unwrap();
        let mut counters = stored.counters;
        counters.spent_today = Amount::new(150);
        counters.spent_this_month = Amount::new(150);
        match store
            .commit(&stored.owner_id, stored.version, counters)
            .await
            .unwrap()
        {
            CommitResult::Committed { version } => version,
            other => panic!("unexpected {:?}", other),
        }
    };

    let reopened = SledPolicyStore::open(&dir).unwrap();
    let loaded = reopened.get(&OwnerId::from("shop-1")).await.unwrap();
    assert_eq!(loaded.version, version);
    assert_eq!(loaded.counters.spent_today, Amount::new(150));
    drop(reopened);
    let _ = std::fs::remove_dir_all(&dir);
}
