use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use stockeasy_agent::{
    ExecutorError, OrchestratorConfig, PaymentExecutor, PaymentOrchestrator, PaymentRequest,
    SimulatedExecutor,
};
use stockeasy_policy::{InMemoryPolicyStore, PolicyStore};
use stockeasy_restock::{
    Forecast, InMemoryInventory, RestockResult, RestockService, RestockTrigger, RiskLevel,
    SkipReason, StaticForecastOracle, SupplierDirectory, SupplierOffer, TriggerConfig,
};
use stockeasy_types::{
    Amount, Currency, DenialReason, OwnerId, PayeeId, ProductId, SessionBuilder, SupplierId,
    TransactionReference,
};

struct Shop<E> {
    store: Arc<InMemoryPolicyStore>,
    inventory: Arc<InMemoryInventory>,
    oracle: Arc<StaticForecastOracle>,
    executor: Arc<E>,
    service: RestockService,
}

/// Rejects every payment after a delay
struct SlowRejectingExecutor {
    delay: Duration,
}

#[async_trait]
impl PaymentExecutor for SlowRejectingExecutor {
    async fn send(&self, _request: &PaymentRequest) -> Result<TransactionReference, ExecutorError> {
        tokio::time::sleep(self.delay).await;
        Err(ExecutorError::Rejected {
            reason: "relay offline".to_string(),
        })
    }
}

fn offer(supplier: &str, product: &str, price: u64) -> SupplierOffer {
    SupplierOffer {
        supplier_id: SupplierId::from(supplier),
        payee_id: PayeeId::from(supplier),
        product_id: ProductId::from(product),
        unit_price: Amount::new(price),
        available_stock: None,
    }
}

async fn shop(per_transaction_limit: u64) -> Shop<SimulatedExecutor> {
    shop_with(per_transaction_limit, SimulatedExecutor::new()).await
}

async fn shop_with<E: PaymentExecutor + 'static>(
    per_transaction_limit: u64,
    executor: E,
) -> Shop<E> {
    let owner = OwnerId::from("shop-1");
    let store = Arc::new(InMemoryPolicyStore::new());
    store
        .put(
            SessionBuilder::new(owner.clone(), Currency::from("INR"))
                .allow("SUP1")
                .allow("SUP2")
                .per_transaction_limit(per_transaction_limit)
                .daily_limit(2000)
                .monthly_limit(20000)
                .build(),
        )
        .await
        .unwrap();

    let inventory = Arc::new(InMemoryInventory::with_stock([
        (ProductId::from("Milk"), 10),
        (ProductId::from("Bread"), 5),
    ]));
    let oracle = Arc::new(StaticForecastOracle::new());
    let executor = Arc::new(executor);
    let orchestrator =
        PaymentOrchestrator::new(store.clone(), executor.clone(), OrchestratorConfig::default());
    let trigger = Arc::new(RestockTrigger::new(
        TriggerConfig::new(owner, Currency::from("INR")),
        SupplierDirectory::new(vec![
            offer("SUP1", "Milk", 12),
            offer("SUP2", "Bread", 8),
            offer("SUP3", "Bread", 5),
        ]),
    ));
    let service = RestockService::new(inventory.clone(), oracle.clone(), trigger, orchestrator);

    Shop {
        store,
        inventory,
        oracle,
        executor,
        service,
    }
}

#[tokio::test]
async fn test_low_stock_pays_supplier() {
    let shop = shop(200).await;
    let milk = ProductId::from("Milk");

    let result = shop.service.request_restock(&milk).await.unwrap();
    assert_eq!(
        result,
        RestockResult::Skipped {
            reason: SkipReason::StockSufficient
        }
    );

    shop.inventory.sell(&milk, 8).unwrap();
    shop.oracle.set(milk.clone(), Forecast::new(RiskLevel::Medium, 10));

    let result = shop.service.request_restock(&milk).await.unwrap();
    assert!(result.is_paid());
    // 10 + 20% = 12, minus 2 on hand, at 12 each
    let session = shop.store.get(&OwnerId::from("shop-1")).await.unwrap();
    assert_eq!(session.counters.spent_today, Amount::new(10 * 12));
    assert_eq!(shop.executor.sent_count(), 1);

    // Same stock level again: nothing new is paid
    let again = shop.service.request_restock(&milk).await.unwrap();
    assert_eq!(
        again,
        RestockResult::Skipped {
            reason: SkipReason::AlreadyInFlight
        }
    );
    assert_eq!(shop.executor.sent_count(), 1);
}

#[tokio::test]
async fn test_blocked_payment_is_reported_and_retriable() {
    let shop = shop(50).await;
    let milk = ProductId::from("Milk");
    shop.inventory.sell(&milk, 9).unwrap();
    shop.oracle.set(milk.clone(), Forecast::new(RiskLevel::Medium, 10));

    let result = shop.service.request_restock(&milk).await.unwrap();
    match &result {
        RestockResult::Attempted(outcome) => {
            assert!(!outcome.approved);
            assert_eq!(
                outcome.denial_reason,
                Some(DenialReason::PerTransactionLimitExceeded)
            );
        }
        other => panic!("expected attempt, got {:?}", other),
    }
    assert_eq!(shop.executor.sent_count(), 0);

    // Key was released, so the next evaluation tries again
    let retry = shop.service.request_restock(&milk).await.unwrap();
    assert!(matches!(retry, RestockResult::Attempted(_)));
}

#[tokio::test]
async fn test_supplier_outside_allowlist_is_blocked() {
    let shop = shop(200).await;
    let bread = ProductId::from("Bread");
    shop.inventory.sell(&bread, 4).unwrap();

    // SUP3 is cheapest for bread but not on the allowlist
    let result = shop.service.request_restock(&bread).await.unwrap();
    match result {
        RestockResult::Attempted(outcome) => {
            assert_eq!(outcome.denial_reason, Some(DenialReason::PayeeNotAllowlisted));
            assert_eq!(
                outcome.error_message().as_deref(),
                Some("Blocked: Supplier not in allowlist")
            );
        }
        other => panic!("expected attempt, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cycle_covers_every_product() {
    let shop = shop(200).await;
    shop.inventory.sell(&ProductId::from("Milk"), 8).unwrap();

    let report = shop.service.run_cycle().await.unwrap();
    assert_eq!(report.len(), 2);
    let paid: Vec<_> = report
        .iter()
        .filter(|(_, r)| r.as_ref().map(|r| r.is_paid()).unwrap_or(false))
        .map(|(p, _)| p.as_str())
        .collect();
    assert_eq!(paid, vec!["Milk"]);
}

#[tokio::test]
async fn test_unknown_product_is_an_error() {
    let shop = shop(200).await;
    assert!(shop
        .service
        .request_restock(&ProductId::from("Eggs"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_dropped_request_releases_trigger_key() {
    let shop = shop_with(
        200,
        SlowRejectingExecutor {
            delay: Duration::from_millis(100),
        },
    )
    .await;
    let milk = ProductId::from("Milk");
    shop.inventory.sell(&milk, 8).unwrap();

    // The caller gives up while the payment is still with the executor
    let dropped =
        tokio::time::timeout(Duration::from_millis(10), shop.service.request_restock(&milk)).await;
    assert!(dropped.is_err());

    // The payment settles on its own: rolled back, key released
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = shop.store.get(&OwnerId::from("shop-1")).await.unwrap();
    assert_eq!(session.counters.spent_today, Amount::ZERO);
    assert_eq!(shop.service.orchestrator().journal().len().await, 1);

    let retry = shop.service.request_restock(&milk).await.unwrap();
    match retry {
        RestockResult::Attempted(outcome) => {
            assert_eq!(outcome.denial_reason, Some(DenialReason::ExecutorFailure));
        }
        other => panic!("expected a new attempt, got {:?}", other),
    }
}
