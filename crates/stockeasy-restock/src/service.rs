//! Restock service
//!
//! Reads the feeds, asks the trigger, pays through the orchestrator and
//! reports back to the trigger.
//!
//! Once the trigger has claimed a key, paying and completing the key run
//! in a spawned task. A caller that goes away mid-payment therefore never
//! leaves the key claimed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stockeasy_agent::PaymentOrchestrator;
use stockeasy_types::{DenialReason, PaymentIntent, PaymentOutcome, ProductId};

use crate::feeds::{FeedError, Forecast, ForecastOracle, InventoryFeed, Result};
use crate::trigger::{RestockSignal, RestockTrigger, SkipReason, TriggerDecision, TriggerKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RestockResult {
    /// No payment was attempted
    Skipped { reason: SkipReason },
    /// A payment was attempted; the outcome says whether it went through
    Attempted(PaymentOutcome),
}

impl RestockResult {
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Attempted(outcome) if outcome.approved)
    }
}

#[derive(Clone)]
pub struct RestockService {
    inventory: Arc<dyn InventoryFeed>,
    oracle: Arc<dyn ForecastOracle>,
    trigger: Arc<RestockTrigger>,
    orchestrator: PaymentOrchestrator,
}

impl RestockService {
    pub fn new(
        inventory: Arc<dyn InventoryFeed>,
        oracle: Arc<dyn ForecastOracle>,
        trigger: Arc<RestockTrigger>,
        orchestrator: PaymentOrchestrator,
    ) -> Self {
        Self {
            inventory,
            oracle,
            trigger,
            orchestrator,
        }
    }

    pub fn trigger(&self) -> &RestockTrigger {
        &self.trigger
    }

    pub fn orchestrator(&self) -> &PaymentOrchestrator {
        &self.orchestrator
    }

    /// Request a restock payment for one product
    ///
    /// An unreachable oracle does not block restocking: the decision then
    /// rests on the stock level alone.
    pub async fn request_restock(&self, product: &ProductId) -> Result<RestockResult> {
        let stock = self.inventory.stock(product).await?;
        let forecast = match self.oracle.forecast(product).await {
            Ok(forecast) => forecast,
            Err(e) => {
                tracing::warn!(product = %product, error = %e, "forecast unavailable, using stock only");
                Forecast::quiet()
            }
        };

        let signal = RestockSignal {
            product_id: product.clone(),
            stock,
            forecast,
        };

        let (key, intent) = match self.trigger.evaluate(&signal) {
            TriggerDecision::Skip(reason) => {
                tracing::debug!(product = %product, code = reason.code(), "restock skipped");
                return Ok(RestockResult::Skipped { reason });
            }
            TriggerDecision::Fire { key, intent } => (key, intent),
        };

        let intent_id = intent.intent_id.clone();
        let this = self.clone();
        let task_key = key.clone();
        let outcome = match tokio::spawn(async move { this.pay(task_key, intent).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "restock task failed");
                self.trigger.complete(&key, false);
                PaymentOutcome::denied(intent_id, DenialReason::ExecutorFailure)
                    .with_detail(e.to_string())
            }
        };
        Ok(RestockResult::Attempted(outcome))
    }

    /// Pay a fired intent and settle its trigger key
    async fn pay(&self, key: TriggerKey, intent: PaymentIntent) -> PaymentOutcome {
        let outcome = self.orchestrator.execute(intent).await;
        self.trigger.complete(&key, outcome.approved);

        if outcome.approved {
            tracing::info!(product = %key.product_id, key = %key, "restock paid");
        } else {
            tracing::info!(
                product = %key.product_id,
                key = %key,
                reason = ?outcome.denial_reason,
                "restock payment blocked"
            );
        }
        outcome
    }

    /// Evaluate every product the inventory knows about, concurrently
    pub async fn run_cycle(
        &self,
    ) -> std::result::Result<Vec<(ProductId, Result<RestockResult>)>, FeedError> {
        let products = self.inventory.products().await?;
        let results = futures::future::join_all(products.iter().map(|p| self.request_restock(p))).await;
        let report: Vec<_> = products.into_iter().zip(results).collect();
        let paid = report
            .iter()
            .filter(|(_, r)| matches!(r, Ok(result) if result.is_paid()))
            .count();
        tracing::info!(products = report.len(), paid, "restock cycle finished");
        Ok(report)
    }
}
