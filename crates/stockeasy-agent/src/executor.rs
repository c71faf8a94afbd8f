//! Payment executors
//!
//! The executor is the only component that actually moves funds. It is
//! reached after the budget has been reserved and is expected to be
//! idempotent on `intent_id`: the orchestrator never retries it, but a
//! relay may see the same intent twice after a crash.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockeasy_types::{
    Amount, AuthorizationSession, Currency, IntentId, PayeeId, PaymentIntent, SessionId,
    TransactionReference,
};
use thiserror::Error;

/// Executor errors
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("Payment timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Payment rejected: {reason}")]
    Rejected { reason: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ExecutorError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "EXECUTOR_TIMEOUT",
            Self::Rejected { .. } => "EXECUTOR_REJECTED",
            Self::Transport(_) => "EXECUTOR_TRANSPORT",
        }
    }
}

impl From<reqwest::Error> for ExecutorError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// What the executor is asked to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Idempotency key
    pub intent_id: IntentId,
    pub session_id: SessionId,
    /// Signing identity the relay should use
    pub agent_key: String,
    pub payee_id: PayeeId,
    pub amount: Amount,
    pub currency: Currency,
    pub purpose: String,
}

impl PaymentRequest {
    pub fn for_intent(intent: &PaymentIntent, session: &AuthorizationSession) -> Self {
        Self {
            intent_id: intent.intent_id.clone(),
            session_id: session.session_id.clone(),
            agent_key: session.agent_key.clone(),
            payee_id: intent.payee_id.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
            purpose: intent.purpose.clone(),
        }
    }
}

/// Capability that moves funds for an authorized payment
#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    async fn send(&self, request: &PaymentRequest)
        -> Result<TransactionReference, ExecutorError>;
}

/// Demo-mode executor
///
/// Never touches a network. The reference is `0x` followed by the hex
/// blake3 digest of the intent id, so resending an intent yields the same
/// reference.
///
/// Only the most recent intents are remembered for
/// [`was_sent`](Self::was_sent); older ones are pruned.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    latency: Option<Duration>,
    window: usize,
    sent: Arc<AtomicUsize>,
    seq: Arc<AtomicU64>,
    recent: Arc<DashMap<IntentId, u64>>,
}

/// Intents remembered by default
const DEFAULT_SENT_WINDOW: usize = 1024;

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            latency: None,
            window: DEFAULT_SENT_WINDOW,
            sent: Arc::new(AtomicUsize::new(0)),
            seq: Arc::new(AtomicU64::new(0)),
            recent: Arc::new(DashMap::new()),
        }
    }
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember at most this many recent intents
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    /// Sleep this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reference the executor returns for `intent_id`
    pub fn reference_for(intent_id: &IntentId) -> TransactionReference {
        let digest = blake3::hash(intent_id.as_str().as_bytes());
        format!("0x{}", hex::encode(digest.as_bytes()))
    }

    /// Number of sends, not counting resends of a remembered intent
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Whether a recent send carried this intent
    pub fn was_sent(&self, intent_id: &IntentId) -> bool {
        self.recent.contains_key(intent_id)
    }

    fn remember(&self, intent_id: &IntentId) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        match self.recent.entry(intent_id.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(seq);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(seq);
                self.sent.fetch_add(1, Ordering::SeqCst);
            }
        }
        if self.recent.len() > self.window {
            let floor = seq.saturating_sub((self.window / 2) as u64);
            self.recent.retain(|_, s| *s > floor);
        }
    }
}

#[async_trait]
impl PaymentExecutor for SimulatedExecutor {
    async fn send(
        &self,
        request: &PaymentRequest,
    ) -> Result<TransactionReference, ExecutorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.remember(&request.intent_id);
        let reference = Self::reference_for(&request.intent_id);
        tracing::info!(
            intent = %request.intent_id,
            payee = %request.payee_id,
            amount = %request.amount,
            currency = %request.currency,
            reference = %reference,
            "simulated payment sent"
        );
        Ok(reference)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    #[serde(alias = "txHash", alias = "tx_hash")]
    transaction_reference: TransactionReference,
}

/// Executor that hands the request to an HTTP payment relay
///
/// `POST {url}` with the [`PaymentRequest`] as JSON; a 2xx answer carries
/// `{"transactionReference": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpPaymentExecutor {
    url: String,
    client: reqwest::Client,
}

impl HttpPaymentExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PaymentExecutor for HttpPaymentExecutor {
    async fn send(
        &self,
        request: &PaymentRequest,
    ) -> Result<TransactionReference, ExecutorError> {
        let resp = self.client.post(&self.url).json(request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::Rejected {
                reason: format!("relay returned {}: {}", status, body),
            });
        }

        let parsed: RelayResponse = resp.json().await?;
        Ok(parsed.transaction_reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockeasy_types::{OwnerId, ProductId, SessionBuilder};

    fn request() -> PaymentRequest {
        let session = SessionBuilder::new(OwnerId::from("shop-1"), Currency::from("INR"))
            .agent_key("agent-key-1")
            .allow("SUP1")
            .per_transaction_limit(200)
            .daily_limit(2000)
            .monthly_limit(20000)
            .build();
        let intent = PaymentIntent::new(
            OwnerId::from("shop-1"),
            ProductId::from("Milk"),
            PayeeId::from("SUP1"),
            Amount::new(150),
            Currency::from("INR"),
        )
        .with_purpose("restock");
        PaymentRequest::for_intent(&intent, &session)
    }

    #[tokio::test]
    async fn test_simulated_reference_is_deterministic() {
        let executor = SimulatedExecutor::new();
        let req = request();
        let first = executor.send(&req).await.unwrap();
        let second = executor.send(&req).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("0x"));
        assert_eq!(first.len(), 2 + 64);
        assert_eq!(executor.sent_count(), 1);
        assert!(executor.was_sent(&req.intent_id));
    }

    #[tokio::test]
    async fn test_remembered_intents_are_bounded() {
        let executor = SimulatedExecutor::new().with_window(4);
        let mut ids = Vec::new();
        for n in 0..10 {
            let mut req = request();
            req.intent_id = IntentId::from(format!("intent-{}", n));
            executor.send(&req).await.unwrap();
            ids.push(req.intent_id);
        }
        assert_eq!(executor.sent_count(), 10);
        assert!(executor.recent.len() <= 4);
        assert!(executor.was_sent(&ids[9]));
        assert!(!executor.was_sent(&ids[0]));
    }

    #[test]
    fn test_request_carries_session_identity() {
        let req = request();
        assert_eq!(req.agent_key, "agent-key-1");
        assert_eq!(req.purpose, "restock");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("intentId").is_some());
        assert_eq!(json["payeeId"], "SUP1");
    }

    #[test]
    fn test_relay_response_accepts_tx_hash() {
        let parsed: RelayResponse = serde_json::from_str(r#"{"txHash":"0xabc"}"#).unwrap();
        assert_eq!(parsed.transaction_reference, "0xabc");
    }
}
