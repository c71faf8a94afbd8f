//! Payment journal
//!
//! Bounded, newest-last record of every terminal outcome. It backs the
//! transaction history endpoint and lets the orchestrator replay the
//! outcome of an intent that was already paid. A replay is only granted to
//! an intent with the same owner, payee, amount and currency as the paid one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use stockeasy_types::{
    Amount, Currency, IntentId, OwnerId, PayeeId, PaymentIntent, PaymentOutcome, ProductId,
};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub intent_id: IntentId,
    pub owner_id: OwnerId,
    pub product_id: ProductId,
    pub payee_id: PayeeId,
    pub amount: Amount,
    pub currency: Currency,
    pub quantity: u64,
    pub purpose: String,
    pub outcome: PaymentOutcome,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(intent: &PaymentIntent, outcome: &PaymentOutcome, completed_at: DateTime<Utc>) -> Self {
        Self {
            intent_id: intent.intent_id.clone(),
            owner_id: intent.owner_id.clone(),
            product_id: intent.product_id.clone(),
            payee_id: intent.payee_id.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
            quantity: intent.quantity,
            purpose: intent.purpose.clone(),
            outcome: outcome.clone(),
            requested_at: intent.requested_at,
            completed_at,
        }
    }

    /// Whether `intent` asks for exactly the payment this entry recorded
    pub fn same_payment(&self, intent: &PaymentIntent) -> bool {
        self.owner_id == intent.owner_id
            && self.payee_id == intent.payee_id
            && self.amount == intent.amount
            && self.currency == intent.currency
    }
}

/// Counts for the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalSummary {
    pub approved: usize,
    pub blocked: usize,
    pub total_spent: Amount,
}

#[derive(Debug, Clone)]
pub struct PaymentJournal {
    entries: Arc<RwLock<VecDeque<JournalEntry>>>,
    max_entries: usize,
}

impl PaymentJournal {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn record(&self, entry: JournalEntry) {
        let mut entries = self.entries.write().await;
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// Newest first, at most `limit`
    pub async fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Latest approved entry recorded under this intent id
    pub async fn approved_entry(&self, intent_id: &IntentId) -> Option<JournalEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .find(|e| &e.intent_id == intent_id && e.outcome.approved)
            .cloned()
    }

    pub async fn summary(&self) -> JournalSummary {
        let entries = self.entries.read().await;
        entries.iter().fold(JournalSummary::default(), |mut acc, e| {
            if e.outcome.approved {
                acc.approved += 1;
                acc.total_spent = acc
                    .total_spent
                    .checked_add(e.outcome.committed_amount)
                    .unwrap_or(Amount::new(u64::MAX));
            } else {
                acc.blocked += 1;
            }
            acc
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
