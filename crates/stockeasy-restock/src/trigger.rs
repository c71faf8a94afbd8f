//! Restock trigger
//!
//! Fires when stock is below the threshold or the oracle reports high
//! risk. At most one intent is emitted per (product, stock epoch): the key
//! stays claimed while the payment is in flight and, once paid, until new
//! stock arrives and bumps the epoch.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use stockeasy_agent::{system_clock, Clock};
use stockeasy_types::{Currency, OwnerId, PaymentIntent, ProductId};

use crate::feeds::{Forecast, RiskLevel, StockLevel};
use crate::suppliers::SupplierDirectory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Whose session pays for restocks
    pub owner_id: OwnerId,
    pub currency: Currency,
    /// Fire when quantity drops below this
    pub low_stock_threshold: u64,
    /// At or below this, the cooldown is ignored
    pub critical_stock: u64,
    /// Quiet period per product after a paid restock
    pub cooldown_secs: i64,
    /// Extra demand ordered on top of the forecast
    pub safety_margin_percent: u64,
}

impl TriggerConfig {
    pub fn new(owner_id: OwnerId, currency: Currency) -> Self {
        Self {
            owner_id,
            currency,
            low_stock_threshold: 3,
            critical_stock: 1,
            cooldown_secs: 7 * 24 * 60 * 60,
            safety_margin_percent: 20,
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs)
    }
}

/// Everything the trigger looks at for one product
#[derive(Debug, Clone)]
pub struct RestockSignal {
    pub product_id: ProductId,
    pub stock: StockLevel,
    pub forecast: Forecast,
}

/// Idempotency key of a restock
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub product_id: ProductId,
    pub epoch: u64,
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.product_id, self.epoch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    StockSufficient,
    NoSupplier,
    AlreadyInFlight,
    CoolingDown { until: DateTime<Utc> },
    OrderTooLarge,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StockSufficient => "STOCK_SUFFICIENT",
            Self::NoSupplier => "NO_SUPPLIER",
            Self::AlreadyInFlight => "ALREADY_IN_FLIGHT",
            Self::CoolingDown { .. } => "COOLING_DOWN",
            Self::OrderTooLarge => "ORDER_TOO_LARGE",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StockSufficient => f.write_str("Stock is sufficient"),
            Self::NoSupplier => f.write_str("No supplier offers this product"),
            Self::AlreadyInFlight => f.write_str("Restock already placed for this stock level"),
            Self::CoolingDown { until } => write!(f, "Restock cooldown active until {}", until),
            Self::OrderTooLarge => f.write_str("Order amount overflows"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TriggerDecision {
    /// Pay this intent, then report back with [`RestockTrigger::complete`]
    Fire { key: TriggerKey, intent: PaymentIntent },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    InFlight,
    Fulfilled,
}

pub struct RestockTrigger {
    config: TriggerConfig,
    directory: SupplierDirectory,
    keys: DashMap<TriggerKey, KeyState>,
    last_restock: DashMap<ProductId, DateTime<Utc>>,
    clock: Clock,
}

impl RestockTrigger {
    pub fn new(config: TriggerConfig, directory: SupplierDirectory) -> Self {
        Self {
            config,
            directory,
            keys: DashMap::new(),
            last_restock: DashMap::new(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn directory(&self) -> &SupplierDirectory {
        &self.directory
    }

    /// Whether the signal alone calls for a restock
    pub fn should_fire(&self, signal: &RestockSignal) -> bool {
        signal.stock.quantity < self.config.low_stock_threshold
            || signal.forecast.risk_level == RiskLevel::High
    }

    /// Units to order: forecast plus safety margin, never below the threshold
    pub fn order_quantity(&self, signal: &RestockSignal) -> u64 {
        let predicted = signal.forecast.predicted_demand;
        let safety = predicted.saturating_mul(self.config.safety_margin_percent) / 100;
        let target = predicted
            .saturating_add(safety)
            .max(self.config.low_stock_threshold);
        target.saturating_sub(signal.stock.quantity).max(1)
    }

    pub fn evaluate(&self, signal: &RestockSignal) -> TriggerDecision {
        if !self.should_fire(signal) {
            return TriggerDecision::Skip(SkipReason::StockSufficient);
        }

        let key = TriggerKey {
            product_id: signal.product_id.clone(),
            epoch: signal.stock.epoch,
        };
        if self.keys.contains_key(&key) {
            return TriggerDecision::Skip(SkipReason::AlreadyInFlight);
        }

        if signal.stock.quantity > self.config.critical_stock {
            if let Some(last) = self.last_restock.get(&signal.product_id) {
                let until = *last + self.config.cooldown();
                if (self.clock)() < until {
                    return TriggerDecision::Skip(SkipReason::CoolingDown { until });
                }
            }
        }

        let quantity = self.order_quantity(signal);
        let Some(offer) = self.directory.cheapest(&signal.product_id, quantity) else {
            tracing::info!(product = %signal.product_id, quantity, "no supplier can ship");
            return TriggerDecision::Skip(SkipReason::NoSupplier);
        };
        let Ok(amount) = offer.unit_price.checked_mul(quantity) else {
            return TriggerDecision::Skip(SkipReason::OrderTooLarge);
        };

        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => return TriggerDecision::Skip(SkipReason::AlreadyInFlight),
            Entry::Vacant(vacant) => {
                vacant.insert(KeyState::InFlight);
            }
        }

        let purpose = match &signal.forecast.recommended_product {
            Some(recommended) if recommended != &signal.product_id => {
                format!("restock; oracle recommends {}", recommended)
            }
            _ => "restock".to_string(),
        };
        let intent = PaymentIntent::new(
            self.config.owner_id.clone(),
            signal.product_id.clone(),
            offer.payee_id.clone(),
            amount,
            self.config.currency.clone(),
        )
        .with_purpose(purpose)
        .with_quantity(quantity)
        .requested_at((self.clock)());

        tracing::info!(
            key = %key,
            supplier = %offer.supplier_id,
            quantity,
            amount = %amount,
            "restock triggered"
        );
        TriggerDecision::Fire { key, intent }
    }

    /// Report the payment result for a fired key
    ///
    /// A paid key stays claimed for its epoch and starts the cooldown; a
    /// denied one is released so a later evaluation may try again.
    pub fn complete(&self, key: &TriggerKey, approved: bool) {
        if approved {
            self.keys.insert(key.clone(), KeyState::Fulfilled);
            self.keys
                .retain(|k, _| k.product_id != key.product_id || k.epoch >= key.epoch);
            self.last_restock
                .insert(key.product_id.clone(), (self.clock)());
        } else {
            self.keys.remove(key);
        }
    }

    pub fn is_in_flight(&self, key: &TriggerKey) -> bool {
        matches!(self.keys.get(key).map(|s| *s), Some(KeyState::InFlight))
    }
}
