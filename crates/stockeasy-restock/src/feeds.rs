//! Inventory and forecast feeds
//!
//! Both are traits so the restock service can run against the in-memory
//! shop simulation, a fixed forecast table, or a remote oracle.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stockeasy_types::ProductId;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    #[error("Out of stock: {product} has {available}, requested {requested}")]
    InsufficientStock {
        product: ProductId,
        available: u64,
        requested: u64,
    },

    #[error("Feed unavailable: {0}")]
    Unavailable(String),
}

impl FeedError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownProduct(_) => "UNKNOWN_PRODUCT",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::Unavailable(_) => "FEED_UNAVAILABLE",
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// Stock of one product
///
/// `epoch` advances every time goods are received, so "low stock at
/// epoch 3" and "low stock again at epoch 4" are different restock events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
}

/// Oracle view of upcoming demand for a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    #[serde(alias = "risk_level")]
    pub risk_level: RiskLevel,
    #[serde(default, alias = "recommended_product", skip_serializing_if = "Option::is_none")]
    pub recommended_product: Option<ProductId>,
    /// Units expected to sell over the forecast horizon
    #[serde(default, alias = "predicted_demand")]
    pub predicted_demand: u64,
}

impl Forecast {
    pub fn new(risk_level: RiskLevel, predicted_demand: u64) -> Self {
        Self {
            risk_level,
            recommended_product: None,
            predicted_demand,
        }
    }

    /// Forecast used when the oracle has nothing to say
    pub fn quiet() -> Self {
        Self::new(RiskLevel::Low, 0)
    }

    pub fn recommending(mut self, product: ProductId) -> Self {
        self.recommended_product = Some(product);
        self
    }
}

#[async_trait]
pub trait InventoryFeed: Send + Sync {
    async fn stock(&self, product: &ProductId) -> Result<StockLevel>;

    /// Every product the feed knows about
    async fn products(&self) -> Result<Vec<ProductId>>;
}

#[async_trait]
pub trait ForecastOracle: Send + Sync {
    async fn forecast(&self, product: &ProductId) -> Result<Forecast>;
}

/// Shop inventory held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    items: Arc<DashMap<ProductId, StockLevel>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(items: impl IntoIterator<Item = (ProductId, u64)>) -> Self {
        let inventory = Self::new();
        for (product, quantity) in items {
            inventory.set(product, quantity);
        }
        inventory
    }

    /// Overwrite the quantity without touching the epoch
    pub fn set(&self, product: ProductId, quantity: u64) {
        self.items.entry(product).or_default().quantity = quantity;
    }

    /// Take `quantity` units off the shelf
    pub fn sell(&self, product: &ProductId, quantity: u64) -> Result<StockLevel> {
        let mut level = self
            .items
            .get_mut(product)
            .ok_or_else(|| FeedError::UnknownProduct(product.clone()))?;
        if level.quantity < quantity {
            return Err(FeedError::InsufficientStock {
                product: product.clone(),
                available: level.quantity,
                requested: quantity,
            });
        }
        level.quantity -= quantity;
        Ok(*level)
    }

    /// Put a delivery on the shelf and advance the epoch
    pub fn receive(&self, product: &ProductId, quantity: u64) -> StockLevel {
        let mut level = self.items.entry(product.clone()).or_default();
        level.quantity = level.quantity.saturating_add(quantity);
        level.epoch += 1;
        *level
    }

    /// All products with their levels, sorted by product
    pub fn snapshot(&self) -> Vec<(ProductId, StockLevel)> {
        let mut items: Vec<_> = self
            .items
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }
}

#[async_trait]
impl InventoryFeed for InMemoryInventory {
    async fn stock(&self, product: &ProductId) -> Result<StockLevel> {
        self.items
            .get(product)
            .map(|level| *level)
            .ok_or_else(|| FeedError::UnknownProduct(product.clone()))
    }

    async fn products(&self) -> Result<Vec<ProductId>> {
        Ok(self.snapshot().into_iter().map(|(product, _)| product).collect())
    }
}

/// Fixed forecast table; unknown products get [`Forecast::quiet`]
#[derive(Debug, Clone, Default)]
pub struct StaticForecastOracle {
    forecasts: Arc<DashMap<ProductId, Forecast>>,
}

impl StaticForecastOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forecasts(forecasts: impl IntoIterator<Item = (ProductId, Forecast)>) -> Self {
        let oracle = Self::new();
        for (product, forecast) in forecasts {
            oracle.set(product, forecast);
        }
        oracle
    }

    pub fn set(&self, product: ProductId, forecast: Forecast) {
        self.forecasts.insert(product, forecast);
    }
}

#[async_trait]
impl ForecastOracle for StaticForecastOracle {
    async fn forecast(&self, product: &ProductId) -> Result<Forecast> {
        Ok(self
            .forecasts
            .get(product)
            .map(|f| f.value().clone())
            .unwrap_or_else(Forecast::quiet))
    }
}

/// Oracle served over HTTP at `GET {base_url}/forecast/{product}`
#[derive(Debug, Clone)]
pub struct HttpForecastOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpForecastOracle {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ForecastOracle for HttpForecastOracle {
    async fn forecast(&self, product: &ProductId) -> Result<Forecast> {
        let resp = self
            .client
            .get(format!("{}/forecast/{}", self.base_url, product))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FeedError::UnknownProduct(product.clone()));
        }
        if !resp.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "oracle returned {}",
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }
}
