//! StockEasy Restock - Deciding when to pay a supplier
//!
//! - [`feeds`]: inventory and forecast oracle collaborators
//! - [`suppliers`]: who sells what, at which unit price
//! - [`trigger`]: the gating predicate and intent construction
//! - [`service`]: one call from product id to payment outcome

pub mod feeds;
pub mod service;
pub mod suppliers;
pub mod trigger;

pub use feeds::{
    FeedError, Forecast, ForecastOracle, HttpForecastOracle, InMemoryInventory, InventoryFeed,
    RiskLevel, StaticForecastOracle, StockLevel,
};
pub use service::{RestockResult, RestockService};
pub use suppliers::{SupplierDirectory, SupplierOffer};
pub use trigger::{RestockSignal, RestockTrigger, SkipReason, TriggerConfig, TriggerDecision, TriggerKey};
