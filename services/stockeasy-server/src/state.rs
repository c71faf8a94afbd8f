//! Application state and wiring

use chrono::{Duration, Utc};
use std::sync::Arc;

use stockeasy_agent::{
    HttpPaymentExecutor, PaymentExecutor, PaymentOrchestrator, SimulatedExecutor,
};
use stockeasy_policy::{InMemoryPolicyStore, PolicyStore, SledPolicyStore};
use stockeasy_restock::{
    ForecastOracle, HttpForecastOracle, InMemoryInventory, RestockService, RestockTrigger,
    StaticForecastOracle, SupplierDirectory, SupplierOffer,
};
use stockeasy_types::{
    Amount, AuthorizationSession, Currency, OwnerId, PayeeId, ProductId, SessionId,
    SessionStatus, SpendCounters, SupplierId,
};

use crate::config::{
    ExecutorMode, RestockSettings, ServerConfig, SessionSeed, StoreBackend,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PolicyStore>,
    pub orchestrator: PaymentOrchestrator,
    pub restock: RestockService,
    pub inventory: Arc<InMemoryInventory>,
    pub auto_restock_on_sale: bool,
}

impl AppState {
    /// Build every component from configuration and seed the sessions
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn PolicyStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(InMemoryPolicyStore::new()),
            StoreBackend::Sled => {
                tracing::info!(path = %config.store.path, "opening sled policy store");
                Arc::new(SledPolicyStore::open(&config.store.path)?)
            }
        };

        let executor: Arc<dyn PaymentExecutor> = match config.payments.executor {
            ExecutorMode::Simulated => Arc::new(SimulatedExecutor::new()),
            ExecutorMode::Http => {
                let url = config
                    .payments
                    .relay_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("payments.relay_url is not set"))?;
                Arc::new(HttpPaymentExecutor::new(url))
            }
        };

        let oracle: Arc<dyn ForecastOracle> = match &config.restock.oracle_url {
            Some(url) => Arc::new(HttpForecastOracle::new(url)),
            None => Arc::new(StaticForecastOracle::with_forecasts(
                config
                    .restock
                    .forecasts
                    .iter()
                    .map(|(product, forecast)| (ProductId::from(product.as_str()), forecast.clone())),
            )),
        };

        let inventory = Arc::new(InMemoryInventory::with_stock(
            config
                .restock
                .inventory
                .iter()
                .map(|(product, quantity)| (ProductId::from(product.as_str()), *quantity)),
        ));

        let orchestrator = PaymentOrchestrator::new(
            store.clone(),
            executor,
            config.payments.orchestrator_config(),
        );
        let trigger = Arc::new(RestockTrigger::new(
            config.restock.trigger_config(),
            supplier_directory(&config.restock),
        ));
        let restock = RestockService::new(
            inventory.clone(),
            oracle,
            trigger,
            orchestrator.clone(),
        );

        let state = Self {
            store,
            orchestrator,
            restock,
            inventory,
            auto_restock_on_sale: config.restock.auto_on_sale,
        };

        for seed in &config.sessions {
            state.seed_session(seed).await?;
        }

        Ok(state)
    }

    /// Store a configured session unless the owner already has a live one
    async fn seed_session(&self, seed: &SessionSeed) -> anyhow::Result<()> {
        let owner = OwnerId::from(seed.owner_id.as_str());
        if let Ok(existing) = self.store.get(&owner).await {
            if existing.status == SessionStatus::Active {
                tracing::info!(owner = %owner, "keeping stored session");
                return Ok(());
            }
        }
        let session = self.store.put(session_from_seed(seed)).await?;
        tracing::info!(
            owner = %session.owner_id,
            session = %session.session_id,
            expires_at = %session.expires_at,
            "session delegated"
        );
        Ok(())
    }
}

fn supplier_directory(settings: &RestockSettings) -> SupplierDirectory {
    let offers = settings
        .suppliers
        .iter()
        .flat_map(|supplier| {
            supplier.prices.iter().map(move |(product, price)| SupplierOffer {
                supplier_id: SupplierId::from(supplier.id.as_str()),
                payee_id: PayeeId::from(supplier.payee.as_str()),
                product_id: ProductId::from(product.as_str()),
                unit_price: Amount::new(*price),
                available_stock: supplier.available_stock,
            })
        })
        .collect();
    SupplierDirectory::new(offers)
}

/// Turn an admin-supplied description into a fresh session
pub fn session_from_seed(seed: &SessionSeed) -> AuthorizationSession {
    let now = Utc::now();
    AuthorizationSession {
        session_id: seed
            .session_id
            .as_deref()
            .map(SessionId::from)
            .unwrap_or_default(),
        owner_id: OwnerId::from(seed.owner_id.as_str()),
        agent_key: seed.agent_key.clone(),
        merchant_allowlist: seed
            .allowlist
            .iter()
            .map(|payee| PayeeId::from(payee.as_str()))
            .collect(),
        currency: Currency::new(&seed.currency),
        per_transaction_limit: Amount::new(seed.per_transaction_limit),
        daily_limit: Amount::new(seed.daily_limit),
        monthly_limit: Amount::new(seed.monthly_limit),
        counters: SpendCounters::fresh(now),
        expires_at: now + Duration::hours(seed.valid_for_hours),
        status: SessionStatus::Active,
        version: 0,
        created_at: now,
    }
}
