//! Shared node state for HTTP handlers and background tasks.

use haulage_core::{AccountId, PaymentId};
use haulage_settlement::{
    adapters::SandboxGateway, Caller, GatewayRegistry, InMemoryTrips, Provider, SettlementEngine,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::storage::Storage;

/// Shared state for the running node, accessible from HTTP handlers.
pub struct NodeState {
    pub engine: Arc<SettlementEngine>,
    /// Trip directory fed by trip lifecycle signals posted to the API.
    pub trips: Arc<InMemoryTrips>,
    /// Sandbox rails, one per provider, so local callers can settle requests.
    pub sandboxes: HashMap<Provider, Arc<SandboxGateway>>,
    /// Audit journal; `None` when journaling is disabled.
    pub storage: Option<Arc<Storage>>,
    /// When the node started.
    pub start_time: Instant,
    /// Identity the node uses for its own reads (journaling, sweeps).
    system: Caller,
}

impl NodeState {
    pub fn new(
        engine: Arc<SettlementEngine>,
        trips: Arc<InMemoryTrips>,
        sandboxes: HashMap<Provider, Arc<SandboxGateway>>,
        storage: Option<Arc<Storage>>,
    ) -> Self {
        Self {
            engine,
            trips,
            sandboxes,
            storage,
            start_time: Instant::now(),
            system: Caller::admin(AccountId::new()),
        }
    }

    /// A sandbox rail for every provider, plus the registry that routes to them.
    pub fn sandbox_rails() -> (GatewayRegistry, HashMap<Provider, Arc<SandboxGateway>>) {
        let mut registry = GatewayRegistry::new();
        let mut sandboxes = HashMap::new();
        for provider in Provider::ALL {
            let gateway = Arc::new(SandboxGateway::new(provider));
            registry.register(gateway.clone());
            sandboxes.insert(provider, gateway);
        }
        (registry, sandboxes)
    }

    /// Mirror the current payment record into the journal.
    pub fn journal_payment(&self, payment_id: PaymentId) {
        let Some(storage) = &self.storage else {
            return;
        };
        let result = self
            .engine
            .get_payment(&self.system, payment_id)
            .map_err(anyhow::Error::from)
            .and_then(|record| storage.put_payment(&record));
        if let Err(e) = result {
            tracing::error!(%payment_id, error = %e, "failed to journal payment");
        }
    }
}
