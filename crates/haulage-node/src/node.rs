//! The Haulage node orchestrator.
//!
//! Builds the settlement engine with its sandbox rails and audit journal,
//! serves the HTTP API, and runs the payment-timeout sweeper.

use anyhow::Result;
use chrono::{DateTime, Utc};
use haulage_settlement::{EngineStats, InMemoryTrips, SettlementEngine};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{NodeConfig, StorageConfig};
use crate::state::NodeState;
use crate::storage::{archive_journal, Storage};

const STATE_LAST_SWEEP: &str = "last_sweep";
const STATE_SHUTDOWN: &str = "shutdown_stats";

/// Outcome of one sweeper pass, kept in the `state` column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub at: DateTime<Utc>,
    pub reconciled: usize,
    pub expired: usize,
    pub awaiting_rail: usize,
}

/// The Haulage node, owning the engine and its background tasks.
pub struct HaulageNode {
    config: NodeConfig,
    state: Arc<NodeState>,
    sweeper: Option<JoinHandle<()>>,
}

impl HaulageNode {
    /// Create a node with the given config. Opens the journal if enabled.
    ///
    /// Fails if the journal already holds records, since balances are not
    /// restored from it, unless `storage.archive_previous` is set.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let storage = if config.storage.journal {
            Some(Arc::new(open_journal(&config.storage)?))
        } else {
            None
        };

        let trips = Arc::new(InMemoryTrips::new());
        let (registry, sandboxes) = NodeState::sandbox_rails();
        let mut engine = SettlementEngine::new(config.engine.clone(), trips.clone(), registry);
        if let Some(storage) = &storage {
            engine = engine.with_sink(storage.clone());
        }
        tracing::info!(
            commission = %config.engine.commission_rate,
            currency = %config.engine.default_currency,
            providers = sandboxes.len(),
            "settlement engine created"
        );

        let state = Arc::new(NodeState::new(Arc::new(engine), trips, sandboxes, storage));
        Ok(Self {
            config,
            state,
            sweeper: None,
        })
    }

    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    /// Start background tasks.
    pub fn start(&mut self) {
        if self.config.sweeper.enabled {
            let interval = Duration::from_secs(self.config.sweeper.interval_secs.max(1));
            self.sweeper = Some(spawn_sweeper(self.state.clone(), interval));
            tracing::info!(interval_secs = interval.as_secs(), "payment sweeper started");
        }
    }

    /// Serve the HTTP API until it fails.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = self.config.api_addr().parse()?;
        crate::api::start_api_server(addr, self.state.clone()).await
    }

    /// Stop background tasks and record final engine stats.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
        let stats = self.state.engine.stats();
        if let Some(storage) = &self.state.storage {
            storage.put_state(STATE_SHUTDOWN, &stats)?;
        }
        match self.state.engine.audit_all() {
            Ok(wallets) => tracing::info!(wallets, "ledger audit passed"),
            Err(e) => tracing::error!(error = %e, "ledger audit failed at shutdown"),
        }
        tracing::info!(?stats, "node stopped");
        Ok(())
    }
}

fn open_journal(config: &StorageConfig) -> Result<Storage> {
    let dir = &config.data_dir;
    let storage = Storage::open(dir)?;
    if let Some(stats) = last_shutdown_stats(&storage)? {
        tracing::info!(?stats, "previous run");
    }
    if !storage.holds_records()? {
        tracing::info!(path = %dir.display(), "audit journal opened");
        return Ok(storage);
    }
    if !config.archive_previous {
        anyhow::bail!(
            "journal at {} holds records from a previous run; balances live in memory and are \
             not restored from it. Move it aside or start with --archive-journal",
            dir.display()
        );
    }
    drop(storage);
    let archived = archive_journal(dir)?;
    tracing::warn!(
        from = %dir.display(),
        to = %archived.display(),
        "previous journal archived, starting with empty books"
    );
    Storage::open(dir)
}

/// Reconcile payments left open past the configured window.
pub async fn sweep_once(state: &NodeState, now: DateTime<Utc>) -> Result<SweepReport> {
    let outcome = state.engine.expire_stale_payments(now).await?;
    for payment_id in outcome.finalised() {
        state.journal_payment(*payment_id);
    }
    let report = SweepReport {
        at: now,
        reconciled: outcome.reconciled.len(),
        expired: outcome.expired.len(),
        awaiting_rail: outcome.awaiting_rail.len(),
    };
    if let Some(storage) = &state.storage {
        storage.put_state(STATE_LAST_SWEEP, &report)?;
    }
    if report.expired > 0 || report.reconciled > 0 {
        tracing::warn!(
            expired = report.expired,
            reconciled = report.reconciled,
            "sweeper finalised stale payments"
        );
    } else {
        tracing::debug!(awaiting_rail = report.awaiting_rail, "sweeper found nothing to finalise");
    }
    Ok(report)
}

fn spawn_sweeper(state: Arc<NodeState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&state, Utc::now()).await {
                tracing::error!(error = %e, "payment sweep failed");
            }
        }
    })
}

/// Read back the stats a previous run recorded on shutdown.
pub fn last_shutdown_stats(storage: &Storage) -> Result<Option<EngineStats>> {
    storage.get_state(STATE_SHUTDOWN)
}
