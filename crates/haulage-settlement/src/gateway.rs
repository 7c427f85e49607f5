use async_trait::async_trait;
use haulage_core::Money;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::SettlementError;

/// Errors reported synchronously by a payment rail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("unknown external key: {0}")]
    UnknownReference(String),
}

/// Mobile-money operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mtn,
    Vodafone,
    #[serde(rename = "airteltigo")]
    AirtelTigo,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Mtn, Provider::Vodafone, Provider::AirtelTigo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mtn => "mtn",
            Self::Vodafone => "vodafone",
            Self::AirtelTigo => "airteltigo",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mtn" => Ok(Self::Mtn),
            "vodafone" => Ok(Self::Vodafone),
            "airteltigo" | "airtel_tigo" => Ok(Self::AirtelTigo),
            other => Err(SettlementError::Validation(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

/// Ask the rail to pull money from a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub external_key: String,
    pub amount: Money,
    pub payer_handle: String,
    pub description: String,
}

/// Ask the rail to push money to a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub external_key: String,
    /// Amount to send, net of the withdrawal fee.
    pub amount: Money,
    pub payee_handle: String,
    pub description: String,
}

/// The rail accepted a request; the outcome arrives later by callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAck {
    pub provider_reference: Option<String>,
}

/// Status as reported by the rail when polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Pending,
    Succeeded,
    Failed(String),
}

/// Adapter to one mobile-money rail.
///
/// Implementations must not block; the engine calls them outside any
/// wallet lock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayAck, GatewayError>;

    async fn request_disbursement(
        &self,
        request: &DisbursementRequest,
    ) -> Result<GatewayAck, GatewayError>;

    async fn query_status(&self, external_key: &str) -> Result<RemoteStatus, GatewayError>;

    fn provider(&self) -> Provider;

    /// Unique identifier of this adapter (e.g. "sandbox-mtn").
    fn gateway_id(&self) -> &str;
}

/// Payment gateways keyed by provider.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its provider, replacing any previous one.
    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        let provider = gateway.provider();
        tracing::info!(%provider, gateway_id = gateway.gateway_id(), "registering payment gateway");
        self.gateways.insert(provider, gateway);
    }

    pub fn unregister(&mut self, provider: Provider) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.remove(&provider)
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, SettlementError> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(SettlementError::GatewayNotRegistered(provider))
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
