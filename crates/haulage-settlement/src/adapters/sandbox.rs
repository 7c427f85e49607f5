use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use haulage_core::Money;
use std::sync::Mutex;

use crate::gateway::{
    CollectionRequest, DisbursementRequest, GatewayAck, GatewayError, PaymentGateway, Provider,
    RemoteStatus,
};
use crate::payments::{CallbackStatus, PaymentCallback, PaymentDirection};

/// A request the sandbox accepted.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub external_key: String,
    pub direction: PaymentDirection,
    pub amount: Money,
    pub handle: String,
    pub provider_reference: String,
    pub status: RemoteStatus,
    pub received_at: DateTime<Utc>,
}

/// In-memory mobile-money rail.
///
/// Accepts every request unless told to reject the next one, and never
/// settles on its own: tests and local nodes drive outcomes through
/// [`SandboxGateway::settle`], which produces the callback the real rail
/// would deliver.
pub struct SandboxGateway {
    provider: Provider,
    gateway_id: String,
    requests: DashMap<String, SandboxRequest>,
    reject_next: Mutex<Option<GatewayError>>,
}

impl SandboxGateway {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            gateway_id: format!("sandbox-{provider}"),
            requests: DashMap::new(),
            reject_next: Mutex::new(None),
        }
    }

    /// Make the next collection or disbursement request fail synchronously.
    pub fn reject_next(&self, error: GatewayError) {
        if let Ok(mut slot) = self.reject_next.lock() {
            *slot = Some(error);
        }
    }

    pub fn request(&self, external_key: &str) -> Option<SandboxRequest> {
        self.requests.get(external_key).map(|r| r.clone())
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Mark a request as settled and build the matching callback.
    pub fn settle(&self, external_key: &str, status: CallbackStatus) -> Option<PaymentCallback> {
        let mut request = self.requests.get_mut(external_key)?;
        request.status = match status {
            CallbackStatus::Success => RemoteStatus::Succeeded,
            other => RemoteStatus::Failed(other.to_string()),
        };
        Some(PaymentCallback {
            external_key: external_key.to_string(),
            status,
            provider_reference: Some(request.provider_reference.clone()),
            message: None,
        })
    }

    /// Drop a request as if the rail had never received it.
    pub fn forget(&self, external_key: &str) -> bool {
        self.requests.remove(external_key).is_some()
    }

    fn accept(
        &self,
        external_key: &str,
        direction: PaymentDirection,
        amount: Money,
        handle: &str,
    ) -> Result<GatewayAck, GatewayError> {
        if let Some(error) = self.reject_next.lock().ok().and_then(|mut s| s.take()) {
            tracing::warn!(gateway_id = %self.gateway_id, %external_key, %error, "sandbox rejecting request");
            return Err(error);
        }
        let provider_reference = format!("{}-{}", self.provider, uuid::Uuid::now_v7().simple());
        self.requests.insert(
            external_key.to_string(),
            SandboxRequest {
                external_key: external_key.to_string(),
                direction,
                amount,
                handle: handle.to_string(),
                provider_reference: provider_reference.clone(),
                status: RemoteStatus::Pending,
                received_at: Utc::now(),
            },
        );
        tracing::debug!(gateway_id = %self.gateway_id, %external_key, ?direction, "sandbox accepted request");
        Ok(GatewayAck {
            provider_reference: Some(provider_reference),
        })
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn request_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayAck, GatewayError> {
        self.accept(
            &request.external_key,
            PaymentDirection::Collection,
            request.amount,
            &request.payer_handle,
        )
    }

    async fn request_disbursement(
        &self,
        request: &DisbursementRequest,
    ) -> Result<GatewayAck, GatewayError> {
        self.accept(
            &request.external_key,
            PaymentDirection::Disbursement,
            request.amount,
            &request.payee_handle,
        )
    }

    async fn query_status(&self, external_key: &str) -> Result<RemoteStatus, GatewayError> {
        self.requests
            .get(external_key)
            .map(|r| r.status.clone())
            .ok_or_else(|| GatewayError::UnknownReference(external_key.to_string()))
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn gateway_id(&self) -> &str {
        &self.gateway_id
    }
}
