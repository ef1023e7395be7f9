//! JSON-RPC clients for the billing and foundation services

use crate::config::RpcConfig;
use crate::domain::billing::{BillingGateway, ChargeReceipt, ChargeRequest};
use crate::domain::foundation::{FoundationRpc, WorkspaceFeature};
use crate::domain::shared::{DomainError, ProviderCredentials, Result};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use tracing::{debug, error};
use uuid::Uuid;

fn build_client(url: &str, config: &RpcConfig) -> std::result::Result<HttpClient, String> {
    HttpClientBuilder::default()
        .request_timeout(config.request_timeout())
        .build(url)
        .map_err(|e| format!("failed to build RPC client for {}: {}", url, e))
}

pub struct JsonRpcBillingGateway {
    client: HttpClient,
}

impl JsonRpcBillingGateway {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let client = build_client(&config.billing_url, config).map_err(DomainError::Billing)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BillingGateway for JsonRpcBillingGateway {
    async fn workspace_credit(&self, workspace_id: Uuid) -> Result<f64> {
        let credit: f64 = self
            .client
            .request("billing_getWorkspaceCredit", rpc_params![workspace_id])
            .await
            .map_err(|e| {
                error!("Credit lookup for workspace {} failed: {}", workspace_id, e);
                DomainError::Billing(e.to_string())
            })?;
        debug!("Workspace {} credit {}", workspace_id, credit);
        Ok(credit)
    }

    async fn charge_outbound_call(&self, request: &ChargeRequest) -> Result<ChargeReceipt> {
        self.client
            .request("billing_chargeOutboundCall", rpc_params![request])
            .await
            .map_err(|e| {
                error!(
                    "Charge of bridge {} for workspace {} failed: {}",
                    request.bridge_sid, request.workspace_id, e
                );
                DomainError::Billing(e.to_string())
            })
    }
}

pub struct JsonRpcFoundation {
    client: HttpClient,
}

impl JsonRpcFoundation {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let client = build_client(&config.foundation_url, config).map_err(DomainError::Internal)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FoundationRpc for JsonRpcFoundation {
    async fn workspace_feature(&self, workspace_id: Uuid, name: &str) -> Result<Option<WorkspaceFeature>> {
        self.client
            .request("foundation_getWorkspaceFeature", rpc_params![workspace_id, name])
            .await
            .map_err(|e| {
                error!("Feature lookup {} for workspace {} failed: {}", name, workspace_id, e);
                DomainError::Internal(format!("foundation rpc: {}", e))
            })
    }

    async fn provider_credentials(&self, workspace_id: Uuid) -> Result<ProviderCredentials> {
        self.client
            .request("foundation_getProviderCredentials", rpc_params![workspace_id])
            .await
            .map_err(|e| {
                error!("Credential lookup for workspace {} failed: {}", workspace_id, e);
                DomainError::Provider(format!("no provider account: {}", e))
            })
    }
}
