//! Wire protocol with the external push gateway.
//!
//! The gateway performs the actual outbound HTTPS call to customer callbacks
//! and probes candidate callback URLs. The hub only knows these two RPCs.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A header the gateway passes through verbatim to the customer's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedHeader {
    pub key: String,
    pub value: String,
}

/// The request the gateway turns into an HTTPS POST at the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundNotification {
    #[serde(rename = "destinationUrl")]
    pub destination_url: String,
    #[serde(rename = "forwardedHeaders")]
    pub forwarded_headers: Vec<ForwardedHeader>,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDeliveryResponse {
    pub successful: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackValidationResponse {
    pub successful: bool,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ValidateCallbackBody<'a> {
    #[serde(rename = "callbackUrl")]
    callback_url: &'a str,
}

/// The two RPCs the hub consumes from the gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn notify(&self, outbound: &OutboundNotification) -> Result<GatewayDeliveryResponse>;

    async fn validate_callback(&self, callback_url: &str) -> Result<CallbackValidationResponse>;
}

/// HTTP client for the push gateway.
///
/// Both endpoints carry the gateway auth token and a JSON content type; every
/// call is bounded by the configured timeout.
#[derive(Clone)]
pub struct PushGatewayClient {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl PushGatewayClient {
    pub fn new(base_url: String, auth_token: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PushGateway for PushGatewayClient {
    async fn notify(&self, outbound: &OutboundNotification) -> Result<GatewayDeliveryResponse> {
        let url = format!("{}/notify", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_token)
            .json(outbound)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Gateway notify request failed with status: {}",
                response.status()
            ));
        }

        Ok(response.json().await?)
    }

    async fn validate_callback(&self, callback_url: &str) -> Result<CallbackValidationResponse> {
        let url = format!("{}/validate-callback", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_token)
            .json(&ValidateCallbackBody { callback_url })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Callback validation request failed with status: {}",
                response.status()
            ));
        }

        Ok(response.json().await?)
    }
}
