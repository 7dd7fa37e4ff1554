//! Contract state gateway for the lottery contract on TON

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::abi::{self, GET_COMPOSITE_STATE, WALLET_SEQNO};
use crate::cell::{Cell, TonAddress};
use crate::config::TonApiConfig;
use crate::error::{ConfigError, ContractCallError};
use crate::retry::ResiliencePolicy;
use crate::stack::{StackItem, StackReader};
use crate::types::{CompositeState, ContractState};
use crate::wallet::{GasStationWallet, InternalMessage, WalletKey};

/// Reads and mutates the lottery contract
///
/// Dropping a returned future aborts the in-flight request. A mutating call
/// dropped after submission may still land on chain; re-read the state to
/// find out.
pub trait ContractGateway: Send + Sync {
    /// Read config and state in one getter call
    fn get_state_from_contract(
        &self,
    ) -> impl Future<Output = Result<CompositeState, ContractCallError>> + Send;

    /// Push a new state; returns once the message is accepted for delivery
    fn set_state_on_contract(
        &self,
        state: &ContractState,
    ) -> impl Future<Output = Result<(), ContractCallError>> + Send;

    /// Ask the contract to draw; observe the result through `get_state_from_contract`
    fn initiate_draw_on_contract(
        &self,
    ) -> impl Future<Output = Result<(), ContractCallError>> + Send;
}

impl<T: ContractGateway> ContractGateway for Arc<T> {
    fn get_state_from_contract(
        &self,
    ) -> impl Future<Output = Result<CompositeState, ContractCallError>> + Send {
        (**self).get_state_from_contract()
    }

    fn set_state_on_contract(
        &self,
        state: &ContractState,
    ) -> impl Future<Output = Result<(), ContractCallError>> + Send {
        (**self).set_state_on_contract(state)
    }

    fn initiate_draw_on_contract(
        &self,
    ) -> impl Future<Output = Result<(), ContractCallError>> + Send {
        (**self).initiate_draw_on_contract()
    }
}

#[derive(Debug, Serialize)]
struct GetterRequest<'a> {
    address: String,
    method: &'a str,
    stack: Vec<StackItem>,
}

/// Raw result of a getter call
#[derive(Debug, Clone, Deserialize)]
pub struct GetterResponse {
    pub exit_code: i32,
    #[serde(default)]
    pub gas_used: i64,
    #[serde(default)]
    pub stack: Vec<StackItem>,
}

#[derive(Debug, Serialize)]
struct SendBocRequest {
    boc: String,
}

#[derive(Debug, Deserialize)]
struct SendBocResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// `ContractGateway` over the toncenter HTTP API
pub struct TonCenterGateway {
    client: reqwest::Client,
    base_url: String,
    getter_url: String,
    api_key: Option<String>,
    contract: TonAddress,
    wallet: GasStationWallet,
    message_value: u128,
    message_ttl_secs: u32,
    retry: ResiliencePolicy,
}

impl TonCenterGateway {
    pub fn new(config: &TonApiConfig, retry: ResiliencePolicy) -> Result<Self, ConfigError> {
        let contract: TonAddress = config
            .contract_address
            .parse()
            .map_err(|e| ConfigError::InvalidAddress(format!("contract address: {}", e)))?;
        let wallet_address: TonAddress = config
            .gas_station_address
            .parse()
            .map_err(|e| ConfigError::InvalidAddress(format!("gas station address: {}", e)))?;
        let key = WalletKey::from_mnemonic(&config.gas_station_mnemonic)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|err| {
                warn!(
                    error = %err,
                    "Failed to build TON HTTP client with timeouts; falling back to defaults"
                );
                reqwest::Client::new()
            });

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            getter_url: config.getter_url.clone(),
            api_key: config.api_key.clone(),
            contract,
            wallet: GasStationWallet::new(wallet_address, config.subwallet_id, key),
            message_value: config.message_value_nanotons as u128,
            message_ttl_secs: config.message_ttl_secs,
            retry,
        })
    }

    pub fn contract_address(&self) -> &TonAddress {
        &self.contract
    }

    pub fn wallet(&self) -> &GasStationWallet {
        &self.wallet
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn call_getter(
        &self,
        address: &TonAddress,
        method: &str,
    ) -> Result<GetterResponse, ContractCallError> {
        let body = GetterRequest {
            address: address.to_string(),
            method,
            stack: Vec::new(),
        };
        let response = self
            .post(&self.getter_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ContractCallError::ConnectionFailed {
                url: self.getter_url.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ContractCallError::HttpError { status, body });
        }

        response
            .json::<GetterResponse>()
            .await
            .map_err(|e| ContractCallError::InvalidResponse(e.to_string()))
    }

    /// Run a getter method, retrying transient failures
    pub async fn run_getter(
        &self,
        address: &TonAddress,
        method: &str,
    ) -> Result<GetterResponse, ContractCallError> {
        debug!(address = %address, method = method, "Running getter");

        let response = self
            .retry
            .run(method, || self.call_getter(address, method))
            .await?;

        if response.exit_code != 0 {
            return Err(ContractCallError::NonZeroExitCode {
                method: method.to_string(),
                exit_code: response.exit_code,
            });
        }

        debug!(
            method = method,
            gas_used = response.gas_used,
            items = response.stack.len(),
            "Getter returned"
        );
        Ok(response)
    }

    /// Current seqno of the gas-station wallet
    pub async fn wallet_seqno(&self) -> Result<u32, ContractCallError> {
        let response = self.run_getter(self.wallet.address(), WALLET_SEQNO).await?;
        let decode = |source| ContractCallError::Decode {
            method: WALLET_SEQNO.to_string(),
            source,
        };

        let mut reader = StackReader::new(response.stack);
        let seqno = reader.read_as_long().map_err(decode)?;
        reader.finish().map_err(decode)?;
        u32::try_from(seqno).map_err(|_| {
            decode(crate::error::EncodingError::Overflow {
                value: seqno.to_string(),
                bits: 32,
            })
        })
    }

    /// Submit a serialized external message; never retried
    pub async fn send_boc(&self, boc: String) -> Result<(), ContractCallError> {
        let url = format!("{}/sendBoc", self.base_url);
        let response = self
            .post(&url)
            .json(&SendBocRequest { boc })
            .send()
            .await
            .map_err(|e| ContractCallError::ConnectionFailed {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ContractCallError::HttpError {
                status: status.as_u16(),
                body: text,
            });
        }

        match serde_json::from_str::<SendBocResponse>(&text) {
            Ok(SendBocResponse { ok: true, .. }) => Ok(()),
            Ok(SendBocResponse { error, .. }) => Err(ContractCallError::MessageRejected(
                error.unwrap_or_else(|| "rejected without reason".to_string()),
            )),
            Err(_) if status.is_success() => Err(ContractCallError::InvalidResponse(text)),
            Err(_) => Err(ContractCallError::HttpError {
                status: status.as_u16(),
                body: text,
            }),
        }
    }

    async fn send_to_contract(&self, operation: &str, body: Cell) -> Result<(), ContractCallError> {
        let seqno = self.wallet_seqno().await?;
        let valid_until = (Utc::now().timestamp() as u32).saturating_add(self.message_ttl_secs);

        let message = InternalMessage {
            destination: self.contract,
            value: self.message_value,
            bounce: true,
            body,
        };
        let external = self.wallet.transfer(seqno, valid_until, &message)?;

        debug!(
            operation = operation,
            contract = %self.contract,
            seqno = seqno,
            valid_until = valid_until,
            "Submitting contract message"
        );
        self.send_boc(external.to_boc_base64()).await?;

        info!(
            operation = operation,
            contract = %self.contract,
            seqno = seqno,
            message_hash = %hex::encode(external.hash()),
            "Contract message accepted"
        );
        Ok(())
    }
}

fn query_id() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

impl ContractGateway for TonCenterGateway {
    async fn get_state_from_contract(&self) -> Result<CompositeState, ContractCallError> {
        let response = self.run_getter(&self.contract, GET_COMPOSITE_STATE).await?;
        let decode = |source| ContractCallError::Decode {
            method: GET_COMPOSITE_STATE.to_string(),
            source,
        };

        let mut reader = StackReader::new(response.stack);
        let composite = abi::decode_composite_state(&mut reader).map_err(decode)?;
        reader.finish().map_err(decode)?;

        composite
            .validate()
            .map_err(|e| ContractCallError::InvalidState(e.to_string()))?;
        Ok(composite)
    }

    async fn set_state_on_contract(&self, state: &ContractState) -> Result<(), ContractCallError> {
        let body = abi::set_state_body(state, query_id())?;
        self.send_to_contract("set_state", body).await
    }

    async fn initiate_draw_on_contract(&self) -> Result<(), ContractCallError> {
        let body = abi::initiate_draw_body(query_id())?;
        self.send_to_contract("initiate_draw", body).await
    }
}
