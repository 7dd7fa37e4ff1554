//! Payment and wallet gateway over the Fireblocks REST API
//!
//! Every request is authenticated twice: the API key header and a short-lived
//! bearer token produced by a [`RequestSigner`]. Requests that are safe to
//! repeat (reads, and writes carrying an idempotency key) go through the
//! resilience policy; everything else is sent exactly once.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FireblocksApiConfig;
use crate::error::{ConfigError, GatewayError};
use crate::payments::{
    Account, AccountType, AddAssetRequest, CreateExternalWalletRequest, ExecutePayoutResponse,
    ExternalWallet, IdempotencyKey, PayoutRequest, PayoutTransactionResponse, Transaction,
    TransactionState, WalletAsset,
};
use crate::retry::ResiliencePolicy;

/// Transactions requested per history page
pub const TRANSACTION_PAGE_LIMIT: u32 = 200;

/// Token lifetime; the gateway rejects tokens older than 30 seconds
const TOKEN_TTL_SECS: i64 = 29;

/// Produces the bearer token for one request
pub trait RequestSigner: Send + Sync {
    /// `uri` is the request path including the query string
    fn sign(&self, uri: &str, body: &[u8]) -> Result<String, GatewayError>;
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    uri: &'a str,
    nonce: String,
    iat: i64,
    exp: i64,
    sub: &'a str,
    #[serde(rename = "bodyHash")]
    body_hash: String,
}

/// RS256 request tokens bound to the path and a SHA-256 of the body
pub struct JwtRequestSigner {
    api_key: String,
    key: EncodingKey,
}

impl JwtRequestSigner {
    pub fn new(api_key: impl Into<String>, private_key_pem: &str) -> Result<Self, ConfigError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            key,
        })
    }

    pub fn from_config(config: &FireblocksApiConfig) -> Result<Self, ConfigError> {
        Self::new(&config.api_key, &config.private_key)
    }
}

impl RequestSigner for JwtRequestSigner {
    fn sign(&self, uri: &str, body: &[u8]) -> Result<String, GatewayError> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            uri,
            nonce: Uuid::new_v4().to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
            sub: &self.api_key,
            body_hash: hex::encode(Sha256::digest(body)),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| GatewayError::Signing(e.to_string()))
    }
}

/// Transaction history of custodial accounts
pub trait WalletGateway: Send + Sync {
    /// One page of transactions with `timestamp >= start_time`, oldest first
    fn get_transactions_for_wallet_account(
        &self,
        account: &Account,
        start_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Transaction>, GatewayError>> + Send;

    /// Largest page the gateway returns
    fn page_limit(&self) -> usize {
        TRANSACTION_PAGE_LIMIT as usize
    }
}

/// External wallets and payouts
///
/// Mutating calls take an optional idempotency key; a call repeated with the
/// same key is a no-op on the gateway side.
pub trait PaymentGateway: Send + Sync {
    fn get_external_wallets(
        &self,
    ) -> impl Future<Output = Result<Vec<ExternalWallet>, GatewayError>> + Send;

    fn get_external_wallet(
        &self,
        wallet_id: &str,
    ) -> impl Future<Output = Result<ExternalWallet, GatewayError>> + Send;

    fn create_external_wallet(
        &self,
        name: &str,
        customer_ref_id: Option<&str>,
        key: Option<&IdempotencyKey>,
    ) -> impl Future<Output = Result<ExternalWallet, GatewayError>> + Send;

    fn add_asset_to_external_wallet(
        &self,
        wallet_id: &str,
        asset_id: &str,
        address: &str,
        tag: Option<&str>,
        key: Option<&IdempotencyKey>,
    ) -> impl Future<Output = Result<WalletAsset, GatewayError>> + Send;

    fn initiate_payout(
        &self,
        request: &PayoutRequest,
        key: Option<&IdempotencyKey>,
    ) -> impl Future<Output = Result<PayoutTransactionResponse, GatewayError>> + Send;

    /// Returns the id of the payout now executing
    fn execute_payout(
        &self,
        payout_id: &str,
        key: Option<&IdempotencyKey>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;

    fn get_payout(
        &self,
        payout_id: &str,
    ) -> impl Future<Output = Result<PayoutTransactionResponse, GatewayError>> + Send;
}

impl<T: WalletGateway> WalletGateway for Arc<T> {
    fn get_transactions_for_wallet_account(
        &self,
        account: &Account,
        start_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Transaction>, GatewayError>> + Send {
        (**self).get_transactions_for_wallet_account(account, start_time)
    }

    fn page_limit(&self) -> usize {
        (**self).page_limit()
    }
}

/// Restartable cursor over an account's transaction history
///
/// Pages are fetched lazily. The cursor sits on the newest timestamp seen so
/// far; transactions already returned at that timestamp are filtered out of
/// the next page. A short page with nothing new moves the cursor one
/// millisecond forward. A full page with nothing new means more transactions
/// share the cursor's timestamp than one page holds; the cursor cannot step
/// past them without losing some, so it fails with
/// [`GatewayError::PageSaturated`] and stays put. The sequence ends at the
/// first empty page.
pub struct TransactionPages<'a, W> {
    gateway: &'a W,
    account: Account,
    cursor: DateTime<Utc>,
    seen_at_cursor: HashSet<String>,
    done: bool,
}

impl<'a, W: WalletGateway> TransactionPages<'a, W> {
    pub fn new(gateway: &'a W, account: Account, start_time: DateTime<Utc>) -> Self {
        Self {
            gateway,
            account,
            cursor: start_time,
            seen_at_cursor: HashSet::new(),
            done: false,
        }
    }

    /// Start time to resume from
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<Transaction>>, GatewayError> {
        while !self.done {
            let mut page = self
                .gateway
                .get_transactions_for_wallet_account(&self.account, self.cursor)
                .await?;
            if page.is_empty() {
                self.done = true;
                break;
            }

            let fetched = page.len();
            page.retain(|t| !(t.timestamp == self.cursor && self.seen_at_cursor.contains(&t.id)));
            let Some(newest) = page.iter().map(|t| t.timestamp).max() else {
                let page_limit = self.gateway.page_limit();
                if fetched >= page_limit {
                    warn!(
                        account_id = %self.account.id,
                        cursor = %self.cursor,
                        page_limit,
                        "Transaction history page saturated at one timestamp"
                    );
                    return Err(GatewayError::PageSaturated {
                        timestamp_ms: self.cursor.timestamp_millis(),
                        page_limit,
                    });
                }
                // everything at the cursor was already returned
                self.cursor += Duration::milliseconds(1);
                self.seen_at_cursor.clear();
                continue;
            };

            if newest != self.cursor {
                self.cursor = newest;
                self.seen_at_cursor.clear();
            }
            self.seen_at_cursor.extend(
                page.iter()
                    .filter(|t| t.timestamp == newest)
                    .map(|t| t.id.clone()),
            );
            return Ok(Some(page));
        }
        Ok(None)
    }
}

/// Transaction as listed by the history endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRecord {
    id: String,
    status: TransactionState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

impl From<TransactionRecord> for Transaction {
    fn from(record: TransactionRecord) -> Self {
        Self {
            id: record.id,
            state: record.status,
            timestamp: record.created_at,
            instruction_id: None,
        }
    }
}

/// Path and query as signed into the request token
fn signing_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn account_type_param(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::VaultAccount => "VAULT_ACCOUNT",
        AccountType::ExternalWallet => "EXTERNAL_WALLET",
        AccountType::InternalWallet => "INTERNAL_WALLET",
        AccountType::Other => "UNKNOWN",
    }
}

/// `PaymentGateway` and `WalletGateway` over the Fireblocks REST API
pub struct FireblocksGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    signer: Box<dyn RequestSigner>,
    retry: ResiliencePolicy,
    request_timeout_secs: u64,
}

impl FireblocksGateway {
    /// Create a gateway signing requests with the configured RSA key
    pub fn new(config: &FireblocksApiConfig, retry: ResiliencePolicy) -> Result<Self, ConfigError> {
        let signer = JwtRequestSigner::from_config(config)?;
        Ok(Self::with_signer(config, signer, retry))
    }

    pub fn with_signer(
        config: &FireblocksApiConfig,
        signer: impl RequestSigner + 'static,
        retry: ResiliencePolicy,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|err| {
                warn!(
                    error = %err,
                    "Failed to build Fireblocks HTTP client with timeouts; falling back to defaults"
                );
                reqwest::Client::new()
            });

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            signer: Box::new(signer),
            retry,
            request_timeout_secs: config.request_timeout_secs,
        }
    }

    /// API URL with every path segment and query value percent-encoded
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, GatewayError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        body: &[u8],
        key: Option<&IdempotencyKey>,
    ) -> Result<T, GatewayError> {
        let token = self.signer.sign(&signing_uri(url), body)?;

        let mut request = self
            .client
            .request(method, url.clone())
            .header("X-API-Key", &self.api_key)
            .bearer_auth(token);
        if let Some(key) = key {
            request = request.header("Idempotency-Key", key.as_str());
        }
        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    seconds: self.request_timeout_secs,
                }
            } else {
                GatewayError::ConnectionFailed {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpError { status, body });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::ParseError(e.to_string()))
    }

    async fn request<T, B>(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<&B>,
        key: Option<&IdempotencyKey>,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let bytes = match body {
            Some(body) => {
                serde_json::to_vec(body).map_err(|e| GatewayError::ParseError(e.to_string()))?
            }
            None => Vec::new(),
        };

        debug!(
            operation = operation,
            method = %method,
            path = url.path(),
            idempotency_key = key.map(|k| k.as_str()),
            "Payment gateway request"
        );

        let single_shot = ResiliencePolicy::none();
        let policy = if method == Method::GET || key.is_some() {
            &self.retry
        } else {
            &single_shot
        };
        policy
            .run(operation, || self.send_once(method.clone(), &url, &bytes, key))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, url: Url) -> Result<T, GatewayError> {
        self.request::<T, ()>(operation, Method::GET, url, None, None)
            .await
    }
}

impl PaymentGateway for FireblocksGateway {
    async fn get_external_wallets(&self) -> Result<Vec<ExternalWallet>, GatewayError> {
        let url = self.endpoint(&["v1", "external_wallets"], &[])?;
        self.get("get_external_wallets", url).await
    }

    async fn get_external_wallet(&self, wallet_id: &str) -> Result<ExternalWallet, GatewayError> {
        let url = self.endpoint(&["v1", "external_wallets", wallet_id], &[])?;
        self.get("get_external_wallet", url).await
    }

    async fn create_external_wallet(
        &self,
        name: &str,
        customer_ref_id: Option<&str>,
        key: Option<&IdempotencyKey>,
    ) -> Result<ExternalWallet, GatewayError> {
        let body = CreateExternalWalletRequest {
            name: name.to_string(),
            customer_ref_id: customer_ref_id.map(str::to_string),
        };
        let url = self.endpoint(&["v1", "external_wallets"], &[])?;
        let wallet: ExternalWallet = self
            .request(
                "create_external_wallet",
                Method::POST,
                url,
                Some(&body),
                key,
            )
            .await?;
        info!(wallet_id = %wallet.id, name = %wallet.name, "External wallet created");
        Ok(wallet)
    }

    async fn add_asset_to_external_wallet(
        &self,
        wallet_id: &str,
        asset_id: &str,
        address: &str,
        tag: Option<&str>,
        key: Option<&IdempotencyKey>,
    ) -> Result<WalletAsset, GatewayError> {
        let body = AddAssetRequest {
            address: address.to_string(),
            tag: tag.map(str::to_string),
        };
        let url = self.endpoint(&["v1", "external_wallets", wallet_id, asset_id], &[])?;
        let asset: WalletAsset = self
            .request(
                "add_asset_to_external_wallet",
                Method::POST,
                url,
                Some(&body),
                key,
            )
            .await?;
        info!(wallet_id = wallet_id, asset_id = %asset.id, "Asset added to external wallet");
        Ok(asset)
    }

    async fn initiate_payout(
        &self,
        request: &PayoutRequest,
        key: Option<&IdempotencyKey>,
    ) -> Result<PayoutTransactionResponse, GatewayError> {
        let url = self.endpoint(&["v1", "payments", "payout"], &[])?;
        self.request(
            "initiate_payout",
            Method::POST,
            url,
            Some(request),
            key,
        )
        .await
    }

    async fn execute_payout(
        &self,
        payout_id: &str,
        key: Option<&IdempotencyKey>,
    ) -> Result<String, GatewayError> {
        let url = self.endpoint(
            &["v1", "payments", "payout", payout_id, "actions", "execute"],
            &[],
        )?;
        let response: ExecutePayoutResponse = self
            .request::<_, ()>(
                "execute_payout",
                Method::POST,
                url,
                None,
                key,
            )
            .await?;
        Ok(response.payout_id)
    }

    async fn get_payout(&self, payout_id: &str) -> Result<PayoutTransactionResponse, GatewayError> {
        let url = self.endpoint(&["v1", "payments", "payout", payout_id], &[])?;
        self.get("get_payout", url).await
    }
}

impl WalletGateway for FireblocksGateway {
    async fn get_transactions_for_wallet_account(
        &self,
        account: &Account,
        start_time: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, GatewayError> {
        // `after` is exclusive
        let after = (start_time.timestamp_millis() - 1).to_string();
        let limit = TRANSACTION_PAGE_LIMIT.to_string();
        let url = self.endpoint(
            &["v1", "transactions"],
            &[
                ("sourceType", account_type_param(account.account_type)),
                ("sourceId", account.id.as_str()),
                ("after", after.as_str()),
                ("orderBy", "createdAt"),
                ("sort", "ASC"),
                ("limit", limit.as_str()),
            ],
        )?;
        let records: Vec<TransactionRecord> =
            self.get("get_transactions_for_wallet_account", url).await?;

        let mut transactions: Vec<Transaction> = records
            .into_iter()
            .map(Transaction::from)
            .filter(|t| t.timestamp >= start_time)
            .collect();
        transactions.sort_by_key(|t| t.timestamp);
        Ok(transactions)
    }
}
