//! Mock Fireblocks API for integration testing
//!
//! Payouts move Created -> Executing -> Completed: execution is requested
//! explicitly and completion happens after a configurable number of polls.
//! Idempotency keys are honoured for payout initiation and execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::json;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, Request, ResponseTemplate,
};

use lottery_bridge::payments::{
    ExternalWallet, InstructionSetResponse, PayoutRequest, PayoutState,
    PayoutTransactionResponse, Transaction, TransactionState, WalletAsset,
};

/// Transaction listed by the history endpoint
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: String,
    pub source_id: String,
    pub status: TransactionState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct MockPayout {
    record: PayoutTransactionResponse,
    polls_until_complete: u32,
}

/// Mock Fireblocks state
#[derive(Debug, Default)]
pub struct MockFireblocksState {
    payouts: HashMap<String, MockPayout>,
    keyed_payouts: HashMap<String, String>,
    /// Polls a payout stays `Executing` before completing
    pub executing_polls: u32,
    /// Complete payouts without any instruction transaction
    pub complete_without_transactions: bool,
    pub wallets: Vec<ExternalWallet>,
    pub history: Vec<HistoryEntry>,
    /// (method, path, idempotency key) of every request
    pub requests: Vec<(String, String, Option<String>)>,
    /// `after` parameters of history queries
    pub history_queries: Vec<i64>,
    next_id: u32,
}

impl MockFireblocksState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// Mock Fireblocks API server
pub struct MockFireblocks {
    server: MockServer,
    state: Arc<RwLock<MockFireblocksState>>,
}

fn idempotency_key(req: &Request) -> Option<String> {
    req.headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn segment(req: &Request, index: usize) -> String {
    req.url
        .path_segments()
        .and_then(|mut s| s.nth(index))
        .unwrap_or_default()
        .to_string()
}

fn not_found(what: &str) -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({"message": format!("{} not found", what)}))
}

impl MockFireblocks {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(RwLock::new(MockFireblocksState {
            executing_polls: 1,
            ..Default::default()
        }));

        Self { server, state }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Set up all payout, wallet and transaction endpoints
    pub async fn setup_standard_mocks(&self) {
        self.mount_payouts().await;
        self.mount_wallets().await;
        self.mount_history().await;
    }

    async fn mount_payouts(&self) {
        let state = Arc::clone(&self.state);
        Mock::given(method("POST"))
            .and(path("/v1/payments/payout"))
            .respond_with(move |req: &Request| {
                let request: PayoutRequest = match serde_json::from_slice(&req.body) {
                    Ok(request) => request,
                    Err(e) => return ResponseTemplate::new(400).set_body_string(e.to_string()),
                };
                let key = idempotency_key(req);
                let mut state = state.write().unwrap();
                state
                    .requests
                    .push(("POST".into(), req.url.path().to_string(), key.clone()));

                if let Some(existing) = key.as_ref().and_then(|k| state.keyed_payouts.get(k)) {
                    let record = state.payouts[existing].record.clone();
                    return ResponseTemplate::new(200).set_body_json(record);
                }

                let payout_id = state.next_id("payout");
                let instruction_set = request
                    .instruction_set
                    .iter()
                    .enumerate()
                    .map(|(i, ins)| InstructionSetResponse {
                        id: format!("{}-ins-{}", payout_id, i),
                        payee_account: ins.payee_account.clone(),
                        amount: ins.amount.clone(),
                        state: "NOT_STARTED".to_string(),
                        transactions: Vec::new(),
                    })
                    .collect();
                let record = PayoutTransactionResponse {
                    payout_id: payout_id.clone(),
                    payment_account: request.payment_account,
                    created_at: Utc::now(),
                    state: PayoutState::Created,
                    status: "REQUESTED".to_string(),
                    reason_of_failure: None,
                    init_method: Some("API".to_string()),
                    instruction_set,
                    report_url: None,
                };
                let polls_until_complete = state.executing_polls;
                state.payouts.insert(
                    payout_id.clone(),
                    MockPayout {
                        record: record.clone(),
                        polls_until_complete,
                    },
                );
                if let Some(key) = key {
                    state.keyed_payouts.insert(key, payout_id);
                }
                ResponseTemplate::new(200).set_body_json(record)
            })
            .mount(&self.server)
            .await;

        let state = Arc::clone(&self.state);
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1/payments/payout/[^/]+/actions/execute$"))
            .respond_with(move |req: &Request| {
                let payout_id = segment(req, 3);
                let mut state = state.write().unwrap();
                state.requests.push((
                    "POST".into(),
                    req.url.path().to_string(),
                    idempotency_key(req),
                ));

                let Some(payout) = state.payouts.get_mut(&payout_id) else {
                    return not_found("payout");
                };
                if payout.record.state == PayoutState::Created {
                    payout.record.state = PayoutState::Executing;
                    payout.record.status = "PROCESSING".to_string();
                }
                ResponseTemplate::new(200).set_body_json(json!({ "payoutId": payout_id }))
            })
            .mount(&self.server)
            .await;

        let state = Arc::clone(&self.state);
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/payments/payout/[^/]+$"))
            .respond_with(move |req: &Request| {
                let payout_id = segment(req, 3);
                let mut state = state.write().unwrap();
                state
                    .requests
                    .push(("GET".into(), req.url.path().to_string(), None));
                let without_transactions = state.complete_without_transactions;

                let Some(payout) = state.payouts.get_mut(&payout_id) else {
                    return not_found("payout");
                };
                if payout.record.state == PayoutState::Executing {
                    if payout.polls_until_complete == 0 {
                        complete(&mut payout.record, without_transactions);
                    } else {
                        payout.polls_until_complete -= 1;
                    }
                }
                ResponseTemplate::new(200).set_body_json(payout.record.clone())
            })
            .mount(&self.server)
            .await;
    }

    async fn mount_wallets(&self) {
        let state = Arc::clone(&self.state);
        Mock::given(method("GET"))
            .and(path("/v1/external_wallets"))
            .respond_with(move |_: &Request| {
                let state = state.read().unwrap();
                ResponseTemplate::new(200).set_body_json(state.wallets.clone())
            })
            .mount(&self.server)
            .await;

        let state = Arc::clone(&self.state);
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/external_wallets/[^/]+$"))
            .respond_with(move |req: &Request| {
                let wallet_id = segment(req, 2);
                let state = state.read().unwrap();
                match state.wallets.iter().find(|w| w.id == wallet_id) {
                    Some(wallet) => ResponseTemplate::new(200).set_body_json(wallet),
                    None => not_found("wallet"),
                }
            })
            .mount(&self.server)
            .await;

        let state = Arc::clone(&self.state);
        Mock::given(method("POST"))
            .and(path("/v1/external_wallets"))
            .respond_with(move |req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
                let mut state = state.write().unwrap();
                state.requests.push((
                    "POST".into(),
                    req.url.path().to_string(),
                    idempotency_key(req),
                ));

                let wallet = ExternalWallet {
                    id: state.next_id("wallet"),
                    name: body["name"].as_str().unwrap_or_default().to_string(),
                    customer_ref_id: body["customerRefId"].as_str().map(str::to_string),
                    assets: Vec::new(),
                };
                state.wallets.push(wallet.clone());
                ResponseTemplate::new(200).set_body_json(wallet)
            })
            .mount(&self.server)
            .await;

        let state = Arc::clone(&self.state);
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1/external_wallets/[^/]+/[^/]+$"))
            .respond_with(move |req: &Request| {
                let wallet_id = segment(req, 2);
                let asset_id = segment(req, 3);
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
                let mut state = state.write().unwrap();

                let Some(wallet) = state.wallets.iter_mut().find(|w| w.id == wallet_id) else {
                    return not_found("wallet");
                };
                let asset = WalletAsset {
                    id: asset_id,
                    balance: "0".to_string(),
                    locked_amount: "0".to_string(),
                    status: "APPROVED".to_string(),
                    address: body["address"].as_str().map(str::to_string),
                    tag: body["tag"].as_str().map(str::to_string),
                    activation_time: None,
                };
                wallet.assets.push(asset.clone());
                ResponseTemplate::new(200).set_body_json(asset)
            })
            .mount(&self.server)
            .await;
    }

    async fn mount_history(&self) {
        let state = Arc::clone(&self.state);
        Mock::given(method("GET"))
            .and(path("/v1/transactions"))
            .respond_with(move |req: &Request| {
                let params: HashMap<String, String> = req.url.query_pairs().into_owned().collect();
                let source_id = params.get("sourceId").cloned().unwrap_or_default();
                let after: i64 = params
                    .get("after")
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(0);
                let limit: usize = params
                    .get("limit")
                    .and_then(|l| l.parse().ok())
                    .unwrap_or(200);

                let mut state = state.write().unwrap();
                state.history_queries.push(after);

                let mut entries: Vec<&HistoryEntry> = state
                    .history
                    .iter()
                    .filter(|e| e.source_id == source_id && e.created_at.timestamp_millis() > after)
                    .collect();
                entries.sort_by_key(|e| e.created_at);

                let body: Vec<serde_json::Value> = entries
                    .into_iter()
                    .take(limit)
                    .map(|e| {
                        json!({
                            "id": e.id,
                            "status": e.status,
                            "createdAt": e.created_at.timestamp_millis(),
                            "source": {"type": "VAULT_ACCOUNT", "id": e.source_id},
                        })
                    })
                    .collect();
                ResponseTemplate::new(200).set_body_json(body)
            })
            .mount(&self.server)
            .await;
    }

    pub fn set_executing_polls(&self, polls: u32) {
        self.state.write().unwrap().executing_polls = polls;
    }

    pub fn set_complete_without_transactions(&self, value: bool) {
        self.state.write().unwrap().complete_without_transactions = value;
    }

    pub fn add_history(&self, entries: Vec<HistoryEntry>) {
        self.state.write().unwrap().history.extend(entries);
    }

    pub fn requests(&self) -> Vec<(String, String, Option<String>)> {
        self.state.read().unwrap().requests.clone()
    }

    pub fn history_queries(&self) -> Vec<i64> {
        self.state.read().unwrap().history_queries.clone()
    }

    pub fn payout_count(&self) -> usize {
        self.state.read().unwrap().payouts.len()
    }

    pub fn payout(&self, payout_id: &str) -> Option<PayoutTransactionResponse> {
        self.state
            .read()
            .unwrap()
            .payouts
            .get(payout_id)
            .map(|p| p.record.clone())
    }
}

fn complete(record: &mut PayoutTransactionResponse, without_transactions: bool) {
    record.state = PayoutState::Completed;
    record.status = "DONE".to_string();
    for instruction in &mut record.instruction_set {
        instruction.state = "COMPLETED".to_string();
        if !without_transactions {
            instruction.transactions.push(Transaction {
                id: format!("{}-tx", instruction.id),
                state: TransactionState::Completed,
                timestamp: Utc::now(),
                instruction_id: Some(instruction.id.clone()),
            });
        }
    }
}
