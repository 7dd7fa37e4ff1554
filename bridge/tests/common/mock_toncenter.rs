//! Mock TON HTTP API for integration testing
//!
//! Serves the getter endpoint and `sendBoc`. Submitted messages are decoded
//! down to the contract body and applied to an in-memory contract, so
//! writes show up in the next getter call.

use std::sync::{Arc, RwLock};

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

use lottery_bridge::{
    abi::{self, OP_INITIATE_DRAW, OP_SET_STATE},
    cell::{Cell, TonAddress},
    stack::StackItem,
    types::{CompositeState, ContractConfig, ContractState, DiscountFactor, Draw},
    wallet::SignedTransfer,
};

pub const GETTER_PATH: &str = "/runGetMethod";

#[derive(Debug, Deserialize)]
struct GetterCall {
    address: String,
    method: String,
}

#[derive(Debug, Deserialize)]
struct SendBocCall {
    boc: String,
}

/// Message accepted by the mock, as the contract saw it
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub op: Option<u32>,
    pub seqno: u32,
    pub destination: TonAddress,
    pub bounce: bool,
}

/// Mock contract and wallet state
#[derive(Debug)]
pub struct MockTonState {
    pub contract: TonAddress,
    pub composite: CompositeState,
    pub seqno: u32,
    /// Exit code returned by every getter call when set
    pub exit_code: Option<i32>,
    /// Numbers the contract produces on the next draw
    pub next_draw: Vec<u32>,
    /// Reject every submitted message with this error
    pub reject_with: Option<String>,
    /// Accept `initiate_draw` messages without drawing
    pub ignore_draws: bool,
    /// Verify message signatures against this key
    pub wallet_public_key: Option<[u8; 32]>,
    pub received: Vec<ReceivedMessage>,
    pub getter_calls: Vec<String>,
}

/// Mock TON API server
pub struct MockTonCenter {
    server: MockServer,
    state: Arc<RwLock<MockTonState>>,
}

pub fn sample_config() -> ContractConfig {
    ContractConfig {
        owner: TonAddress {
            workchain: 0,
            hash: [0x0a; 32],
        },
        version: "1.2.0".to_string(),
        required_numbers_count: 5,
        max_number_range: 50,
        max_jackpot_range: 10,
        max_repeats_per_draw: 10,
        default_repeat_selection: 1,
        days_per_draw: 1,
        discount: DiscountFactor {
            for_every: 5,
            get: 1,
        },
    }
}

fn now_secs() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl MockTonCenter {
    /// Start a new mock TON API server
    pub async fn start(contract: TonAddress) -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(RwLock::new(MockTonState {
            contract,
            composite: CompositeState {
                config: sample_config(),
                state: ContractState::default(),
            },
            seqno: 1,
            exit_code: None,
            next_draw: vec![4, 8, 15, 16, 23, 7],
            reject_with: None,
            ignore_draws: false,
            wallet_public_key: None,
            received: Vec::new(),
            getter_calls: Vec::new(),
        }));

        Self { server, state }
    }

    /// Base URL for message submission
    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn getter_url(&self) -> String {
        format!("{}{}", self.server.uri(), GETTER_PATH)
    }

    /// Set up the getter and sendBoc endpoints
    pub async fn setup_standard_mocks(&self) {
        let state = Arc::clone(&self.state);
        Mock::given(method("POST"))
            .and(path(GETTER_PATH))
            .respond_with(move |req: &Request| {
                let call: GetterCall = match serde_json::from_slice(&req.body) {
                    Ok(call) => call,
                    Err(e) => return ResponseTemplate::new(400).set_body_string(e.to_string()),
                };
                let mut state = state.write().unwrap();
                state.getter_calls.push(call.method.clone());

                if let Some(exit_code) = state.exit_code {
                    return ResponseTemplate::new(200).set_body_json(json!({
                        "exit_code": exit_code,
                        "gas_used": 0,
                        "stack": [],
                    }));
                }

                let stack = match call.method.as_str() {
                    "seqno" => vec![StackItem::from_int(state.seqno as i64)],
                    "get_composite_state" if call.address == state.contract.to_string() => {
                        abi::encode_composite_state(&state.composite).unwrap()
                    }
                    _ => {
                        return ResponseTemplate::new(200).set_body_json(json!({
                            "exit_code": 11,
                            "gas_used": 0,
                            "stack": [],
                        }))
                    }
                };

                ResponseTemplate::new(200).set_body_json(json!({
                    "exit_code": 0,
                    "gas_used": 1_500,
                    "stack": stack,
                }))
            })
            .mount(&self.server)
            .await;

        let state = Arc::clone(&self.state);
        Mock::given(method("POST"))
            .and(path("/sendBoc"))
            .respond_with(move |req: &Request| {
                let call: SendBocCall = match serde_json::from_slice(&req.body) {
                    Ok(call) => call,
                    Err(e) => return ResponseTemplate::new(400).set_body_string(e.to_string()),
                };
                let mut state = state.write().unwrap();
                match apply_message(&mut state, &call.boc) {
                    Ok(()) => ResponseTemplate::new(200).set_body_json(json!({
                        "ok": true,
                        "result": {"@type": "ok"},
                    })),
                    Err(error) => ResponseTemplate::new(200).set_body_json(json!({
                        "ok": false,
                        "error": error,
                        "code": 500,
                    })),
                }
            })
            .mount(&self.server)
            .await;
    }

    pub fn set_composite(&self, composite: CompositeState) {
        self.state.write().unwrap().composite = composite;
    }

    pub fn composite(&self) -> CompositeState {
        self.state.read().unwrap().composite.clone()
    }

    pub fn set_exit_code(&self, exit_code: Option<i32>) {
        self.state.write().unwrap().exit_code = exit_code;
    }

    pub fn set_reject_with(&self, error: Option<&str>) {
        self.state.write().unwrap().reject_with = error.map(str::to_string);
    }

    pub fn set_ignore_draws(&self, ignore: bool) {
        self.state.write().unwrap().ignore_draws = ignore;
    }

    pub fn set_wallet_public_key(&self, key: [u8; 32]) {
        self.state.write().unwrap().wallet_public_key = Some(key);
    }

    /// Pretend a draw already happened at `drawn_at`
    pub fn set_latest_draw(&self, numbers: Vec<u32>, drawn_at: chrono::DateTime<Utc>) {
        self.state.write().unwrap().composite.state.latest_draw = Draw {
            numbers,
            drawn_at: Some(drawn_at),
        };
    }

    pub fn seqno(&self) -> u32 {
        self.state.read().unwrap().seqno
    }

    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.state.read().unwrap().received.clone()
    }

    pub fn draws_received(&self) -> usize {
        self.received()
            .iter()
            .filter(|m| m.op == Some(OP_INITIATE_DRAW))
            .count()
    }
}

fn apply_message(state: &mut MockTonState, boc: &str) -> Result<(), String> {
    if let Some(error) = &state.reject_with {
        return Err(error.clone());
    }

    let external = Cell::from_boc_str(boc).map_err(|e| format!("bad boc: {}", e))?;
    let transfer = SignedTransfer::parse(&external).map_err(|e| format!("bad message: {}", e))?;

    if let Some(key) = state.wallet_public_key {
        if !transfer.verify(&key) {
            return Err("signature verification failed".to_string());
        }
    }
    if transfer.seqno != state.seqno {
        return Err(format!(
            "seqno mismatch: expected {}, got {}",
            state.seqno, transfer.seqno
        ));
    }
    if transfer.message.destination != state.contract {
        return Err("unknown destination".to_string());
    }

    state.seqno += 1;
    let op = abi::body_op(&transfer.message.body);
    state.received.push(ReceivedMessage {
        op,
        seqno: transfer.seqno,
        destination: transfer.message.destination,
        bounce: transfer.message.bounce,
    });

    match op {
        Some(OP_SET_STATE) => {
            let (_, contract_state) = abi::parse_set_state_body(&transfer.message.body)
                .map_err(|e| format!("bad set_state body: {}", e))?;
            state.composite.state = contract_state;
        }
        Some(OP_INITIATE_DRAW) if !state.ignore_draws => {
            let numbers = state.next_draw.clone();
            state.composite.state.latest_draw = Draw {
                numbers,
                drawn_at: Some(now_secs()),
            };
        }
        _ => {}
    }
    Ok(())
}
