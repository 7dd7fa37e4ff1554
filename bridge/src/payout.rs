//! Payout orchestration: initiate, execute, poll to a terminal state

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PayoutPolicyConfig;
use crate::error::{BridgeError, BridgeResult, TimeoutError, ValidationError};
use crate::fireblocks::PaymentGateway;
use crate::payments::{
    Account, ExternalWallet, IdempotencyKey, InstructionSet, PayoutAttempt, PayoutRequest,
    PayoutState, PayoutTransactionResponse, WalletAsset,
};
use crate::types::BridgeStats;

/// Drives payouts through a `PaymentGateway`
///
/// A single workflow is strictly sequential; separate workflows may share one
/// orchestrator.
pub struct PayoutOrchestrator<G> {
    gateway: G,
    poll_interval: Duration,
    max_poll_attempts: u32,
    stats: Option<Arc<RwLock<BridgeStats>>>,
}

/// Reject instruction sets the gateway must never see
pub fn validate_instructions(
    payer: &Account,
    instructions: &[InstructionSet],
) -> Result<(), ValidationError> {
    if payer.id.trim().is_empty() {
        return Err(ValidationError::MissingPayer);
    }
    if instructions.is_empty() {
        return Err(ValidationError::EmptyInstructionSet);
    }
    for (index, instruction) in instructions.iter().enumerate() {
        if instruction.payee_account.id.trim().is_empty() {
            return Err(ValidationError::MissingPayee { index });
        }
        if !instruction.amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount {
                index,
                amount: instruction.amount.amount.clone(),
            });
        }
    }
    Ok(())
}

fn mark_failed(mut record: PayoutTransactionResponse, reason: String) -> PayoutTransactionResponse {
    record.state = PayoutState::Failed;
    record.reason_of_failure = Some(reason);
    record
}

impl<G: PaymentGateway> PayoutOrchestrator<G> {
    pub fn new(gateway: G, policy: &PayoutPolicyConfig) -> Self {
        Self {
            gateway,
            poll_interval: policy.poll_interval(),
            max_poll_attempts: policy.max_poll_attempts.max(1),
            stats: None,
        }
    }

    /// Count workflow outcomes in shared stats
    pub fn with_stats(mut self, stats: Arc<RwLock<BridgeStats>>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Create a payout; nothing reaches the gateway unless validation passes
    pub async fn initiate_payout_transaction(
        &self,
        payer: &Account,
        instructions: &[InstructionSet],
        key: Option<&IdempotencyKey>,
    ) -> BridgeResult<PayoutTransactionResponse> {
        validate_instructions(payer, instructions)?;

        let request = PayoutRequest {
            payment_account: payer.clone(),
            instruction_set: instructions.to_vec(),
        };
        let payout = self.gateway.initiate_payout(&request, key).await?;

        info!(
            payout_id = %payout.payout_id,
            payer = %payer.id,
            instructions = instructions.len(),
            state = %payout.state,
            "Payout initiated"
        );
        Ok(payout)
    }

    /// Move a created payout to executing
    pub async fn execute_payout_request(
        &self,
        payout_id: &str,
        key: Option<&IdempotencyKey>,
    ) -> BridgeResult<String> {
        if payout_id.trim().is_empty() {
            return Err(ValidationError::MissingPayoutId.into());
        }
        let executing = self.gateway.execute_payout(payout_id, key).await?;
        info!(payout_id = %executing, "Payout execution requested");
        Ok(executing)
    }

    pub async fn get_payout(&self, payout_id: &str) -> BridgeResult<PayoutTransactionResponse> {
        if payout_id.trim().is_empty() {
            return Err(ValidationError::MissingPayoutId.into());
        }
        Ok(self.gateway.get_payout(payout_id).await?)
    }

    /// Poll until the payout is `Completed` or `Failed`
    ///
    /// Gives up with `TimeoutError` once the poll budget is spent; the payout
    /// itself is left running.
    pub async fn await_terminal(&self, payout_id: &str) -> BridgeResult<PayoutTransactionResponse> {
        let mut last_state = PayoutState::Unknown;

        for attempt in 1..=self.max_poll_attempts {
            let payout = self.get_payout(payout_id).await?;
            if payout.is_terminal() {
                let settled = payout.settle_terminal();
                info!(
                    payout_id = payout_id,
                    state = %settled.state,
                    attempts = attempt,
                    reason = settled.reason_of_failure.as_deref(),
                    "Payout reached terminal state"
                );
                return Ok(settled);
            }

            if payout.state != last_state {
                debug!(payout_id = payout_id, state = %payout.state, "Payout state changed");
            }
            last_state = payout.state;

            if attempt < self.max_poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(TimeoutError {
            payout_id: payout_id.to_string(),
            attempts: self.max_poll_attempts,
            last_state: last_state.as_str().to_string(),
        }
        .into())
    }

    /// Full workflow for one logical payout
    ///
    /// Never fails: every error is folded into a `Failed` record carrying a
    /// reason. Retrying with the same `attempt` reuses its idempotency keys.
    pub async fn run_payout(
        &self,
        payer: &Account,
        instructions: &[InstructionSet],
        attempt: &PayoutAttempt,
    ) -> PayoutTransactionResponse {
        let (record, timed_out) = match self.drive(payer, instructions, attempt).await {
            Ok(record) => (record, false),
            Err((record, e)) => (record, matches!(e, BridgeError::Timeout(_))),
        };

        if let Some(stats) = &self.stats {
            let mut stats = stats.write().await;
            match record.state {
                PayoutState::Completed => stats.payouts_completed += 1,
                _ if timed_out => stats.payouts_timed_out += 1,
                _ => stats.payouts_failed += 1,
            }
        }
        record
    }

    /// Run the workflow; on error, also hand back the record to report
    async fn drive(
        &self,
        payer: &Account,
        instructions: &[InstructionSet],
        attempt: &PayoutAttempt,
    ) -> Result<PayoutTransactionResponse, (PayoutTransactionResponse, BridgeError)> {
        let created = match self
            .initiate_payout_transaction(payer, instructions, Some(&attempt.initiate_key))
            .await
        {
            Ok(payout) => payout,
            Err(e) => {
                warn!(payer = %payer.id, error = %e, "Payout initiation failed");
                let record = PayoutTransactionResponse::failed(
                    "",
                    payer.clone(),
                    instructions,
                    format!("initiation failed: {}", e),
                );
                return Err((record, e));
            }
        };

        // A replayed initiate key may hand back a payout that already finished
        if created.is_terminal() {
            return Ok(created.settle_terminal());
        }

        let payout_id = created.payout_id.clone();
        if created.state == PayoutState::Created {
            if let Err(e) = self
                .execute_payout_request(&payout_id, Some(&attempt.execute_key))
                .await
            {
                let progressed = matches!(
                    self.get_payout(&payout_id).await,
                    Ok(ref p) if p.state != PayoutState::Created
                );
                if !progressed {
                    warn!(payout_id = %payout_id, error = %e, "Payout execution failed");
                    let reason = format!("execution failed: {}", e);
                    return Err((mark_failed(created, reason), e));
                }
                warn!(
                    payout_id = %payout_id,
                    error = %e,
                    "Execution request failed but payout is already executing"
                );
            }
        }

        self.await_terminal(&payout_id).await.map_err(|e| {
            warn!(payout_id = %payout_id, error = %e, "Payout did not reach a terminal state");
            (mark_failed(created, e.to_string()), e)
        })
    }

    pub async fn get_external_wallets(&self) -> BridgeResult<Vec<ExternalWallet>> {
        Ok(self.gateway.get_external_wallets().await?)
    }

    pub async fn get_external_wallet(&self, wallet_id: &str) -> BridgeResult<ExternalWallet> {
        Ok(self.gateway.get_external_wallet(wallet_id).await?)
    }

    pub async fn create_external_wallet(
        &self,
        name: &str,
        customer_ref_id: Option<&str>,
        key: Option<&IdempotencyKey>,
    ) -> BridgeResult<ExternalWallet> {
        Ok(self
            .gateway
            .create_external_wallet(name, customer_ref_id, key)
            .await?)
    }

    pub async fn add_asset_to_external_wallet(
        &self,
        wallet_id: &str,
        asset_id: &str,
        address: &str,
        tag: Option<&str>,
        key: Option<&IdempotencyKey>,
    ) -> BridgeResult<WalletAsset> {
        Ok(self
            .gateway
            .add_asset_to_external_wallet(wallet_id, asset_id, address, tag, key)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::payments::{
        InstructionSetResponse, Transaction, TransactionAmount, TransactionState,
    };
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Gateway that replays scripted poll results and records every call
    #[derive(Default)]
    struct ScriptedGateway {
        initiate_state: Option<PayoutState>,
        fail_initiate: bool,
        fail_execute: bool,
        polls: Mutex<VecDeque<PayoutTransactionResponse>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn with_polls(polls: Vec<PayoutTransactionResponse>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn record(state: PayoutState, settled: bool) -> PayoutTransactionResponse {
        let transactions = if settled {
            vec![Transaction {
                id: "tx-1".into(),
                state: TransactionState::Completed,
                timestamp: Utc::now(),
                instruction_id: Some("i-1".into()),
            }]
        } else {
            Vec::new()
        };
        PayoutTransactionResponse {
            payout_id: "payout-1".into(),
            payment_account: Account::vault("acct-1"),
            created_at: Utc::now(),
            state,
            status: String::new(),
            reason_of_failure: None,
            init_method: Some("API".into()),
            instruction_set: vec![InstructionSetResponse {
                id: "i-1".into(),
                payee_account: Account::external_wallet("acct-2"),
                amount: TransactionAmount::new("10.0", "USDC"),
                state: String::new(),
                transactions,
            }],
            report_url: None,
        }
    }

    impl PaymentGateway for ScriptedGateway {
        async fn get_external_wallets(&self) -> Result<Vec<ExternalWallet>, GatewayError> {
            self.log("get_external_wallets".into());
            Ok(Vec::new())
        }

        async fn get_external_wallet(&self, wallet_id: &str) -> Result<ExternalWallet, GatewayError> {
            self.log(format!("get_external_wallet:{}", wallet_id));
            Err(GatewayError::HttpError {
                status: 404,
                body: "not found".into(),
            })
        }

        async fn create_external_wallet(
            &self,
            name: &str,
            customer_ref_id: Option<&str>,
            _key: Option<&IdempotencyKey>,
        ) -> Result<ExternalWallet, GatewayError> {
            self.log(format!("create_external_wallet:{}", name));
            Ok(ExternalWallet {
                id: "w-1".into(),
                name: name.into(),
                customer_ref_id: customer_ref_id.map(str::to_string),
                assets: Vec::new(),
            })
        }

        async fn add_asset_to_external_wallet(
            &self,
            wallet_id: &str,
            asset_id: &str,
            address: &str,
            tag: Option<&str>,
            _key: Option<&IdempotencyKey>,
        ) -> Result<WalletAsset, GatewayError> {
            self.log(format!("add_asset:{}:{}", wallet_id, asset_id));
            Ok(WalletAsset {
                id: asset_id.into(),
                balance: "0".into(),
                locked_amount: "0".into(),
                status: "APPROVED".into(),
                address: Some(address.into()),
                tag: tag.map(str::to_string),
                activation_time: None,
            })
        }

        async fn initiate_payout(
            &self,
            _request: &PayoutRequest,
            key: Option<&IdempotencyKey>,
        ) -> Result<PayoutTransactionResponse, GatewayError> {
            self.log(format!("initiate:{}", key.map(|k| k.as_str()).unwrap_or("-")));
            if self.fail_initiate {
                return Err(GatewayError::HttpError {
                    status: 400,
                    body: "bad payer".into(),
                });
            }
            Ok(record(
                self.initiate_state.unwrap_or(PayoutState::Created),
                false,
            ))
        }

        async fn execute_payout(
            &self,
            payout_id: &str,
            key: Option<&IdempotencyKey>,
        ) -> Result<String, GatewayError> {
            self.log(format!("execute:{}", key.map(|k| k.as_str()).unwrap_or("-")));
            if self.fail_execute {
                return Err(GatewayError::ConnectionFailed {
                    url: "test".into(),
                    message: "reset".into(),
                });
            }
            Ok(payout_id.to_string())
        }

        async fn get_payout(&self, _payout_id: &str) -> Result<PayoutTransactionResponse, GatewayError> {
            self.log("get_payout".into());
            let mut polls = self.polls.lock().unwrap();
            let next = if polls.len() > 1 {
                polls.pop_front()
            } else {
                polls.front().cloned()
            };
            Ok(next.unwrap_or_else(|| record(PayoutState::Executing, false)))
        }
    }

    fn orchestrator(gateway: ScriptedGateway, max_poll_attempts: u32) -> PayoutOrchestrator<ScriptedGateway> {
        PayoutOrchestrator::new(
            gateway,
            &PayoutPolicyConfig {
                poll_interval_secs: 0,
                max_poll_attempts,
            },
        )
    }

    fn instructions() -> Vec<InstructionSet> {
        vec![InstructionSet::new(
            Account::external_wallet("acct-2"),
            TransactionAmount::new("10.0", "USDC"),
        )]
    }

    #[tokio::test]
    async fn test_empty_instruction_set_makes_no_gateway_call() {
        let orchestrator = orchestrator(ScriptedGateway::default(), 3);
        let err = orchestrator
            .initiate_payout_transaction(&Account::vault("acct-1"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Validation(ValidationError::EmptyInstructionSet)
        ));
        assert!(orchestrator.gateway().calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_instructions_are_rejected() {
        let orchestrator = orchestrator(ScriptedGateway::default(), 3);
        let payer = Account::vault("acct-1");

        let missing_payee = vec![InstructionSet::new(
            Account::external_wallet(" "),
            TransactionAmount::new("1", "USDC"),
        )];
        let zero = vec![InstructionSet::new(
            Account::external_wallet("acct-2"),
            TransactionAmount::new("0", "USDC"),
        )];

        assert!(matches!(
            orchestrator.initiate_payout_transaction(&payer, &missing_payee, None).await,
            Err(BridgeError::Validation(ValidationError::MissingPayee { index: 0 }))
        ));
        assert!(matches!(
            orchestrator.initiate_payout_transaction(&payer, &zero, None).await,
            Err(BridgeError::Validation(ValidationError::NonPositiveAmount { index: 0, .. }))
        ));
        assert!(matches!(
            orchestrator
                .initiate_payout_transaction(&Account::vault(""), &instructions(), None)
                .await,
            Err(BridgeError::Validation(ValidationError::MissingPayer))
        ));
        assert!(orchestrator.gateway().calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_payout_completes_with_attempt_keys() {
        let gateway = ScriptedGateway::with_polls(vec![
            record(PayoutState::Executing, false),
            record(PayoutState::Completed, true),
        ]);
        let stats = Arc::new(RwLock::new(BridgeStats::default()));
        let orchestrator = orchestrator(gateway, 5).with_stats(stats.clone());
        let attempt = PayoutAttempt::new();

        let result = orchestrator
            .run_payout(&Account::vault("acct-1"), &instructions(), &attempt)
            .await;

        assert_eq!(result.state, PayoutState::Completed);
        assert!(result.reason_of_failure.is_none());
        assert_eq!(
            orchestrator.gateway().calls(),
            vec![
                format!("initiate:{}", attempt.initiate_key),
                format!("execute:{}", attempt.execute_key),
                "get_payout".to_string(),
                "get_payout".to_string(),
            ]
        );
        assert_eq!(stats.read().await.payouts_completed, 1);
    }

    #[tokio::test]
    async fn test_await_terminal_times_out_without_cancelling() {
        let orchestrator = orchestrator(ScriptedGateway::default(), 3);
        let err = orchestrator.await_terminal("payout-1").await.unwrap_err();
        match err {
            BridgeError::Timeout(t) => {
                assert_eq!(t.attempts, 3);
                assert_eq!(t.last_state, "EXECUTING");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let calls = orchestrator.gateway().calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c == "get_payout"));
    }

    #[tokio::test]
    async fn test_completed_payout_with_unsettled_instruction_fails() {
        let gateway = ScriptedGateway::with_polls(vec![record(PayoutState::Completed, false)]);
        let orchestrator = orchestrator(gateway, 3);
        let payout = orchestrator.await_terminal("payout-1").await.unwrap();
        assert_eq!(payout.state, PayoutState::Failed);
        assert!(payout.reason_of_failure.unwrap().contains("i-1"));
    }

    #[tokio::test]
    async fn test_polling_a_terminal_payout_is_stable() {
        let gateway = ScriptedGateway::with_polls(vec![record(PayoutState::Completed, true)]);
        let orchestrator = orchestrator(gateway, 3);
        let first = orchestrator.await_terminal("payout-1").await.unwrap();
        let second = orchestrator.await_terminal("payout-1").await.unwrap();
        assert_eq!(first.state, PayoutState::Completed);
        assert_eq!(first.state, second.state);
        assert_eq!(first.instruction_set, second.instruction_set);
    }

    #[tokio::test]
    async fn test_run_payout_folds_errors_into_failed_record() {
        let gateway = ScriptedGateway {
            fail_initiate: true,
            ..Default::default()
        };
        let stats = Arc::new(RwLock::new(BridgeStats::default()));
        let orchestrator = orchestrator(gateway, 3).with_stats(stats.clone());

        let result = orchestrator
            .run_payout(&Account::vault("acct-1"), &instructions(), &PayoutAttempt::new())
            .await;
        assert_eq!(result.state, PayoutState::Failed);
        assert!(result.reason_of_failure.unwrap().contains("initiation failed"));
        assert_eq!(stats.read().await.payouts_failed, 1);

        let empty = orchestrator
            .run_payout(&Account::vault("acct-1"), &[], &PayoutAttempt::new())
            .await;
        assert_eq!(empty.state, PayoutState::Failed);
        assert!(empty.reason_of_failure.is_some());
    }

    #[tokio::test]
    async fn test_run_payout_timeout_is_counted() {
        let stats = Arc::new(RwLock::new(BridgeStats::default()));
        let orchestrator = orchestrator(ScriptedGateway::default(), 2).with_stats(stats.clone());
        let result = orchestrator
            .run_payout(&Account::vault("acct-1"), &instructions(), &PayoutAttempt::new())
            .await;
        assert_eq!(result.state, PayoutState::Failed);
        assert_eq!(stats.read().await.payouts_timed_out, 1);
    }

    #[tokio::test]
    async fn test_execute_failure_after_progress_keeps_polling() {
        let gateway = ScriptedGateway {
            fail_execute: true,
            ..ScriptedGateway::with_polls(vec![
                record(PayoutState::Executing, false),
                record(PayoutState::Completed, true),
            ])
        };
        let orchestrator = orchestrator(gateway, 5);
        let result = orchestrator
            .run_payout(&Account::vault("acct-1"), &instructions(), &PayoutAttempt::new())
            .await;
        assert_eq!(result.state, PayoutState::Completed);
    }

    #[tokio::test]
    async fn test_replayed_terminal_initiation_skips_execute() {
        let gateway = ScriptedGateway {
            initiate_state: Some(PayoutState::Failed),
            ..Default::default()
        };
        let orchestrator = orchestrator(gateway, 3);
        let result = orchestrator
            .run_payout(&Account::vault("acct-1"), &instructions(), &PayoutAttempt::new())
            .await;
        assert_eq!(result.state, PayoutState::Failed);
        assert_eq!(orchestrator.gateway().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_requires_payout_id() {
        let orchestrator = orchestrator(ScriptedGateway::default(), 1);
        assert!(matches!(
            orchestrator.execute_payout_request("", None).await,
            Err(BridgeError::Validation(ValidationError::MissingPayoutId))
        ));
    }

    #[tokio::test]
    async fn test_wallet_passthroughs() {
        let orchestrator = orchestrator(ScriptedGateway::default(), 1);
        let wallet = orchestrator
            .create_external_wallet("winner", Some("user-7"), None)
            .await
            .unwrap();
        let asset = orchestrator
            .add_asset_to_external_wallet(&wallet.id, "TON", "EQaddr", None, None)
            .await
            .unwrap();
        assert_eq!(asset.address.as_deref(), Some("EQaddr"));
        assert!(matches!(
            orchestrator.get_external_wallet("missing").await,
            Err(BridgeError::Gateway(GatewayError::HttpError { status: 404, .. }))
        ));
    }
}
