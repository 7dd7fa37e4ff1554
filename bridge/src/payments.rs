//! Payment gateway data model: accounts, external wallets, payouts, transactions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of account taking part in a payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    #[default]
    VaultAccount,
    ExternalWallet,
    InternalWallet,
    #[serde(other)]
    Other,
}

/// Minimal payer or payee reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(rename = "type", default)]
    pub account_type: AccountType,
}

impl Account {
    pub fn vault(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_type: AccountType::VaultAccount,
        }
    }

    pub fn external_wallet(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_type: AccountType::ExternalWallet,
        }
    }
}

/// Decimal amount of one asset, carried as a string on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAmount {
    pub amount: String,
    pub asset_id: String,
}

impl TransactionAmount {
    pub fn new(amount: impl Into<String>, asset_id: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            asset_id: asset_id.into(),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.amount
            .trim()
            .parse::<f64>()
            .map(|v| v.is_finite() && v > 0.0)
            .unwrap_or(false)
    }
}

/// One payee/amount leg of a payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub payee_account: Account,
    pub amount: TransactionAmount,
}

impl InstructionSet {
    pub fn new(payee_account: Account, amount: TransactionAmount) -> Self {
        Self {
            id: None,
            payee_account,
            amount,
        }
    }
}

/// Chain-level transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Submitted,
    Queued,
    PendingAuthorization,
    PendingSignature,
    Broadcasting,
    Confirming,
    Completed,
    Cancelled,
    Rejected,
    Blocked,
    Failed,
    Timeout,
    #[serde(other)]
    Unknown,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed
                | TransactionState::Cancelled
                | TransactionState::Rejected
                | TransactionState::Blocked
                | TransactionState::Failed
                | TransactionState::Timeout
        )
    }
}

/// Append-only chain transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub state: TransactionState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_id: Option<String>,
}

/// An instruction as reported back by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionSetResponse {
    pub id: String,
    pub payee_account: Account,
    pub amount: TransactionAmount,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl InstructionSetResponse {
    pub fn has_terminal_transaction(&self) -> bool {
        self.transactions.iter().any(|t| t.state.is_terminal())
    }
}

/// Payout workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutState {
    Created,
    Executing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl PayoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutState::Completed | PayoutState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutState::Created => "CREATED",
            PayoutState::Executing => "EXECUTING",
            PayoutState::Completed => "COMPLETED",
            PayoutState::Failed => "FAILED",
            PayoutState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate payout record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutTransactionResponse {
    pub payout_id: String,
    pub payment_account: Account,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub state: PayoutState,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_of_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_method: Option<String>,
    #[serde(default)]
    pub instruction_set: Vec<InstructionSetResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

impl PayoutTransactionResponse {
    /// A failed payout record that never reached (or was lost by) the gateway
    pub fn failed(
        payout_id: impl Into<String>,
        payer: Account,
        instructions: &[InstructionSet],
        reason: impl Into<String>,
    ) -> Self {
        let instruction_set = instructions
            .iter()
            .enumerate()
            .map(|(i, ins)| InstructionSetResponse {
                id: ins.id.clone().unwrap_or_else(|| i.to_string()),
                payee_account: ins.payee_account.clone(),
                amount: ins.amount.clone(),
                state: PayoutState::Failed.as_str().to_string(),
                transactions: Vec::new(),
            })
            .collect();

        Self {
            payout_id: payout_id.into(),
            payment_account: payer,
            created_at: Utc::now(),
            state: PayoutState::Failed,
            status: PayoutState::Failed.as_str().to_string(),
            reason_of_failure: Some(reason.into()),
            init_method: None,
            instruction_set,
            report_url: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Ids of instructions without any transaction in a terminal state
    pub fn unsettled_instructions(&self) -> Vec<&str> {
        self.instruction_set
            .iter()
            .filter(|i| !i.has_terminal_transaction())
            .map(|i| i.id.as_str())
            .collect()
    }

    /// Make a terminal record self-explanatory.
    ///
    /// Every instruction of a terminal payout must have a terminal
    /// transaction unless a failure reason is set. A record that breaks
    /// this is downgraded to `Failed` with the offending instructions named.
    pub fn settle_terminal(mut self) -> Self {
        if !self.is_terminal() || self.reason_of_failure.is_some() {
            return self;
        }

        let unsettled = self.unsettled_instructions();
        if !unsettled.is_empty() {
            let reason = format!(
                "instructions without terminal transaction: {}",
                unsettled.join(", ")
            );
            self.state = PayoutState::Failed;
            self.reason_of_failure = Some(reason);
        } else if self.state == PayoutState::Failed {
            let reason = if self.status.is_empty() {
                "payout failed".to_string()
            } else {
                self.status.clone()
            };
            self.reason_of_failure = Some(reason);
        }
        self
    }
}

/// Body of a payout initiation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub payment_account: Account,
    pub instruction_set: Vec<InstructionSet>,
}

/// Response of a payout execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePayoutResponse {
    pub payout_id: String,
}

/// Asset held by an external wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAsset {
    pub id: String,
    #[serde(default)]
    pub balance: String,
    #[serde(default)]
    pub locked_amount: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_time: Option<String>,
}

/// Wallet outside the custodian, used as a payout destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalWallet {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref_id: Option<String>,
    #[serde(default)]
    pub assets: Vec<WalletAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExternalWalletRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddAssetRequest {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Opaque token that makes a repeated request a no-op on the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keys for one logical payout, reused across every retry of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutAttempt {
    pub initiate_key: IdempotencyKey,
    pub execute_key: IdempotencyKey,
}

impl PayoutAttempt {
    pub fn new() -> Self {
        Self {
            initiate_key: IdempotencyKey::generate(),
            execute_key: IdempotencyKey::generate(),
        }
    }
}

impl Default for PayoutAttempt {
    fn default() -> Self {
        Self::new()
    }
}
