//! Error types for the lottery bridge
//!
//! Every failure the core can surface falls into one of a small taxonomy:
//! bad caller input, malformed chain data, failed contract calls, failed
//! payment gateway calls, and exhausted polling budgets.

use thiserror::Error;

/// Main error type for the lottery bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Caller input rejected before any gateway call
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed stack item, cell or address
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Contract getter or message submission failed
    #[error("Contract call error: {0}")]
    ContractCall(#[from] ContractCallError),

    /// Payment or wallet gateway failure
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Polling budget exhausted
    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// Draw ledger could not be read or written
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),
}

/// Caller input errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Instruction set is empty")]
    EmptyInstructionSet,

    #[error("Instruction {index} has no payee account")]
    MissingPayee { index: usize },

    #[error("Instruction {index} has a non-positive amount: {amount}")]
    NonPositiveAmount { index: usize, amount: String },

    #[error("Payer account id is empty")]
    MissingPayer,

    #[error("Payout id is empty")]
    MissingPayoutId,

    #[error("Invalid contract state: {0}")]
    InvalidState(String),
}

/// Stack, cell and address decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Stack exhausted: expected another item")]
    StackExhausted,

    #[error("Unexpected stack item type: expected {expected}, got {actual}")]
    UnexpectedType { expected: &'static str, actual: String },

    #[error("Invalid hex integer: {0:?}")]
    InvalidHex(String),

    #[error("Integer {value} does not fit in {bits} bits")]
    Overflow { value: String, bits: u32 },

    #[error("Field {field} must not be negative, got {value}")]
    NegativeValue { field: &'static str, value: i64 },

    #[error("{0} stack items left unread")]
    TrailingItems(usize),

    #[error("Invalid bag of cells: {0}")]
    InvalidBoc(String),

    #[error("Cell underflow: needed {needed} bits, {available} available")]
    CellUnderflow { needed: usize, available: usize },

    #[error("Cell has no more references")]
    RefUnderflow,

    #[error("Cell overflow: {0}")]
    CellOverflow(String),

    #[error("Invalid string payload: {0}")]
    InvalidString(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Contract call errors
#[derive(Error, Debug)]
pub enum ContractCallError {
    #[error("Failed to reach TON API at {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("TON API returned error status {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("Unreadable TON API response: {0}")]
    InvalidResponse(String),

    #[error("Getter {method} failed with exit code {exit_code}")]
    NonZeroExitCode { method: String, exit_code: i32 },

    #[error("Failed to decode getter {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: EncodingError,
    },

    #[error("Contract returned inconsistent state: {0}")]
    InvalidState(String),

    #[error("Message rejected by TON API: {0}")]
    MessageRejected(String),

    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] EncodingError),
}

/// Payment and wallet gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to reach payment gateway at {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Payment gateway returned error status {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("Failed to parse payment gateway response: {0}")]
    ParseError(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),

    #[error("Invalid payment gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Payment gateway request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("History page of {page_limit} transactions all share timestamp {timestamp_ms}ms")]
    PageSaturated { timestamp_ms: i64, page_limit: usize },
}

/// Draw ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger file {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },
}

/// Polling budget exhausted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Payout {payout_id} not terminal after {attempts} polls (last state: {last_state})")]
pub struct TimeoutError {
    pub payout_id: String,
    pub attempts: u32,
    pub last_state: String,
}

/// Error severity levels for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient errors that may resolve on retry
    Transient,
    /// Errors requiring attention but not critical
    Warning,
    /// Critical errors requiring immediate attention
    Critical,
    /// Fatal errors that prevent operation
    Fatal,
}

impl BridgeError {
    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BridgeError::Config(_) => ErrorSeverity::Fatal,
            BridgeError::Validation(_) => ErrorSeverity::Warning,
            BridgeError::Encoding(_) => ErrorSeverity::Critical,
            BridgeError::ContractCall(e) => e.severity(),
            BridgeError::Gateway(e) => e.severity(),
            BridgeError::Timeout(_) => ErrorSeverity::Transient,
            BridgeError::Ledger(LedgerError::Io { .. }) => ErrorSeverity::Critical,
            BridgeError::Ledger(LedgerError::Corrupt { .. }) => ErrorSeverity::Fatal,
            BridgeError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Transient)
    }

    /// Get a short error code for metrics/logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Validation(_) => "VALIDATION_ERROR",
            BridgeError::Encoding(_) => "ENCODING_ERROR",
            BridgeError::ContractCall(_) => "CONTRACT_CALL_ERROR",
            BridgeError::Gateway(_) => "GATEWAY_ERROR",
            BridgeError::Timeout(_) => "TIMEOUT_ERROR",
            BridgeError::Ledger(_) => "LEDGER_ERROR",
            BridgeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl ContractCallError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ContractCallError::ConnectionFailed { .. } => ErrorSeverity::Transient,
            ContractCallError::HttpError { status, .. } => http_severity(*status),
            ContractCallError::InvalidResponse(_) => ErrorSeverity::Warning,
            ContractCallError::NonZeroExitCode { .. } => ErrorSeverity::Warning,
            ContractCallError::Decode { .. } => ErrorSeverity::Critical,
            ContractCallError::InvalidState(_) => ErrorSeverity::Critical,
            ContractCallError::MessageRejected(_) => ErrorSeverity::Warning,
            ContractCallError::MessageBuild(_) => ErrorSeverity::Critical,
        }
    }
}

impl GatewayError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::ConnectionFailed { .. } => ErrorSeverity::Transient,
            GatewayError::HttpError { status, .. } => http_severity(*status),
            GatewayError::ParseError(_) => ErrorSeverity::Warning,
            GatewayError::Signing(_) => ErrorSeverity::Fatal,
            GatewayError::InvalidUrl(_) => ErrorSeverity::Fatal,
            GatewayError::Timeout { .. } => ErrorSeverity::Transient,
            GatewayError::PageSaturated { .. } => ErrorSeverity::Critical,
        }
    }
}

fn http_severity(status: u16) -> ErrorSeverity {
    if status >= 500 || status == 429 {
        ErrorSeverity::Transient
    } else {
        ErrorSeverity::Warning
    }
}

/// Errors the resilience policy may retry at the HTTP layer
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ContractCallError {
    fn is_transient(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Transient)
    }
}

impl Transient for GatewayError {
    fn is_transient(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Transient)
    }
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
