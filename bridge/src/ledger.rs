//! Draw period claims
//!
//! Before asking the contract to draw, the service claims the current draw
//! period here. A period can be claimed once; a claim is either confirmed once
//! the draw is observed on chain, or released when the chain shows the draw
//! never happened.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::types::Draw;

const SECS_PER_DAY: i64 = 86_400;

/// Index of a draw period: `floor(unix_days / days_per_draw)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(pub u64);

impl PeriodKey {
    pub fn from_time(at: DateTime<Utc>, days_per_draw: u32) -> Self {
        let days = at.timestamp().div_euclid(SECS_PER_DAY).max(0) as u64;
        Self(days / days_per_draw.max(1) as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Draw requested, not yet observed
    Claimed,
    /// Draw observed on chain
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub period: PeriodKey,
    pub status: ClaimStatus,
    pub claimed_at: DateTime<Utc>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draw: Option<Vec<u32>>,
}

/// At-most-once guard for draw initiation
pub trait DrawLedger: Send + Sync {
    /// Claim `period`; `false` if it is already claimed or confirmed
    fn try_claim(&self, period: PeriodKey)
        -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Mark `period` as drawn, claimed or not
    fn confirm(
        &self,
        period: PeriodKey,
        draw: &Draw,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Drop an unconfirmed claim; confirmed periods stay
    fn release(&self, period: PeriodKey) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn record(
        &self,
        period: PeriodKey,
    ) -> impl Future<Output = Result<Option<ClaimRecord>, LedgerError>> + Send;
}

impl<T: DrawLedger> DrawLedger for Arc<T> {
    fn try_claim(&self, period: PeriodKey) -> impl Future<Output = Result<bool, LedgerError>> + Send {
        (**self).try_claim(period)
    }

    fn confirm(
        &self,
        period: PeriodKey,
        draw: &Draw,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send {
        (**self).confirm(period, draw)
    }

    fn release(&self, period: PeriodKey) -> impl Future<Output = Result<(), LedgerError>> + Send {
        (**self).release(period)
    }

    fn record(
        &self,
        period: PeriodKey,
    ) -> impl Future<Output = Result<Option<ClaimRecord>, LedgerError>> + Send {
        (**self).record(period)
    }
}

/// Claim bookkeeping shared by the ledger implementations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClaimBook {
    claims: BTreeMap<PeriodKey, ClaimRecord>,
}

impl ClaimBook {
    fn try_claim(&mut self, period: PeriodKey) -> bool {
        if self.claims.contains_key(&period) {
            return false;
        }
        self.claims.insert(
            period,
            ClaimRecord {
                period,
                status: ClaimStatus::Claimed,
                claimed_at: Utc::now(),
                confirmed_at: None,
                draw: None,
            },
        );
        true
    }

    /// Returns whether anything changed
    fn confirm(&mut self, period: PeriodKey, draw: &Draw) -> bool {
        let now = Utc::now();
        let record = self.claims.entry(period).or_insert_with(|| ClaimRecord {
            period,
            status: ClaimStatus::Claimed,
            claimed_at: now,
            confirmed_at: None,
            draw: None,
        });
        if record.status == ClaimStatus::Confirmed {
            return false;
        }
        record.status = ClaimStatus::Confirmed;
        record.confirmed_at = Some(now);
        record.draw = Some(draw.numbers.clone());
        true
    }

    fn release(&mut self, period: PeriodKey) -> bool {
        match self.claims.get(&period) {
            Some(record) if record.status == ClaimStatus::Claimed => {
                self.claims.remove(&period);
                true
            }
            _ => false,
        }
    }
}

/// Process-local ledger; claims are lost on restart
#[derive(Debug, Default)]
pub struct InMemoryDrawLedger {
    book: Mutex<ClaimBook>,
}

impl InMemoryDrawLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawLedger for InMemoryDrawLedger {
    async fn try_claim(&self, period: PeriodKey) -> Result<bool, LedgerError> {
        Ok(self.book.lock().await.try_claim(period))
    }

    async fn confirm(&self, period: PeriodKey, draw: &Draw) -> Result<(), LedgerError> {
        self.book.lock().await.confirm(period, draw);
        Ok(())
    }

    async fn release(&self, period: PeriodKey) -> Result<(), LedgerError> {
        self.book.lock().await.release(period);
        Ok(())
    }

    async fn record(&self, period: PeriodKey) -> Result<Option<ClaimRecord>, LedgerError> {
        Ok(self.book.lock().await.claims.get(&period).cloned())
    }
}

/// Ledger persisted as a JSON file, rewritten atomically on every change
#[derive(Debug)]
pub struct FileDrawLedger {
    path: PathBuf,
    book: Mutex<ClaimBook>,
}

impl FileDrawLedger {
    /// Open the ledger at `path`, starting empty if the file does not exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let book = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| LedgerError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClaimBook::default(),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        info!(
            path = %path.display(),
            periods = book.claims.len(),
            "Draw ledger opened"
        );
        Ok(Self {
            path,
            book: Mutex::new(book),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, book: &ClaimBook) -> Result<(), LedgerError> {
        let io = |source| LedgerError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(book).map_err(|e| LedgerError::Corrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io)?;
        debug!(path = %self.path.display(), "Draw ledger persisted");
        Ok(())
    }
}

impl DrawLedger for FileDrawLedger {
    async fn try_claim(&self, period: PeriodKey) -> Result<bool, LedgerError> {
        let mut book = self.book.lock().await;
        if !book.try_claim(period) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&book).await {
            book.claims.remove(&period);
            return Err(e);
        }
        Ok(true)
    }

    async fn confirm(&self, period: PeriodKey, draw: &Draw) -> Result<(), LedgerError> {
        let mut book = self.book.lock().await;
        if book.confirm(period, draw) {
            self.persist(&book).await?;
        }
        Ok(())
    }

    async fn release(&self, period: PeriodKey) -> Result<(), LedgerError> {
        let mut book = self.book.lock().await;
        if book.release(period) {
            self.persist(&book).await?;
        }
        Ok(())
    }

    async fn record(&self, period: PeriodKey) -> Result<Option<ClaimRecord>, LedgerError> {
        Ok(self.book.lock().await.claims.get(&period).cloned())
    }
}
