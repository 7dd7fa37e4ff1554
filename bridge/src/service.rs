//! Draw service: triggers one on-chain draw per draw period

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    config::BridgeConfig,
    error::{BridgeError, BridgeResult, ErrorSeverity, Transient},
    health::HealthState,
    ledger::{ClaimStatus, DrawLedger, PeriodKey},
    ton::ContractGateway,
    types::{BridgeStats, CircuitBreaker, CompositeState, Draw, ErrorType},
};

/// What a draw cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Skipped while the circuit breaker is open
    CircuitOpen,
    /// The chain already holds a draw for this period
    AlreadyDrawn { period: PeriodKey },
    /// Another attempt holds the claim for this period
    DuplicateSkipped { period: PeriodKey },
    /// An expired, unconfirmed claim was dropped; the next cycle may draw
    StaleClaimReleased { period: PeriodKey },
    Drawn { period: PeriodKey, draw: Draw },
    /// Initiation reported an error, but the draw landed anyway
    Reconciled { period: PeriodKey, draw: Draw },
    /// Draw requested but not yet visible; the claim is kept
    Unconfirmed { period: PeriodKey },
}

/// Periodically asks the lottery contract to draw, at most once per period
pub struct DrawService<C, L> {
    gateway: C,
    ledger: L,
    check_interval: Duration,
    confirm_interval: Duration,
    confirm_attempts: u32,
    /// Age after which an unconfirmed claim can no longer land on chain
    claim_expiry: chrono::Duration,
    stats: Arc<RwLock<BridgeStats>>,
    breaker: Mutex<CircuitBreaker>,
    health_state: Option<Arc<HealthState>>,
}

fn error_type(error: &BridgeError) -> ErrorType {
    match error {
        BridgeError::ContractCall(_) => ErrorType::ContractCall,
        BridgeError::Gateway(_) => ErrorType::Gateway,
        BridgeError::Ledger(_) => ErrorType::Ledger,
        _ => ErrorType::Other,
    }
}

impl<C: ContractGateway, L: DrawLedger> DrawService<C, L> {
    pub fn new(config: &BridgeConfig, gateway: C, ledger: L) -> Self {
        let confirm_window =
            config.draw_confirm_interval_secs * config.draw_confirm_attempts as u64;
        let claim_expiry = confirm_window + config.ton.message_ttl_secs as u64;

        Self {
            gateway,
            ledger,
            check_interval: Duration::from_secs(config.draw_check_interval_secs),
            confirm_interval: Duration::from_secs(config.draw_confirm_interval_secs),
            confirm_attempts: config.draw_confirm_attempts,
            claim_expiry: chrono::Duration::seconds(claim_expiry as i64),
            stats: Arc::new(RwLock::new(BridgeStats::default())),
            breaker: Mutex::new(CircuitBreaker::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_reset_timeout_secs,
            )),
            health_state: None,
        }
    }

    /// Share stats and readiness with the health server
    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.stats = Arc::clone(&health_state.stats);
        self.health_state = Some(health_state);
        self
    }

    pub fn gateway(&self) -> &C {
        &self.gateway
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Get current statistics
    pub async fn stats(&self) -> BridgeStats {
        self.stats.read().await.clone()
    }

    /// Run the draw loop until the future is dropped
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            interval = self.check_interval.as_secs(),
            confirm_attempts = self.confirm_attempts,
            "Starting lottery draw service"
        );
        self.stats.write().await.service_started = Some(Utc::now());

        match self.fetch_state().await {
            Ok(composite) => {
                info!(
                    version = %composite.config.version,
                    owner = %composite.config.owner,
                    days_per_draw = composite.config.days_per_draw,
                    jackpot = %composite.state.jackpot_absolute_balance(),
                    "Connected to lottery contract"
                );
            }
            Err(e) if matches!(e.severity(), ErrorSeverity::Critical | ErrorSeverity::Fatal) => {
                error!(error = %e, "Lottery contract state is unreadable");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "Lottery contract unreachable at startup; will keep trying");
            }
        }

        if let Some(health) = &self.health_state {
            health.set_ready(true).await;
        }

        loop {
            match self.run_cycle().await {
                Ok(outcome) => debug!(outcome = ?outcome, "Draw cycle complete"),
                Err(e) => error!(error = %e, code = e.error_code(), "Draw cycle failed"),
            }

            tokio::time::sleep(self.check_interval).await;
        }
    }

    /// One pass: draw if the current period has no draw yet
    pub async fn run_cycle(&self) -> BridgeResult<CycleOutcome> {
        self.stats.write().await.total_cycles += 1;

        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.allow_request() {
                let mut stats = self.stats.write().await;
                stats.circuit_breaker_open_skips += 1;
                stats.circuit_breaker_state = breaker.state;
                debug!("Circuit breaker open, skipping draw cycle");
                return Ok(CycleOutcome::CircuitOpen);
            }
        }

        let result = self.draw_if_due().await;

        let mut breaker = self.breaker.lock().await;
        let mut stats = self.stats.write().await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(e) => {
                stats.record_failure(error_type(e));
                breaker.record_failure(stats.consecutive_failures);
                if breaker.is_open() {
                    warn!(
                        consecutive_failures = stats.consecutive_failures,
                        "Circuit breaker opened"
                    );
                }
            }
        }
        stats.circuit_breaker_state = breaker.state;

        result
    }

    async fn fetch_state(&self) -> BridgeResult<CompositeState> {
        let composite = self.gateway.get_state_from_contract().await?;
        self.stats.write().await.mark_chain_healthy();
        if let Some(health) = &self.health_state {
            health.mark_chain_healthy().await;
        }
        Ok(composite)
    }

    async fn draw_if_due(&self) -> BridgeResult<CycleOutcome> {
        let composite = self.fetch_state().await?;
        let days_per_draw = composite.config.days_per_draw;
        let now = Utc::now();
        let period = PeriodKey::from_time(now, days_per_draw);
        let previous = composite.state.latest_draw;

        if previous
            .drawn_at
            .is_some_and(|at| PeriodKey::from_time(at, days_per_draw) == period)
        {
            self.ledger.confirm(period, &previous).await?;
            self.stats.write().await.record_idle_cycle();
            debug!(period = %period, "Period already drawn");
            return Ok(CycleOutcome::AlreadyDrawn { period });
        }

        if let Some(record) = self.ledger.record(period).await? {
            let expired = now.signed_duration_since(record.claimed_at) > self.claim_expiry;
            if record.status == ClaimStatus::Claimed && expired {
                self.ledger.release(period).await?;
                warn!(
                    period = %period,
                    claimed_at = %record.claimed_at,
                    "Releasing expired draw claim that never showed on chain"
                );
                return Ok(CycleOutcome::StaleClaimReleased { period });
            }
            self.stats.write().await.record_duplicate_skip();
            debug!(period = %period, status = ?record.status, "Period already claimed");
            return Ok(CycleOutcome::DuplicateSkipped { period });
        }

        if !self.ledger.try_claim(period).await? {
            self.stats.write().await.record_duplicate_skip();
            debug!(period = %period, "Lost claim race for period");
            return Ok(CycleOutcome::DuplicateSkipped { period });
        }

        info!(period = %period, "Initiating draw");
        match self.gateway.initiate_draw_on_contract().await {
            Ok(()) => {
                self.stats.write().await.draws_initiated += 1;
                match self.await_new_draw(&previous).await {
                    Some(draw) => {
                        self.ledger.confirm(period, &draw).await?;
                        self.stats.write().await.record_draw_confirmed(period.value());
                        info!(period = %period, numbers = ?draw.numbers, "Draw confirmed");
                        Ok(CycleOutcome::Drawn { period, draw })
                    }
                    None => {
                        warn!(
                            period = %period,
                            attempts = self.confirm_attempts,
                            "Draw requested but not observed; keeping claim"
                        );
                        Ok(CycleOutcome::Unconfirmed { period })
                    }
                }
            }
            Err(e) => self.reconcile(period, &previous, e).await,
        }
    }

    /// Decide what a failed initiation did by reading the chain again
    async fn reconcile(
        &self,
        period: PeriodKey,
        previous: &Draw,
        error: crate::error::ContractCallError,
    ) -> BridgeResult<CycleOutcome> {
        warn!(period = %period, error = %error, "Draw initiation failed; re-reading state");

        match self.gateway.get_state_from_contract().await {
            Ok(current) if current.state.latest_draw != *previous => {
                let draw = current.state.latest_draw;
                self.ledger.confirm(period, &draw).await?;
                {
                    let mut stats = self.stats.write().await;
                    stats.draws_reconciled += 1;
                    stats.record_draw_confirmed(period.value());
                }
                info!(period = %period, numbers = ?draw.numbers, "Draw landed despite error");
                Ok(CycleOutcome::Reconciled { period, draw })
            }
            Ok(_) if !error.is_transient() => {
                // rejected outright; nothing can land
                self.ledger.release(period).await?;
                Err(error.into())
            }
            Ok(_) => {
                warn!(period = %period, "Outcome unknown; claim kept until it expires");
                Err(error.into())
            }
            Err(fetch_error) => {
                warn!(
                    period = %period,
                    error = %fetch_error,
                    "State re-read failed; claim kept until it expires"
                );
                Err(error.into())
            }
        }
    }

    async fn await_new_draw(&self, previous: &Draw) -> Option<Draw> {
        for attempt in 1..=self.confirm_attempts {
            tokio::time::sleep(self.confirm_interval).await;

            match self.fetch_state().await {
                Ok(composite) => {
                    let latest = composite.state.latest_draw;
                    if !latest.is_empty() && latest != *previous {
                        return Some(latest);
                    }
                    debug!(attempt = attempt, "New draw not visible yet");
                }
                Err(e) => warn!(attempt = attempt, error = %e, "State re-read failed"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::TonAddress;
    use crate::config::TonApiConfig;
    use crate::error::ContractCallError;
    use crate::ledger::InMemoryDrawLedger;
    use crate::types::{ContractConfig, ContractState, DiscountFactor};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Copy, PartialEq)]
    enum InitiateBehaviour {
        Draws,
        Ignored,
        /// Reports a transient error, draws anyway
        LandsDespiteError,
        Rejected,
        TransientFailure,
    }

    struct FakeContract {
        state: StdMutex<CompositeState>,
        behaviour: InitiateBehaviour,
        fail_reads: bool,
        initiations: AtomicU32,
    }

    impl FakeContract {
        fn new(behaviour: InitiateBehaviour) -> Self {
            Self {
                state: StdMutex::new(composite()),
                behaviour,
                fail_reads: false,
                initiations: AtomicU32::new(0),
            }
        }

        fn draw(&self) {
            self.state.lock().unwrap().state.latest_draw = Draw {
                numbers: vec![4, 8, 15, 16, 23, 7],
                drawn_at: Some(Utc::now()),
            };
        }

        fn initiations(&self) -> u32 {
            self.initiations.load(Ordering::SeqCst)
        }
    }

    impl ContractGateway for FakeContract {
        async fn get_state_from_contract(&self) -> Result<CompositeState, ContractCallError> {
            if self.fail_reads {
                return Err(ContractCallError::ConnectionFailed {
                    url: "fake".into(),
                    message: "down".into(),
                });
            }
            Ok(self.state.lock().unwrap().clone())
        }

        async fn set_state_on_contract(&self, state: &ContractState) -> Result<(), ContractCallError> {
            self.state.lock().unwrap().state = state.clone();
            Ok(())
        }

        async fn initiate_draw_on_contract(&self) -> Result<(), ContractCallError> {
            self.initiations.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                InitiateBehaviour::Draws => {
                    self.draw();
                    Ok(())
                }
                InitiateBehaviour::Ignored => Ok(()),
                InitiateBehaviour::LandsDespiteError => {
                    self.draw();
                    Err(ContractCallError::HttpError { status: 502, body: String::new() })
                }
                InitiateBehaviour::Rejected => Err(ContractCallError::MessageRejected(
                    "exit code 33".into(),
                )),
                InitiateBehaviour::TransientFailure => Err(ContractCallError::ConnectionFailed {
                    url: "fake".into(),
                    message: "reset".into(),
                }),
            }
        }
    }

    fn composite() -> CompositeState {
        CompositeState {
            config: ContractConfig {
                owner: TonAddress { workchain: 0, hash: [3; 32] },
                version: "2.0.0".into(),
                required_numbers_count: 5,
                max_number_range: 50,
                max_jackpot_range: 10,
                max_repeats_per_draw: 5,
                default_repeat_selection: 1,
                days_per_draw: 7,
                discount: DiscountFactor::default(),
            },
            state: ContractState {
                latest_draw: Draw {
                    numbers: vec![1, 2, 3, 4, 5, 6],
                    drawn_at: Some(Utc::now() - chrono::Duration::days(30)),
                },
                ..Default::default()
            },
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            ton: TonApiConfig {
                base_url: "http://localhost".into(),
                getter_url: "http://localhost/runGetMethod".into(),
                contract_address: String::new(),
                gas_station_mnemonic: String::new(),
                gas_station_address: String::new(),
                api_key: None,
                subwallet_id: 698_983_191,
                message_value_nanotons: 50_000_000,
                message_ttl_secs: 60,
                request_timeout_secs: 1,
                connect_timeout_secs: 1,
            },
            resilience: Default::default(),
            draw_check_interval_secs: 0,
            draw_confirm_interval_secs: 0,
            draw_confirm_attempts: 2,
            draw_ledger_path: String::new(),
            health_port: 0,
            circuit_breaker_failure_threshold: 2,
            circuit_breaker_reset_timeout_secs: 3_600,
        }
    }

    fn service(
        contract: FakeContract,
    ) -> DrawService<Arc<FakeContract>, Arc<InMemoryDrawLedger>> {
        DrawService::new(
            &config(),
            Arc::new(contract),
            Arc::new(InMemoryDrawLedger::new()),
        )
    }

    fn current_period() -> PeriodKey {
        PeriodKey::from_time(Utc::now(), 7)
    }

    #[tokio::test]
    async fn test_draws_once_per_period() {
        let service = service(FakeContract::new(InitiateBehaviour::Draws));

        let first = service.run_cycle().await.unwrap();
        assert!(matches!(first, CycleOutcome::Drawn { .. }));

        let second = service.run_cycle().await.unwrap();
        assert_eq!(second, CycleOutcome::AlreadyDrawn { period: current_period() });
        assert_eq!(service.gateway().initiations(), 1);

        let stats = service.stats().await;
        assert_eq!(stats.draws_initiated, 1);
        assert_eq!(stats.draws_confirmed, 1);
        assert_eq!(stats.last_period_key, Some(current_period().value()));
    }

    #[tokio::test]
    async fn test_claimed_period_blocks_initiation() {
        let service = service(FakeContract::new(InitiateBehaviour::Draws));
        assert!(service.ledger().try_claim(current_period()).await.unwrap());

        let outcome = service.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::DuplicateSkipped { period: current_period() });
        assert_eq!(service.gateway().initiations(), 0);
        assert_eq!(service.stats().await.draws_skipped_duplicate, 1);
    }

    #[tokio::test]
    async fn test_concurrent_services_share_one_claim() {
        let contract = Arc::new(FakeContract::new(InitiateBehaviour::Ignored));
        let ledger = Arc::new(InMemoryDrawLedger::new());
        let a = DrawService::new(&config(), Arc::clone(&contract), Arc::clone(&ledger));
        let b = DrawService::new(&config(), Arc::clone(&contract), Arc::clone(&ledger));

        let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
        let outcomes = [ra.unwrap(), rb.unwrap()];

        assert_eq!(contract.initiations(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, CycleOutcome::DuplicateSkipped { .. })));
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, CycleOutcome::Unconfirmed { .. })));
    }

    #[tokio::test]
    async fn test_failed_initiation_that_landed_is_reconciled() {
        let service = service(FakeContract::new(InitiateBehaviour::LandsDespiteError));

        let outcome = service.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Reconciled { .. }));

        let record = service.ledger().record(current_period()).await.unwrap().unwrap();
        assert_eq!(record.status, ClaimStatus::Confirmed);
        assert_eq!(service.stats().await.draws_reconciled, 1);
    }

    #[tokio::test]
    async fn test_rejected_initiation_releases_claim() {
        let service = service(FakeContract::new(InitiateBehaviour::Rejected));

        assert!(service.run_cycle().await.is_err());
        assert!(service.ledger().record(current_period()).await.unwrap().is_none());

        // the period may be attempted again
        assert!(service.run_cycle().await.is_err());
        assert_eq!(service.gateway().initiations(), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_initiation_keeps_claim() {
        let service = service(FakeContract::new(InitiateBehaviour::TransientFailure));

        assert!(service.run_cycle().await.is_err());
        let outcome = service.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::DuplicateSkipped { period: current_period() });
        assert_eq!(service.gateway().initiations(), 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let mut contract = FakeContract::new(InitiateBehaviour::Draws);
        contract.fail_reads = true;
        let service = service(contract);

        assert!(service.run_cycle().await.is_err());
        assert!(service.run_cycle().await.is_err());
        assert_eq!(service.run_cycle().await.unwrap(), CycleOutcome::CircuitOpen);

        let stats = service.stats().await;
        assert_eq!(stats.contract_call_failures, 2);
        assert_eq!(stats.circuit_breaker_open_skips, 1);
        assert_eq!(stats.total_cycles, 3);
    }
}
