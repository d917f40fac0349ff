//! Circuit breaker implementation.
//!
//! # States
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls fail fast until the recovery timeout elapses
//! - Half-Open: a single probe call at a time tests whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout (lazy, no timer)
//! Half-Open → Closed: consecutive_successes >= success_threshold
//! Half-Open → Open: any probe failure (opened_at reset)
//! ```
//!
//! All state lives behind one mutex and every transition happens while it is
//! held, so concurrent callers can neither double count nor admit two probes.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::retry::duration_secs;
use crate::errors::{LangbaseError, LangbaseResult};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
    /// Consecutive probe successes needed to close from half-open.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets the success threshold.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Checks the configuration invariants.
    pub fn validate(&self) -> LangbaseResult<()> {
        if self.failure_threshold == 0 {
            return Err(LangbaseError::configuration(
                "failure_threshold must be at least 1",
            ));
        }
        if self.success_threshold == 0 {
            return Err(LangbaseError::configuration(
                "success_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is testing recovery, one probe at a time.
    HalfOpen,
}

/// Point-in-time view of a breaker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted while closed (or by failed probes).
    pub consecutive_failures: u32,
    /// Consecutive probe successes while half-open.
    pub consecutive_successes: u32,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// Whether a probe is currently admitted.
    pub probe_in_flight: bool,
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit '{name}' is open")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call.
    pub name: String,
    /// Time until the breaker will admit a probe, when known.
    pub retry_in: Option<Duration>,
}

/// Hook for circuit breaker state changes.
pub trait CircuitBreakerHook: Send + Sync {
    /// Called after the breaker named `name` moved from `old` to `new`.
    fn on_state_change(&self, name: &str, old: CircuitState, new: CircuitState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Pass,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Success,
    Failure,
    Release,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    // Bumped on every transition; outcomes from older permits are ignored.
    generation: u64,
}

impl BreakerInner {
    fn transition(&mut self, new_state: CircuitState, now: Instant) -> (CircuitState, CircuitState) {
        let old_state = self.state;
        self.state = new_state;
        self.generation += 1;
        self.probe_in_flight = false;
        self.consecutive_successes = 0;

        match new_state {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
            }
            CircuitState::HalfOpen => {}
        }

        (old_state, new_state)
    }
}

/// Circuit breaker guarding one logical target.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Creates a circuit breaker with a name used in errors and logs.
    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            }),
            hook: None,
        }
    }

    /// Adds a hook for state changes.
    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Returns the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state.
    ///
    /// An open circuit whose recovery timeout has elapsed still reports
    /// `Open` until the next call attempt moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at,
            probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Asks to make a call.
    ///
    /// On success the returned permit must be settled with the call outcome;
    /// dropping it unsettled releases it without counting anything.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let now = Instant::now();
        let mut transition = None;

        let result = {
            let mut inner = self.inner.lock();
            let admitted = match inner.state {
                CircuitState::Closed => Ok(PermitKind::Pass),
                CircuitState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(opened_at);
                    if elapsed >= self.config.recovery_timeout {
                        transition = Some(inner.transition(CircuitState::HalfOpen, now));
                        inner.probe_in_flight = true;
                        Ok(PermitKind::Probe)
                    } else {
                        Err(Some(self.config.recovery_timeout - elapsed))
                    }
                }
                CircuitState::HalfOpen if inner.probe_in_flight => Err(None),
                CircuitState::HalfOpen => {
                    inner.probe_in_flight = true;
                    Ok(PermitKind::Probe)
                }
            };

            match admitted {
                Ok(kind) => Ok(CallPermit {
                    breaker: self,
                    kind,
                    generation: inner.generation,
                    settled: false,
                }),
                Err(retry_in) => Err(CircuitOpenError {
                    name: self.name.clone(),
                    retry_in,
                }),
            }
        };

        if let Some((old, new)) = transition {
            self.notify_state_change(old, new);
        }
        if result.is_err() {
            tracing::debug!(breaker = %self.name, "Circuit breaker rejected call");
        }

        result
    }

    /// Returns the refusal a call would get `wait` from now, if the circuit
    /// is open and its recovery timeout will not have elapsed by then.
    ///
    /// Does not change any state.
    pub fn rejection_after(&self, wait: Duration) -> Option<CircuitOpenError> {
        let now = Instant::now();
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }

        let elapsed = now.saturating_duration_since(inner.opened_at.unwrap_or(now));
        let retry_in = self.config.recovery_timeout.checked_sub(elapsed)?;
        if retry_in.is_zero() || wait >= retry_in {
            return None;
        }
        Some(CircuitOpenError {
            name: self.name.clone(),
            retry_in: Some(retry_in),
        })
    }

    /// Forces the breaker back to closed and clears all counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Closed {
                inner.consecutive_failures = 0;
                None
            } else {
                Some(inner.transition(CircuitState::Closed, Instant::now()))
            }
        };

        if let Some((old, new)) = transition {
            self.notify_state_change(old, new);
        }
    }

    fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Closed && inner.consecutive_failures == 0
    }

    fn settle(&self, kind: PermitKind, generation: u64, settlement: Settlement) {
        let now = Instant::now();

        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                tracing::trace!(breaker = %self.name, ?settlement, "Ignoring stale call outcome");
                return;
            }
            if kind == PermitKind::Probe {
                inner.probe_in_flight = false;
            }

            match (settlement, inner.state) {
                (Settlement::Success, CircuitState::Closed) => {
                    inner.consecutive_failures = 0;
                    None
                }
                (Settlement::Failure, CircuitState::Closed) => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        Some(inner.transition(CircuitState::Open, now))
                    } else {
                        None
                    }
                }
                (Settlement::Success, CircuitState::HalfOpen) => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        Some(inner.transition(CircuitState::Closed, now))
                    } else {
                        None
                    }
                }
                (Settlement::Failure, CircuitState::HalfOpen) => {
                    inner.consecutive_failures += 1;
                    Some(inner.transition(CircuitState::Open, now))
                }
                (Settlement::Release, _) | (_, CircuitState::Open) => None,
            }
        };

        if let Some((old, new)) = transition {
            self.notify_state_change(old, new);
        }
    }

    fn notify_state_change(&self, old: CircuitState, new: CircuitState) {
        match new {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = ?old,
                threshold = self.config.failure_threshold,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opening"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit breaker transitioning to half-open")
            }
            CircuitState::Closed => {
                tracing::info!(breaker = %self.name, from = ?old, "Circuit breaker closing")
            }
        }

        if let Some(hook) = &self.hook {
            hook.on_state_change(&self.name, old, new);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission to make one call through a [`CircuitBreaker`].
#[must_use = "settle the permit with the call outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    generation: u64,
    settled: bool,
}

impl CallPermit<'_> {
    /// Returns true if this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.kind == PermitKind::Probe
    }

    /// Reports that the call succeeded.
    pub fn record_success(mut self) {
        self.settle(Settlement::Success);
    }

    /// Reports that the call failed in a way that counts against the target.
    pub fn record_failure(mut self) {
        self.settle(Settlement::Failure);
    }

    /// Gives the permit back without counting an outcome.
    pub fn release(mut self) {
        self.settle(Settlement::Release);
    }

    fn settle(&mut self, settlement: Settlement) {
        self.settled = true;
        self.breaker.settle(self.kind, self.generation, settlement);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Settlement::Release);
        }
    }
}

impl std::fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name)
            .field("probe", &self.is_probe())
            .finish()
    }
}

/// How breakers are shared between requests of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One breaker per endpoint, so a failing route does not block healthy ones.
    #[default]
    PerEndpoint,
    /// One breaker for every request of the client.
    PerClient,
}

const CLIENT_BREAKER_KEY: &str = "client";

/// Default number of breakers a registry keeps before evicting idle ones.
pub const DEFAULT_MAX_BREAKERS: usize = 256;

/// Lazily creates and shares one breaker per key.
///
/// The map is bounded: once it holds `max_breakers` entries, creating a new
/// breaker first evicts every idle one (closed, no failures counted, not in
/// use by a caller). Breakers carrying failure state are never evicted.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    scope: BreakerScope,
    max_breakers: usize,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl CircuitBreakerRegistry {
    /// Creates a new registry.
    pub fn new(config: CircuitBreakerConfig, scope: BreakerScope) -> Self {
        Self {
            config,
            scope,
            max_breakers: DEFAULT_MAX_BREAKERS,
            breakers: RwLock::new(HashMap::new()),
            hook: None,
        }
    }

    /// Attaches a hook to every breaker the registry creates.
    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Sets the number of breakers kept before idle ones are evicted.
    pub fn with_max_breakers(mut self, max_breakers: usize) -> Self {
        self.max_breakers = max_breakers.max(1);
        self
    }

    /// Returns the number of breakers currently held.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Returns true if no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Returns the breaker guarding `endpoint`, creating it on first use.
    pub fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        let key = self.key(endpoint);

        if let Some(breaker) = self.breakers.read().get(key) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        if !breakers.contains_key(key) && breakers.len() >= self.max_breakers {
            let before = breakers.len();
            breakers.retain(|_, breaker| Arc::strong_count(breaker) > 1 || !breaker.is_idle());
            tracing::debug!(
                evicted = before - breakers.len(),
                remaining = breakers.len(),
                "Evicted idle circuit breakers"
            );
        }
        let breaker = breakers.entry(key.to_string()).or_insert_with(|| {
            let mut breaker = CircuitBreaker::named(key, self.config.clone());
            if let Some(hook) = &self.hook {
                breaker = breaker.with_hook(Arc::clone(hook));
            }
            Arc::new(breaker)
        });
        Arc::clone(breaker)
    }

    /// Returns the state of the breaker for `endpoint`, if one exists yet.
    pub fn state_of(&self, endpoint: &str) -> Option<CircuitState> {
        self.breakers
            .read()
            .get(self.key(endpoint))
            .map(|breaker| breaker.state())
    }

    /// Returns the states of all breakers created so far.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .read()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    fn key<'a>(&self, endpoint: &'a str) -> &'a str {
        match self.scope {
            BreakerScope::PerEndpoint => endpoint,
            BreakerScope::PerClient => CLIENT_BREAKER_KEY,
        }
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("scope", &self.scope)
            .field("max_breakers", &self.max_breakers)
            .field("breakers", &self.breakers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;

    fn breaker(failure_threshold: u32, success_threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::named(
            "test",
            CircuitBreakerConfig::new()
                .failure_threshold(failure_threshold)
                .success_threshold(success_threshold)
                .recovery_timeout(recovery),
        )
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().record_failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().record_success();
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = breaker(5, 2, Duration::from_secs(60));

        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at.is_some());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(5, 2, Duration::from_secs(60));

        for _ in 0..4 {
            fail(&cb);
        }
        succeed(&cb);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_released_permit_counts_nothing() {
        let cb = breaker(2, 1, Duration::from_secs(60));
        fail(&cb);
        cb.try_acquire().unwrap().release();
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.snapshot().consecutive_failures, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_recovery_timeout() {
        let cb = breaker(1, 1, Duration::from_secs(30));
        fail(&cb);

        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.name, "test");
        assert_eq!(err.retry_in, Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(20)).await;
        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.retry_in, Some(Duration::from_secs(10)));
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_call_at_a_time() {
        let cb = breaker(1, 2, Duration::from_secs(10));
        fail(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err());
        assert!(cb.try_acquire().is_err());

        probe.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let second = cb.try_acquire().unwrap();
        assert!(second.is_probe());
        second.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.snapshot().consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_resets_window() {
        let cb = breaker(1, 1, Duration::from_secs(10));
        fail(&cb);
        let first_opened = cb.snapshot().opened_at;

        tokio::time::advance(Duration::from_secs(10)).await;
        cb.try_acquire().unwrap().record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at > first_opened);

        tokio::time::advance(Duration::from_secs(5)).await;
        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.retry_in, Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.try_acquire().unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_half_open_permit_frees_the_gate() {
        let cb = breaker(1, 1, Duration::from_secs(1));
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;

        let probe = cb.try_acquire().unwrap();
        assert!(cb.snapshot().probe_in_flight);
        drop(probe);

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert!(!snapshot.probe_in_flight);
        assert_eq!(snapshot.consecutive_successes, 0);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_stale_outcomes_are_ignored() {
        let cb = breaker(2, 1, Duration::from_secs(60));

        let a = cb.try_acquire().unwrap();
        let b = cb.try_acquire().unwrap();
        let c = cb.try_acquire().unwrap();
        let d = cb.try_acquire().unwrap();

        a.record_failure();
        b.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Admitted before the circuit opened.
        c.record_failure();
        d.record_success();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_after_accounts_for_the_wait() {
        let cb = breaker(1, 1, Duration::from_secs(60));
        assert_eq!(cb.rejection_after(Duration::ZERO), None);

        fail(&cb);
        let rejection = cb.rejection_after(Duration::from_secs(20)).unwrap();
        assert_eq!(rejection.retry_in, Some(Duration::from_secs(60)));
        assert_eq!(cb.rejection_after(Duration::from_secs(60)), None);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cb.rejection_after(Duration::from_secs(5)).is_some());
        assert_eq!(cb.rejection_after(Duration::from_secs(10)), None);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_closes_circuit() {
        let cb = breaker(1, 1, Duration::from_secs(60));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    struct CountingHook {
        opened: AtomicU32,
        half_opened: AtomicU32,
        closed: AtomicU32,
    }

    impl CircuitBreakerHook for CountingHook {
        fn on_state_change(&self, _name: &str, _old: CircuitState, new: CircuitState) {
            let counter = match new {
                CircuitState::Open => &self.opened,
                CircuitState::HalfOpen => &self.half_opened,
                CircuitState::Closed => &self.closed,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_hook_sees_every_transition() {
        let hook = Arc::new(CountingHook {
            opened: AtomicU32::new(0),
            half_opened: AtomicU32::new(0),
            closed: AtomicU32::new(0),
        });
        let cb = breaker(1, 1, Duration::ZERO).with_hook(hook.clone());

        fail(&cb);
        succeed(&cb);

        assert_eq!(hook.opened.load(Ordering::SeqCst), 1);
        assert_eq!(hook.half_opened.load(Ordering::SeqCst), 1);
        assert_eq!(hook.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_callers_admit_single_trial_call() {
        const CALLERS: usize = 16;
        let cb = breaker(1, 1, Duration::ZERO);
        fail(&cb);

        let barrier = Barrier::new(CALLERS);
        let admitted = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..CALLERS {
                scope.spawn(|| {
                    barrier.wait();
                    if let Ok(permit) = cb.try_acquire() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        // Hold the probe until every caller has tried.
                        std::thread::sleep(Duration::from_millis(50));
                        permit.release();
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_failures_are_not_double_counted() {
        let cb = breaker(1000, 1, Duration::from_secs(60));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        fail(&cb);
                    }
                });
            }
        });

        assert_eq!(cb.snapshot().consecutive_failures, 800);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_per_endpoint() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new().failure_threshold(1),
            BreakerScope::PerEndpoint,
        );

        let pipes = registry.breaker_for("GET /v1/pipes");
        let same = registry.breaker_for("GET /v1/pipes");
        assert!(Arc::ptr_eq(&pipes, &same));

        fail(&pipes);
        assert_eq!(registry.state_of("GET /v1/pipes"), Some(CircuitState::Open));

        let memory = registry.breaker_for("GET /v1/memory");
        assert_eq!(memory.state(), CircuitState::Closed);
        assert_eq!(
            registry.states(),
            vec![
                ("GET /v1/memory".to_string(), CircuitState::Closed),
                ("GET /v1/pipes".to_string(), CircuitState::Open),
            ]
        );
    }

    #[test]
    fn test_registry_evicts_only_idle_breakers() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new().failure_threshold(1),
            BreakerScope::PerEndpoint,
        )
        .with_max_breakers(2);

        fail(&registry.breaker_for("GET /v1/threads/a"));
        let held = registry.breaker_for("GET /v1/threads/b");
        drop(registry.breaker_for("GET /v1/threads/c"));
        assert_eq!(registry.len(), 3);

        // At capacity: "c" is idle and unused, "a" is open, "b" is held.
        registry.breaker_for("GET /v1/threads/d");
        assert_eq!(
            registry.states(),
            vec![
                ("GET /v1/threads/a".to_string(), CircuitState::Open),
                ("GET /v1/threads/b".to_string(), CircuitState::Closed),
                ("GET /v1/threads/d".to_string(), CircuitState::Closed),
            ]
        );
        drop(held);
    }

    #[test]
    fn test_registry_stays_bounded_under_distinct_keys() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), BreakerScope::PerEndpoint)
                .with_max_breakers(16);

        for i in 0..500 {
            succeed(&registry.breaker_for(&format!("GET /v1/threads/thread_{i}")));
        }
        assert!(registry.len() <= 16);
    }

    #[test]
    fn test_registry_per_client_shares_breaker() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), BreakerScope::PerClient);

        let a = registry.breaker_for("GET /v1/pipes");
        let b = registry.breaker_for("POST /v1/threads");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "client");
    }

    #[test]
    fn test_validate() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::new()
            .failure_threshold(0)
            .validate()
            .is_err());
        assert!(CircuitBreakerConfig::new()
            .success_threshold(0)
            .validate()
            .is_err());
    }
}
