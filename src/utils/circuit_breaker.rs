// Three-state circuit breaker with a process-wide named registry.
//
// Closed: calls pass, consecutive failures count up. Open: calls are
// rejected until the timeout elapses. Half-open: trial calls pass;
// consecutive successes close the circuit, any failure reopens it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the circuit stays open before allowing trial calls.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<CircuitBreaker>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Fetch or create the named breaker in the process registry.
    pub fn get_or_create(name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = REGISTRY.read().get(name) {
            return existing.clone();
        }
        let mut registry = REGISTRY.write();
        registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(name: &str) -> Option<Arc<CircuitBreaker>> {
        REGISTRY.read().get(name).cloned()
    }

    /// Snapshot of every registered breaker's state.
    pub fn all_states() -> HashMap<String, CircuitState> {
        REGISTRY
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    pub fn reset_all() {
        for breaker in REGISTRY.read().values() {
            breaker.reset();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance_state(&mut inner);
        inner.state
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
    }

    fn advance_state(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let expired = inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.open_timeout)
                .unwrap_or(true);
            if expired {
                tracing::info!(breaker = %self.name, "circuit half-open");
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
            }
        }
    }

    /// Admission check; callers then report the outcome.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.advance_state(&mut inner);
        match inner.state {
            CircuitState::Open => Err(AppError::CircuitOpen(self.name.clone())),
            _ => Ok(()),
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "trial call failed, circuit open");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "failure threshold reached, circuit open"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run an async operation through the breaker. A non-retryable error
    /// does not count as a breaker failure.
    pub async fn call_async<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.on_failure();
                }
                Err(err)
            }
        }
    }

    /// Blocking variant for synchronous call sites.
    pub fn call_sync<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.acquire()?;
        match operation() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.on_failure();
                }
                Err(err)
            }
        }
    }
}
