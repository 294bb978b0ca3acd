// # Resilience Utilities
//
// Exponential-backoff retry and a registry of named three-state circuit
// breakers, usable from both sync and async call sites.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{retry_async, retry_sync, RetryConfig};
