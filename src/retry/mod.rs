//! C5: retry with backoff, terminal/retryable classification, and a
//! per-processor circuit breaker (spec.md §4.5).

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;

pub use backoff::BackoffSchedule;
pub use circuit_breaker::{CircuitBreakerRegistry, CircuitState};
pub use classify::{classify, ErrorClass, ExternalError};

use std::future::Future;

use crate::clock::{Clock, Randomness};
use crate::error::CoreError;

/// Drive `op` through the retry/circuit-breaker policy. `op` is retried
/// while it keeps returning retryable `ExternalError`s, up to
/// `schedule.max_attempts`, sleeping the computed backoff between
/// attempts. A short-circuited processor returns `CircuitOpen` without
/// calling `op` at all.
pub async fn with_retry<F, Fut, T>(
    schedule: &BackoffSchedule,
    breaker: &CircuitBreakerRegistry,
    processor: &str,
    clock: &dyn Clock,
    randomness: &dyn Randomness,
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    if !breaker.allow_request(processor, clock.now()) {
        return Err(CoreError::CircuitOpen {
            processor: processor.to_string(),
        });
    }

    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                breaker.record_success(processor);
                return Ok(value);
            }
            Err(err) => {
                breaker.record_failure(processor, clock.now());
                let class = err.classify();
                let exhausted = attempt + 1 >= schedule.max_attempts;
                if !class.should_retry() || exhausted {
                    return Err(match class {
                        ErrorClass::Retryable => CoreError::TransientExternal {
                            message: err.message,
                        },
                        _ => CoreError::TerminalExternal {
                            message: err.message,
                            error_code: terminal_code(&err.code),
                        },
                    });
                }
                let delay = schedule.delay_for_attempt(attempt, randomness);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// `CoreError::TerminalExternal` wants a `&'static str`; external codes are
/// owned strings from the adapter, so map the known enumerated codes to
/// static strings and fall back to a generic one otherwise.
fn terminal_code(code: &str) -> &'static str {
    match code {
        "CARD_DECLINED" => "CARD_DECLINED",
        "EXPIRED_CARD" => "EXPIRED_CARD",
        "INVALID_AMOUNT" => "INVALID_AMOUNT",
        "FRAUD_SUSPECTED" => "FRAUD_SUSPECTED",
        "INVALID_CREDENTIALS" => "INVALID_CREDENTIALS",
        "PERMISSION_DENIED" => "PERMISSION_DENIED",
        "UNSUPPORTED_OPERATION" => "UNSUPPORTED_OPERATION",
        _ => "TERMINAL_EXTERNAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SeededRandomness};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        tokio::time::pause();
        let schedule = BackoffSchedule::default();
        let breaker = CircuitBreakerRegistry::new();
        let clock = FixedClock::new(fixed_start());
        let rng = SeededRandomness::new(1);
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let fut = with_retry(&schedule, &breaker, "proc", &clock, &rng, move || {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ExternalError {
                        code: "CONNECTION_ERROR".to_string(),
                        message: "down".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        });
        let result = fut.await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let schedule = BackoffSchedule::default();
        let breaker = CircuitBreakerRegistry::new();
        let clock = FixedClock::new(fixed_start());
        let rng = SeededRandomness::new(1);
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let result: Result<i32, CoreError> =
            with_retry(&schedule, &breaker, "proc", &clock, &rng, move || {
                let attempts = attempts2.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ExternalError {
                        code: "CARD_DECLINED".to_string(),
                        message: "declined".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(CoreError::TerminalExternal { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_without_calling_op() {
        let schedule = BackoffSchedule::default();
        let breaker = CircuitBreakerRegistry::new();
        let clock = FixedClock::new(fixed_start());
        let rng = SeededRandomness::new(1);
        for _ in 0..5 {
            breaker.record_failure("proc", clock.now());
        }
        let called = Arc::new(AtomicU32::new(0));
        let called2 = called.clone();
        let result: Result<i32, CoreError> =
            with_retry(&schedule, &breaker, "proc", &clock, &rng, move || {
                let called = called2.clone();
                async move {
                    called.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;
        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    fn fixed_start() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
