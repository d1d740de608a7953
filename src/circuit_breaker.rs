use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Circuit breaker type guarding one model gateway.
pub type GatewayBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for model gateway calls.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive unavailability failures trigger OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, predictions pass through.
/// - **OPEN**: The model runtime keeps failing, calls fail fast as `ModelUnavailable`.
/// - **HALF_OPEN**: Testing if the runtime recovered.
///
/// Only transient errors should be reported as failures (see
/// `ScoringError::is_transient`); a lead with bad features says nothing about
/// the runtime's health.
pub fn create_gateway_circuit_breaker() -> GatewayBreaker {
    create_circuit_breaker(5, Duration::from_secs(10), Duration::from_secs(60))
}

pub fn create_circuit_breaker(
    consecutive_failures: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
) -> GatewayBreaker {
    let backoff_strategy = backoff::exponential(initial_backoff, max_backoff);

    let failure_policy =
        failure_policy::consecutive_failures(consecutive_failures, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScoringError;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_gateway_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("model down"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));

        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_gateway_circuit_breaker();

        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));

        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_non_transient_errors_do_not_open_circuit() {
        let cb = create_gateway_circuit_breaker();

        for _ in 0..10 {
            let result = cb.call_with(
                |e: &ScoringError| e.is_transient(),
                || Err::<(), ScoringError>(ScoringError::InvalidFeatures("empty".into())),
            );
            assert!(matches!(result, Err(Error::Inner(_))));
        }

        assert!(cb.is_call_permitted());
    }
}
