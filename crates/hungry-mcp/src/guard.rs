//! Breaker-guarded execution with fallback substitution.

use std::future::Future;

use hungry_core::DomainResponse;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::error::McpError;

/// Run `primary` behind `breaker`, substituting `fallback` on any failure.
///
/// - Breaker refuses: `fallback` runs, `primary` is never invoked.
/// - `primary` succeeds (`success == true`): success is recorded and the
///   response is returned unchanged.
/// - `primary` returns a failed response or an error: failure is recorded
///   and the fallback response is returned instead.
pub async fn guarded_call<P, Fut, Fb>(
    breaker: &CircuitBreaker,
    operation: &str,
    primary: P,
    fallback: Fb,
) -> DomainResponse
where
    P: FnOnce() -> Fut,
    Fut: Future<Output = Result<DomainResponse, McpError>>,
    Fb: FnOnce() -> DomainResponse,
{
    if !breaker.can_execute() {
        debug!(operation, state = %breaker.state(), "Circuit open, serving fallback");
        return fallback();
    }

    match primary().await {
        Ok(response) if response.success => {
            breaker.record_success();
            response
        }
        Ok(response) => {
            breaker.record_failure();
            warn!(
                operation,
                error = response.error.as_deref().unwrap_or("unknown"),
                "Operation failed, serving fallback"
            );
            fallback()
        }
        Err(e) => {
            breaker.record_failure();
            warn!(operation, error = %e, "Operation errored, serving fallback");
            fallback()
        }
    }
}
