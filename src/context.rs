//! Per-request context: correlation id and deadline.
//!
//! Every operation carries a deadline. Outbound I/O budgets are derived from
//! the request deadline minus a fixed guard so the handler always has time
//! left to produce a well-formed error response.

use std::time::Duration;
use std::time::Instant;

use uuid::Uuid;

use crate::error::RegistryError;
use crate::error::Result;

/// Time reserved at the end of a request for response assembly.
pub const DEADLINE_GUARD: Duration = Duration::from_millis(250);

/// Correlation id plus deadline for one request or sync run.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id echoed in error responses and logs.
    pub request_id: Uuid,
    deadline: Instant,
}

impl RequestContext {
    /// Context with a fresh id and the given total budget.
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline: Instant::now() + budget,
        }
    }

    /// Fail fast if the deadline has already passed.
    pub fn check(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(RegistryError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Remaining budget for outbound I/O, with the guard subtracted.
    pub fn io_budget(&self) -> Result<Duration> {
        let remaining = self
            .deadline
            .saturating_duration_since(Instant::now())
            .checked_sub(DEADLINE_GUARD)
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Err(RegistryError::DeadlineExceeded);
        }
        Ok(remaining)
    }

    /// Run `fut` within the remaining I/O budget.
    ///
    /// Maps timer expiry to `DeadlineExceeded`; the inner result is passed
    /// through untouched.
    pub async fn bounded<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let budget = self.io_budget()?;
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes_check() {
        let ctx = RequestContext::with_budget(Duration::from_secs(5));
        assert!(ctx.check().is_ok());
        assert!(ctx.io_budget().unwrap() > Duration::from_secs(4));
    }

    #[test]
    fn test_exhausted_context_fails() {
        let ctx = RequestContext::with_budget(Duration::ZERO);
        assert!(matches!(ctx.check(), Err(RegistryError::DeadlineExceeded)));
        assert!(matches!(
            ctx.io_budget(),
            Err(RegistryError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let ctx = RequestContext::with_budget(Duration::from_millis(300));
        let result: Result<()> = ctx
            .bounded(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(RegistryError::DeadlineExceeded)));
    }
}
