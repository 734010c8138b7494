//! Deadline-bounded retry for record mutations
//!
//! Every mutation either completes before the configured deadline or the
//! process is terminated through the [`FatalHandler`]. There is no silent drop
//! and no indefinite hang: a single attempt that stalls is cut off at the
//! deadline as well.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::FatalHandler;

/// Retries one idempotent store operation until it succeeds or the deadline
/// passes
#[derive(Clone)]
pub struct Mutator {
    /// Time allowed from the first attempt until success
    timeout: Duration,

    /// Fixed delay between attempts
    retry_delay: Duration,

    fatal: Arc<dyn FatalHandler>,
}

impl Mutator {
    pub fn new(timeout: Duration, retry_delay: Duration, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            timeout,
            retry_delay,
            fatal,
        }
    }

    /// Run `operation` until it returns `Ok(())`
    ///
    /// `what` names the mutation in log lines. Returns only on success; when
    /// the deadline passes the fatal handler is invoked and this never returns.
    pub async fn mutate_or_die<F, Fut>(&self, what: &str, mut operation: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempt: u32 = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.fatal.fatal(&format!(
                    "failed to {} after retrying for {:?} ({} attempts)",
                    what, self.timeout, attempt
                ));
            }

            attempt += 1;
            match timeout(deadline - now, operation()).await {
                Ok(Ok(())) => {
                    if attempt > 1 {
                        debug!(attempt, "{} succeeded after retry", what);
                    }
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        attempt,
                        error = %e,
                        "Failed to {}. Will retry in {:?}",
                        what,
                        self.retry_delay
                    );
                    sleep(self.retry_delay).await;
                }
                // Stalled past the deadline; the check above terminates.
                Err(_) => {}
            }
        }
    }
}

impl std::fmt::Debug for Mutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutator")
            .field("timeout", &self.timeout)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
