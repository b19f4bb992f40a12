//! Bounded verifyToken polling
//!
//! The gateway may not have a final answer the first time it is asked. The
//! poller repeats `verifyToken` until the answer is terminal for the phase
//! being waited on, the attempt budget is spent, the overall deadline passes,
//! or the caller cancels. Whichever comes first wins.

use crate::config::PollerConfig;
use crate::gateway::{GatewayError, GatewayResult, GatewaySessionClient, MerchantCredential, ResultCode, SessionToken};
use crate::logging::mask_token;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

/// Attempt and time bounds for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
    /// Wall-clock budget for the whole poll.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(cfg: &PollerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff: Duration::from_millis(cfg.backoff_ms),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

/// What the poll is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPhase {
    /// After `createToken`: wait until the hosted page reports `900`.
    SessionReady,
    /// On callback: wait until the gateway stops reporting a pending code.
    Settlement,
}

impl VerifyPhase {
    pub fn is_terminal(&self, code: &ResultCode) -> bool {
        match self {
            VerifyPhase::SessionReady => code.is_page_ready(),
            VerifyPhase::Settlement => !code.is_pending_settlement(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            VerifyPhase::SessionReady => "session_ready",
            VerifyPhase::Settlement => "settlement",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PollError {
    #[error("verification timed out after {attempts} attempts ({elapsed_ms} ms), last code {last_code:?}")]
    Timeout {
        attempts: u32,
        elapsed_ms: u128,
        last_code: Option<String>,
    },

    #[error("verification cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error(transparent)]
    Gateway(GatewayError),
}

/// Resolves once the flag turns `true`. A dropped sender never cancels.
async fn wait_for_cancel(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Clone)]
pub struct VerificationPoller {
    client: GatewaySessionClient,
    policy: PollPolicy,
}

impl VerificationPoller {
    pub fn new(client: GatewaySessionClient, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    #[instrument(
        skip(self, credential, token, cancel),
        fields(session_token = %mask_token(token.as_str()), phase = phase.as_str())
    )]
    pub async fn poll(
        &self,
        credential: &MerchantCredential,
        token: &SessionToken,
        phase: VerifyPhase,
        cancel: watch::Receiver<bool>,
    ) -> Result<GatewayResult, PollError> {
        let started = Instant::now();
        let deadline = sleep(self.policy.timeout);
        tokio::pin!(deadline);
        let cancelled = wait_for_cancel(cancel);
        tokio::pin!(cancelled);

        let mut attempts: u32 = 0;
        let mut last_code: Option<String> = None;

        let timed_out = |attempts: u32, last_code: Option<String>| PollError::Timeout {
            attempts,
            elapsed_ms: started.elapsed().as_millis(),
            last_code,
        };

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut cancelled => return Err(PollError::Cancelled { attempts }),
                _ = &mut deadline => return Err(timed_out(attempts, last_code)),
                result = self.client.verify_session(credential, token) => result,
            };
            attempts += 1;

            match outcome {
                Ok(result) if phase.is_terminal(&result.result_code) => {
                    debug!(attempts, result_code = %result.result_code, "Verification reached terminal code");
                    return Ok(result);
                }
                Ok(result) => {
                    debug!(attempts, result_code = %result.result_code, "Verification still pending");
                    last_code = Some(result.result_code.as_str().to_string());
                }
                Err(e) if e.is_transient() => {
                    warn!(attempts, error = %e, "Transient gateway error during verification, retrying");
                }
                Err(e) => return Err(PollError::Gateway(e)),
            }

            if attempts >= self.policy.max_attempts {
                warn!(attempts, last_code = ?last_code, "Verification attempts exhausted");
                return Err(timed_out(attempts, last_code));
            }

            tokio::select! {
                biased;
                _ = &mut cancelled => return Err(PollError::Cancelled { attempts }),
                _ = &mut deadline => return Err(timed_out(attempts, last_code)),
                _ = sleep(self.policy.backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_terminality() {
        let ready = ResultCode::new("900");
        let paid = ResultCode::new("000");
        let pending_bank = ResultCode::new("003");
        let declined = ResultCode::new("904");

        assert!(VerifyPhase::SessionReady.is_terminal(&ready));
        assert!(!VerifyPhase::SessionReady.is_terminal(&paid));

        assert!(!VerifyPhase::Settlement.is_terminal(&ready));
        assert!(!VerifyPhase::Settlement.is_terminal(&pending_bank));
        assert!(VerifyPhase::Settlement.is_terminal(&paid));
        assert!(VerifyPhase::Settlement.is_terminal(&declined));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = PollPolicy::from_config(&PollerConfig {
            max_attempts: 0,
            backoff_ms: 250,
            timeout_secs: 4,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, Duration::from_millis(250));
        assert_eq!(policy.timeout, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_never_cancels() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_secs(60), wait_for_cancel(rx)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves() {
        let (_tx, rx) = watch::channel(true);
        wait_for_cancel(rx).await;
    }
}
