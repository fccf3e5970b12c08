//! Post-remediation recovery verification.
//!
//! [`HealthPoller`] polls a [`HealthOracle`] until it reports healthy or a deadline
//! measured from the remediation start passes. [`UnverifiedRecovery`] is the mode used
//! when no health channel exists at all. Both sit behind [`RecoveryVerifier`] so the
//! orchestrator never branches on which one it holds.

use crate::error::{HealthError, VerifyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Health status value that ends polling.
pub const HEALTHY: &str = "healthy";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Recovered,
    NotRecovered,
    Unknown,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStatus::Recovered => "recovered",
            RecoveryStatus::NotRecovered => "not_recovered",
            RecoveryStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecoveryOutcome {
    pub status: RecoveryStatus,
    pub elapsed: Duration,
}

impl RecoveryOutcome {
    pub fn recovered(elapsed: Duration) -> Self {
        Self {
            status: RecoveryStatus::Recovered,
            elapsed,
        }
    }

    pub fn not_recovered(elapsed: Duration) -> Self {
        Self {
            status: RecoveryStatus::NotRecovered,
            elapsed,
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: RecoveryStatus::Unknown,
            elapsed: Duration::ZERO,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Monotonic time source. Poller tests substitute a virtual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

pub trait HealthOracle: Send + Sync {
    fn query(&self) -> Result<HealthReport, HealthError>;
}

impl<T: HealthOracle + ?Sized> HealthOracle for Arc<T> {
    fn query(&self) -> Result<HealthReport, HealthError> {
        (**self).query()
    }
}

/// `GET url` expecting `{"status": "..."}`.
pub struct HttpHealthOracle {
    url: String,
    http: reqwest::blocking::Client,
}

impl HttpHealthOracle {
    pub fn new(url: impl Into<String>) -> Result<Self, HealthError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

impl HealthOracle for HttpHealthOracle {
    fn query(&self) -> Result<HealthReport, HealthError> {
        let resp = self.http.get(&self.url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HealthError::Status(status.as_u16()));
        }
        let body: serde_json::Value = resp.json()?;
        body.get("status")
            .and_then(serde_json::Value::as_str)
            .map(|s| HealthReport { status: s.to_string() })
            .ok_or_else(|| HealthError::Malformed(body.to_string()))
    }
}

pub trait RecoveryVerifier: Send + Sync {
    /// Blocks the calling thread for at most `timeout` past `start`.
    fn verify(
        &self,
        incident_id: &str,
        subject: &str,
        timeout: Duration,
        start: Instant,
    ) -> Result<RecoveryOutcome, VerifyError>;
}

pub struct HealthPoller<H> {
    oracle: H,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl<H: HealthOracle> HealthPoller<H> {
    pub fn new(oracle: H, poll_interval: Duration) -> Self {
        Self::with_clock(oracle, poll_interval, Arc::new(SystemClock))
    }

    pub fn with_clock(oracle: H, poll_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            oracle,
            poll_interval,
            clock,
        }
    }
}

impl<H: HealthOracle> RecoveryVerifier for HealthPoller<H> {
    fn verify(
        &self,
        incident_id: &str,
        subject: &str,
        timeout: Duration,
        start: Instant,
    ) -> Result<RecoveryOutcome, VerifyError> {
        let elapsed = || self.clock.now().saturating_duration_since(start);
        let mut polls = 0u32;

        while elapsed() < timeout {
            polls += 1;
            match self.oracle.query() {
                Ok(report) if report.is_healthy() => {
                    let elapsed = elapsed();
                    tracing::info!(
                        incident_id,
                        subject,
                        polls,
                        elapsed_secs = elapsed.as_secs_f64(),
                        "recovery verified"
                    );
                    return Ok(RecoveryOutcome::recovered(elapsed));
                }
                Ok(report) => {
                    tracing::debug!(incident_id, polls, status = %report.status, "not healthy yet");
                }
                Err(err) => {
                    tracing::debug!(incident_id, polls, error = %err, "health poll failed");
                }
            }

            let remaining = timeout.saturating_sub(elapsed());
            if remaining.is_zero() {
                break;
            }
            self.clock.sleep(self.poll_interval.min(remaining));
        }

        tracing::warn!(
            incident_id,
            subject,
            polls,
            timeout_secs = timeout.as_secs_f64(),
            "recovery timeout"
        );
        Ok(RecoveryOutcome::not_recovered(timeout))
    }
}

/// No health channel configured: settle briefly and report a nominal recovery.
pub struct UnverifiedRecovery {
    nominal_elapsed: Duration,
    settle: Duration,
    clock: Arc<dyn Clock>,
}

impl UnverifiedRecovery {
    pub fn new(nominal_elapsed: Duration, settle: Duration) -> Self {
        Self::with_clock(nominal_elapsed, settle, Arc::new(SystemClock))
    }

    pub fn with_clock(nominal_elapsed: Duration, settle: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            nominal_elapsed,
            settle,
            clock,
        }
    }
}

impl RecoveryVerifier for UnverifiedRecovery {
    fn verify(
        &self,
        incident_id: &str,
        subject: &str,
        _timeout: Duration,
        _start: Instant,
    ) -> Result<RecoveryOutcome, VerifyError> {
        self.clock.sleep(self.settle);
        tracing::info!(
            incident_id,
            subject,
            nominal_secs = self.nominal_elapsed.as_secs_f64(),
            "no health channel; assuming recovery"
        );
        Ok(RecoveryOutcome::recovered(self.nominal_elapsed))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ManualClock, ScriptedHealth};
    use super::*;

    #[test]
    fn healthy_on_third_poll_reports_two_intervals() {
        let clock = Arc::new(ManualClock::new());
        let health = Arc::new(ScriptedHealth::new(vec![
            Ok("degraded"),
            Ok("degraded"),
            Ok("healthy"),
        ]));
        let poller = HealthPoller::with_clock(health.clone(), Duration::from_secs(3), clock.clone());

        let start = clock.now();
        let outcome = poller
            .verify("inc-1", "checkout", Duration::from_secs(30), start)
            .expect("verify");

        assert_eq!(outcome.status, RecoveryStatus::Recovered);
        assert_eq!(outcome.elapsed, Duration::from_secs(6));
        assert_eq!(health.calls(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn query_errors_are_treated_as_not_yet_healthy() {
        let clock = Arc::new(ManualClock::new());
        let health = Arc::new(ScriptedHealth::new(vec![
            Err("connection refused"),
            Err("bad json"),
            Ok("healthy"),
        ]));
        let poller = HealthPoller::with_clock(health.clone(), Duration::from_secs(1), clock.clone());

        let outcome = poller
            .verify("inc-1", "checkout", Duration::from_secs(10), clock.now())
            .expect("verify");
        assert_eq!(outcome.status, RecoveryStatus::Recovered);
        assert_eq!(health.calls(), 3);
    }

    #[test]
    fn deadline_reports_exact_timeout() {
        let clock = Arc::new(ManualClock::new());
        let health = ScriptedHealth::new(vec![Ok("degraded")]);
        let poller = HealthPoller::with_clock(health, Duration::from_secs(3), clock.clone());

        let timeout = Duration::from_secs_f64(0.1);
        let outcome = poller
            .verify("inc-1", "checkout", timeout, clock.now())
            .expect("verify");

        assert_eq!(outcome.status, RecoveryStatus::NotRecovered);
        assert_eq!(outcome.elapsed_secs(), 0.1);
        // The single sleep is clamped to the remaining budget.
        assert_eq!(clock.sleeps(), vec![timeout]);
    }

    #[test]
    fn unbounded_timeout_does_not_overflow() {
        let clock = Arc::new(ManualClock::new());
        let health = ScriptedHealth::new(vec![Ok("degraded"), Ok("healthy")]);
        let poller = HealthPoller::with_clock(health, Duration::from_secs(3), clock.clone());

        let outcome = poller
            .verify("inc-1", "checkout", Duration::MAX, clock.now())
            .expect("verify");
        assert_eq!(outcome, RecoveryOutcome::recovered(Duration::from_secs(3)));
    }

    #[test]
    fn start_in_the_past_shortens_the_budget() {
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();
        clock.sleep(Duration::from_secs(20));

        let health = Arc::new(ScriptedHealth::new(vec![Ok("degraded")]));
        let poller = HealthPoller::with_clock(health.clone(), Duration::from_secs(3), clock.clone());
        let outcome = poller
            .verify("inc-1", "checkout", Duration::from_secs(10), start)
            .expect("verify");

        assert_eq!(outcome.status, RecoveryStatus::NotRecovered);
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
        assert_eq!(health.calls(), 0);
    }

    #[test]
    fn elapsed_is_measured_from_supplied_start() {
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();
        clock.sleep(Duration::from_secs(4));

        let health = ScriptedHealth::new(vec![Ok("healthy")]);
        let poller = HealthPoller::with_clock(health, Duration::from_secs(3), clock.clone());
        let outcome = poller
            .verify("inc-1", "checkout", Duration::from_secs(30), start)
            .expect("verify");
        assert_eq!(outcome.elapsed, Duration::from_secs(4));
    }

    #[test]
    fn unverified_mode_settles_and_reports_nominal() {
        let clock = Arc::new(ManualClock::new());
        let verifier = UnverifiedRecovery::with_clock(
            Duration::from_secs(92),
            Duration::from_secs(1),
            clock.clone(),
        );
        let outcome = verifier
            .verify("inc-1", "checkout", Duration::from_secs(120), clock.now())
            .expect("verify");
        assert_eq!(outcome, RecoveryOutcome::recovered(Duration::from_secs(92)));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }
}
