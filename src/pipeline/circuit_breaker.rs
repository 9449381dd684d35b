//! Consecutive-failure circuit breaker.
//!
//! Owned by the orchestration run for a single job; sharing one breaker
//! across concurrent jobs requires wrapping it in explicit mutual exclusion.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::utils::prometheus_metrics::CIRCUIT_BREAKER_OPENS_TOTAL;

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            threshold,
            cooldown,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    /// Record one entity failure; opens the breaker once the consecutive
    /// failure count reaches the threshold.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.open();
        }
    }

    /// Any success resets the consecutive failure count.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            self.consecutive_failures = 0;
        }
    }

    fn open(&mut self) {
        if self.open_until.is_none() {
            CIRCUIT_BREAKER_OPENS_TOTAL.inc();
            warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs_f64(),
                "Circuit breaker opened"
            );
        }
        self.open_until = Some(Instant::now() + self.cooldown);
    }

    /// Whether the breaker currently blocks new work. An elapsed cooldown
    /// resets the breaker as a side effect.
    pub fn is_open(&mut self) -> bool {
        match self.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                self.reset();
                false
            }
            None => false,
        }
    }

    /// Remaining cooldown when open, `None` when closed. Does not reset.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        self.open_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
        info!("Circuit breaker reset");
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
