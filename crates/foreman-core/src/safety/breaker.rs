//! Per-run circuit breaker.
//!
//! `Closed` until `risk_event_threshold` risk events have been observed, then
//! `Open`: every action above low risk is blocked. After `cool_down_ms` it
//! becomes `HalfOpen` and admits a single probe; a successful probe closes
//! the breaker, a failed one re-opens it.
//!
//! A risk event is a harmful tool result, or `consecutive_failure_limit`
//! permanent failures in a row from the same tool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::domain::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub risk_event_threshold: u32,
    pub consecutive_failure_limit: u32,
    pub cool_down_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            risk_event_threshold: 1,
            consecutive_failure_limit: 3,
            cool_down_ms: 30_000,
        }
    }
}

/// Whether the breaker lets an action through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Allowed as the single half-open probe. Its result must be recorded
    /// with `probe = true`, or the probe released.
    Probe,
    Blocked,
}

/// What happened when a tool ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerSignal {
    Success,
    Transient,
    Permanent,
    Harmful,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    risk_events: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    consecutive_permanent: HashMap<String, u32>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                risk_events: 0,
                opened_at: None,
                probe_in_flight: false,
                consecutive_permanent: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.cool_down(&mut inner);
        inner
    }

    fn cool_down(&self, inner: &mut BreakerInner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let cool_down = Duration::from_millis(self.config.cool_down_ms);
        if inner.opened_at.is_some_and(|t| t.elapsed() >= cool_down) {
            inner.state = BreakerState::HalfOpen;
            inner.probe_in_flight = false;
        }
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn risk_events(&self) -> u32 {
        self.lock().risk_events
    }

    pub fn admit(&self, risk: RiskLevel) -> Admission {
        let mut inner = self.lock();
        if risk == RiskLevel::Low {
            return Admission::Allowed;
        }
        let state = inner.state;
        match state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => Admission::Blocked,
            BreakerState::HalfOpen if inner.probe_in_flight => Admission::Blocked,
            BreakerState::HalfOpen => {
                inner.probe_in_flight = true;
                Admission::Probe
            }
        }
    }

    /// Give back a probe slot that was admitted but never used.
    pub fn release_probe(&self) {
        self.lock().probe_in_flight = false;
    }

    /// Record a tool result. Returns the new state when it changed.
    pub fn record(&self, tool_id: &str, signal: BreakerSignal, probe: bool) -> Option<BreakerState> {
        let mut inner = self.lock();
        let before = inner.state;
        if probe {
            inner.probe_in_flight = false;
        }

        let risk_event = match signal {
            BreakerSignal::Success => {
                inner.consecutive_permanent.remove(tool_id);
                false
            }
            BreakerSignal::Transient => false,
            BreakerSignal::Permanent => {
                let count = inner
                    .consecutive_permanent
                    .entry(tool_id.to_string())
                    .or_insert(0);
                *count += 1;
                if *count >= self.config.consecutive_failure_limit {
                    *count = 0;
                    true
                } else {
                    false
                }
            }
            BreakerSignal::Harmful => true,
        };

        if risk_event {
            inner.risk_events += 1;
        }

        match before {
            BreakerState::Closed => {
                if risk_event && inner.risk_events >= self.config.risk_event_threshold {
                    Self::open(&mut inner);
                }
            }
            BreakerState::HalfOpen => {
                let probe_failed = probe
                    && matches!(signal, BreakerSignal::Permanent | BreakerSignal::Harmful);
                if risk_event || probe_failed {
                    Self::open(&mut inner);
                } else if probe && signal == BreakerSignal::Success {
                    inner.state = BreakerState::Closed;
                    inner.risk_events = 0;
                }
            }
            BreakerState::Open => {}
        }

        if inner.state != before {
            warn!(
                tool_id,
                from = ?before,
                to = ?inner.state,
                risk_events = inner.risk_events,
                "circuit breaker transition"
            );
            Some(inner.state)
        } else {
            None
        }
    }
}
