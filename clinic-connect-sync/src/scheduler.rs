//! Poll Scheduler
//!
//! Explicit state machine behind the conversation poll loop:
//!
//! ```text
//!            start()                 success / failure < max
//!   Idle ───────────────► Intensive ◄──────────────────────► Normal
//!    ▲                        │      (mode re-evaluated when       │
//!    │ stop()                 │       the next cycle is scheduled) │
//!    │                        └──────────────┬─────────────────────┘
//!    │                                       │ failures == max_retries
//!    │         start() (activity)            ▼
//!    └──────────────────────────────── Disconnected
//! ```
//!
//! The scheduler itself never sleeps; it tells the driver how long to wait
//! before the next fetch. Retries use the current mode's interval, with no
//! exponential backoff.

use crate::activity::ActivityTracker;
use crate::config::PollingConfig;
use crate::mode::{select_mode, PollingMode};
use crate::SyncError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of a conversation's poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Not polling (never started, or stopped by the guard)
    Idle,
    /// Polling at the intensive interval
    IntensivePolling,
    /// Polling at the normal interval
    NormalPolling,
    /// Halted after too many consecutive failures
    Disconnected,
}

impl PollerState {
    pub fn is_polling(self) -> bool {
        matches!(
            self,
            PollerState::IntensivePolling | PollerState::NormalPolling
        )
    }

    fn for_mode(mode: PollingMode) -> Self {
        match mode {
            PollingMode::Intensive => PollerState::IntensivePolling,
            PollingMode::Normal => PollerState::NormalPolling,
        }
    }
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollerState::Idle => "idle",
            PollerState::IntensivePolling => "intensive-polling",
            PollerState::NormalPolling => "normal-polling",
            PollerState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Snapshot of the client-local polling state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingState {
    /// Last recorded user activity (ms)
    pub last_activity: i64,
    /// Current mode
    pub mode: PollingMode,
    /// Interval the current mode polls at
    pub interval: Duration,
    /// Consecutive failed fetches
    pub consecutive_failures: u32,
}

/// What the driver should do after a cycle settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    /// Wait `delay`, then fetch again
    Continue {
        delay: Duration,
        mode: PollingMode,
        /// The mode differs from the one the previous cycle ran in
        mode_changed: bool,
    },
    /// Stop looping and surface the disconnected state
    Halt,
}

/// Counters kept across the lifetime of a scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Cycles that settled (success or failure)
    pub cycles: u64,
    /// Failed cycles
    pub failures: u64,
    /// Messages newly added by reconciliation
    pub merged: u64,
}

/// Poll scheduling state machine for one conversation
#[derive(Debug)]
pub struct PollScheduler {
    config: PollingConfig,
    activity: ActivityTracker,
    state: PollerState,
    mode: PollingMode,
    consecutive_failures: u32,
    stats: PollStats,
}

impl PollScheduler {
    pub fn new(config: PollingConfig, activity: ActivityTracker) -> Self {
        let mode = select_mode(activity.elapsed_millis(), &config);
        Self {
            config,
            activity,
            state: PollerState::Idle,
            mode,
            consecutive_failures: 0,
            stats: PollStats::default(),
        }
    }

    /// Enter a polling state from `Idle` or `Disconnected`
    ///
    /// Resets the failure counter. Returns `false` if already polling.
    pub fn start(&mut self) -> bool {
        if self.state.is_polling() {
            return false;
        }

        let previous = self.state;
        self.consecutive_failures = 0;
        self.mode = self.current_mode();
        self.state = PollerState::for_mode(self.mode);
        info!(
            "Poll scheduler started from {} in {} mode ({:?} interval)",
            previous,
            self.mode,
            self.interval()
        );
        true
    }

    /// Return to `Idle`. A disconnected scheduler stays disconnected.
    pub fn stop(&mut self) {
        if self.state.is_polling() {
            debug!("Poll scheduler stopped");
            self.state = PollerState::Idle;
        }
    }

    /// Record a successful fetch that merged `merged` new messages
    pub fn record_success(&mut self, merged: usize) -> CycleDecision {
        self.stats.cycles += 1;
        self.stats.merged += merged as u64;
        if self.consecutive_failures > 0 {
            info!(
                "Fetch succeeded after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.schedule_next()
    }

    /// Record a failed fetch
    ///
    /// Every error kind counts, including authorization failures and
    /// malformed responses.
    pub fn record_failure(&mut self, error: &SyncError) -> CycleDecision {
        self.stats.cycles += 1;
        self.stats.failures += 1;
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.config.max_retries {
            warn!(
                "Fetch failed ({}/{}): {}. Disconnecting",
                self.consecutive_failures, self.config.max_retries, error
            );
            self.state = PollerState::Disconnected;
            return CycleDecision::Halt;
        }

        warn!(
            "Fetch failed ({}/{}): {}. Retrying",
            self.consecutive_failures, self.config.max_retries, error
        );
        self.schedule_next()
    }

    /// Re-evaluate the mode and compute the delay before the next cycle
    fn schedule_next(&mut self) -> CycleDecision {
        if !self.state.is_polling() {
            return CycleDecision::Halt;
        }

        let mode = self.current_mode();
        let mode_changed = mode != self.mode;
        if mode_changed {
            info!("Polling mode changed: {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        self.state = PollerState::for_mode(mode);

        let delay = mode.interval(&self.config);
        debug!("Next poll in {:?} ({} mode)", delay, mode);
        CycleDecision::Continue {
            delay,
            mode,
            mode_changed,
        }
    }

    fn current_mode(&self) -> PollingMode {
        select_mode(self.activity.elapsed_millis(), &self.config)
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn mode(&self) -> PollingMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.mode.interval(&self.config)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn polling_state(&self) -> PollingState {
        PollingState {
            last_activity: self.activity.last_activity(),
            mode: self.mode,
            interval: self.interval(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}
