// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunables for focus dispatch and cross-context relays.
//!
//! # Environment Variables
//!
//! ```bash
//! # Do not move focus to a fallback after a rejected element transition
//! export UNDERSTORY_FOCUS_AUTO_TRANSFER=0
//!
//! # Callers share one native thread with every context (bounded polling)
//! export UNDERSTORY_FOCUS_SHARED_THREAD=1
//!
//! # Wake a blocked relay sender every 250 ms
//! export UNDERSTORY_FOCUS_POLL_INTERVAL_MS=250
//!
//! # Wait for cross-context relays indefinitely
//! export UNDERSTORY_FOCUS_RELAY_TIMEOUT_MS=0
//! ```

use web_time::Duration;

/// Default interval between disposal re-checks while blocked on a relay.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Default poll interval on a shared dispatch thread.
pub const DEFAULT_SHARED_THREAD_POLL_MS: u64 = 100;
/// Default total wait on a shared dispatch thread.
pub const DEFAULT_SHARED_THREAD_BUDGET_MS: u64 = 500;
/// Default wait per nested pump step.
pub const DEFAULT_PUMP_TICK_MS: u64 = 10;
/// Default overall relay timeout.
pub const DEFAULT_RELAY_TIMEOUT_MS: u64 = 5000;

const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 5000;
const MIN_PUMP_TICK_MS: u64 = 1;
const MAX_PUMP_TICK_MS: u64 = 100;
const MAX_SHARED_THREAD_BUDGET_MS: u64 = 5000;
const MAX_RELAY_TIMEOUT_MS: u64 = 600_000;

/// How a sender waits for a relay posted to another isolation context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Interval between disposal re-checks for a blocking sender.
    /// Default: 1000ms.
    pub poll_interval: Duration,
    /// Poll interval when callers share one dispatch thread.
    /// Default: 100ms.
    pub shared_thread_poll: Duration,
    /// Total wait when callers share one dispatch thread.
    /// Default: 500ms.
    pub shared_thread_budget: Duration,
    /// Wait per step while a dispatch thread pumps its own queue.
    /// Default: 10ms.
    pub pump_tick: Duration,
    /// Overall bound for a blocking sender; `None` waits until dispatched or
    /// disposed. Default: 5s.
    pub timeout: Option<Duration>,
    /// Every context is driven from one native thread, so a blocking wait
    /// could deadlock; senders poll within `shared_thread_budget` instead.
    /// Default: false.
    pub shared_dispatch_thread: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            shared_thread_poll: Duration::from_millis(DEFAULT_SHARED_THREAD_POLL_MS),
            shared_thread_budget: Duration::from_millis(DEFAULT_SHARED_THREAD_BUDGET_MS),
            pump_tick: Duration::from_millis(DEFAULT_PUMP_TICK_MS),
            timeout: Some(Duration::from_millis(DEFAULT_RELAY_TIMEOUT_MS)),
            shared_dispatch_thread: false,
        }
    }
}

impl RelayConfig {
    /// Set the blocking poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the overall timeout for blocking senders.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the nested pump step.
    #[must_use]
    pub fn with_pump_tick(mut self, tick: Duration) -> Self {
        self.pump_tick = tick;
        self
    }

    /// Mark callers as sharing one dispatch thread.
    #[must_use]
    pub fn with_shared_dispatch_thread(mut self, shared: bool) -> Self {
        self.shared_dispatch_thread = shared;
        self
    }

    /// Clamp values to usable ranges.
    ///
    /// - `poll_interval` to 10-5000ms
    /// - `pump_tick` to 1-100ms
    /// - `shared_thread_budget` to at most 5s
    /// - `shared_thread_poll` to at most `shared_thread_budget`
    /// - `timeout` to at most 10 minutes
    #[must_use]
    pub fn validated(mut self) -> Self {
        let poll = duration_ms(self.poll_interval);
        let poll = poll.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        self.poll_interval = Duration::from_millis(poll);

        let tick = duration_ms(self.pump_tick).clamp(MIN_PUMP_TICK_MS, MAX_PUMP_TICK_MS);
        self.pump_tick = Duration::from_millis(tick);

        let budget = duration_ms(self.shared_thread_budget).min(MAX_SHARED_THREAD_BUDGET_MS);
        self.shared_thread_budget = Duration::from_millis(budget);
        self.shared_thread_poll = self.shared_thread_poll.min(self.shared_thread_budget);

        self.timeout = self
            .timeout
            .map(|t| t.min(Duration::from_millis(MAX_RELAY_TIMEOUT_MS)));
        self
    }
}

/// Focus dispatch settings for one [`FocusManager`](crate::manager::FocusManager).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FocusConfig {
    /// Move focus to a fallback when an element transition is rejected.
    /// Default: true.
    pub auto_focus_transfer: bool,
    /// Cross-context relay waits.
    pub relay: RelayConfig,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            auto_focus_transfer: true,
            relay: RelayConfig::default(),
        }
    }
}

impl FocusConfig {
    /// Enable or disable automatic focus transfer.
    #[must_use]
    pub fn with_auto_focus_transfer(mut self, enabled: bool) -> Self {
        self.auto_focus_transfer = enabled;
        self
    }

    /// Replace the relay settings.
    #[must_use]
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Load settings from the process environment.
    ///
    /// Reads:
    /// - `UNDERSTORY_FOCUS_AUTO_TRANSFER`: "0"/"false" disables auto transfer
    /// - `UNDERSTORY_FOCUS_SHARED_THREAD`: "1"/"true" enables bounded polling
    /// - `UNDERSTORY_FOCUS_POLL_INTERVAL_MS`: blocking poll interval
    /// - `UNDERSTORY_FOCUS_RELAY_TIMEOUT_MS`: overall relay timeout, `0` for none
    ///
    /// Values are clamped with [`RelayConfig::validated`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`FocusConfig::from_env`], reading variables through `lookup`.
    #[must_use]
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("UNDERSTORY_FOCUS_AUTO_TRANSFER") {
            config.auto_focus_transfer = !(val == "0" || val.eq_ignore_ascii_case("false"));
        }

        if let Some(val) = lookup("UNDERSTORY_FOCUS_SHARED_THREAD") {
            config.relay.shared_dispatch_thread = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Some(val) = lookup("UNDERSTORY_FOCUS_POLL_INTERVAL_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.relay.poll_interval = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("UNDERSTORY_FOCUS_RELAY_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.relay.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config.relay = config.relay.validated();
        config
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(FocusConfig::from_env_with(|_| None), FocusConfig::default());
    }

    #[test]
    fn environment_overrides() {
        let config = FocusConfig::from_env_with(env(&[
            ("UNDERSTORY_FOCUS_AUTO_TRANSFER", "false"),
            ("UNDERSTORY_FOCUS_SHARED_THREAD", "TRUE"),
            ("UNDERSTORY_FOCUS_POLL_INTERVAL_MS", "250"),
            ("UNDERSTORY_FOCUS_RELAY_TIMEOUT_MS", "0"),
        ]));
        assert!(!config.auto_focus_transfer);
        assert!(config.relay.shared_dispatch_thread);
        assert_eq!(config.relay.poll_interval, Duration::from_millis(250));
        assert_eq!(config.relay.timeout, None);
    }

    #[test]
    fn garbage_is_ignored_and_values_clamped() {
        let config = FocusConfig::from_env_with(env(&[
            ("UNDERSTORY_FOCUS_POLL_INTERVAL_MS", "1"),
            ("UNDERSTORY_FOCUS_RELAY_TIMEOUT_MS", "soon"),
        ]));
        assert_eq!(config.relay.poll_interval, Duration::from_millis(10));
        assert_eq!(
            config.relay.timeout,
            Some(Duration::from_millis(DEFAULT_RELAY_TIMEOUT_MS))
        );

        let relay = RelayConfig::default()
            .with_pump_tick(Duration::from_secs(3))
            .validated();
        assert_eq!(relay.pump_tick, Duration::from_millis(100));
    }

    #[test]
    fn unbounded_durations_are_clamped() {
        let mut relay = RelayConfig::default().with_timeout(Some(Duration::MAX));
        relay.shared_thread_budget = Duration::MAX;
        relay.shared_thread_poll = Duration::MAX;
        let relay = relay.validated();
        assert_eq!(relay.timeout, Some(Duration::from_millis(600_000)));
        assert_eq!(relay.shared_thread_budget, Duration::from_millis(5000));
        assert_eq!(relay.shared_thread_poll, Duration::from_millis(5000));

        let unbounded = RelayConfig::default().with_timeout(None).validated();
        assert_eq!(unbounded.timeout, None);
    }
}
