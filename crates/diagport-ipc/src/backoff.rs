//! Poll timeout backoff for rounds where some connections are not pollable

use std::fmt;
use std::time::Duration;

/// How long a single poll round may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTimeout {
    /// Block until some handle is ready
    Infinite,
    /// Give up after the duration
    After(Duration),
}

impl PollTimeout {
    /// Timeout in milliseconds, `None` for infinite
    pub fn as_millis(&self) -> Option<u128> {
        match self {
            PollTimeout::Infinite => None,
            PollTimeout::After(d) => Some(d.as_millis()),
        }
    }
}

impl fmt::Display for PollTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTimeout::Infinite => write!(f, "infinite"),
            PollTimeout::After(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

/// Bounds and growth rate of the poll timeout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// First timeout after a fully connected round, and after any hangup
    pub min: Duration,
    /// Upper bound of the timeout
    pub max: Duration,
    /// Multiplier applied after each incomplete round
    pub falloff_factor: f64,
}

impl BackoffPolicy {
    pub const DEFAULT_MIN: Duration = Duration::from_millis(10);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(500);
    pub const DEFAULT_FALLOFF_FACTOR: f64 = 1.25;

    pub fn new(min: Duration, max: Duration, falloff_factor: f64) -> Self {
        Self {
            min,
            max,
            falloff_factor,
        }
    }

    /// Timeout following `previous` for another incomplete round.
    ///
    /// `Infinite` becomes `min`; anything else grows by the falloff factor and
    /// is capped at `max`.
    pub fn next_timeout(&self, previous: PollTimeout) -> PollTimeout {
        match previous {
            PollTimeout::Infinite => PollTimeout::After(self.min),
            PollTimeout::After(current) => {
                // whole milliseconds, truncated, but always moving when factor > 1
                let current_ms = current.as_millis() as u64;
                let mut grown = (current_ms as f64 * self.falloff_factor) as u64;
                if self.falloff_factor > 1.0 {
                    grown = grown.max(current_ms + 1);
                }
                PollTimeout::After(Duration::from_millis(grown).min(self.max))
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MIN,
            Self::DEFAULT_MAX,
            Self::DEFAULT_FALLOFF_FACTOR,
        )
    }
}

/// Timeout state carried across the rounds of one acquisition call
#[derive(Debug, Clone)]
pub struct PollBackoff {
    policy: BackoffPolicy,
    current: PollTimeout,
    hangup_seen: bool,
}

impl PollBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: PollTimeout::Infinite,
            hangup_seen: false,
        }
    }

    /// Timeout to use for the round about to be polled.
    ///
    /// A complete round (every connection pollable) waits indefinitely. An
    /// incomplete round right after a hangup waits `min`; otherwise the timeout
    /// keeps growing.
    pub fn advance(&mut self, all_connected: bool) -> PollTimeout {
        self.current = if all_connected {
            PollTimeout::Infinite
        } else if self.hangup_seen {
            PollTimeout::After(self.policy.min)
        } else {
            self.policy.next_timeout(self.current)
        };
        self.hangup_seen = false;
        self.current
    }

    /// A connection hung up; retry soon rather than after a long wait.
    pub fn hangup(&mut self) {
        self.hangup_seen = true;
        self.current = PollTimeout::After(self.policy.min);
    }

    pub fn current(&self) -> PollTimeout {
        self.current
    }
}
